//! Provider backed by an external probe loader.
//!
//! The loader is a small privileged helper that owns the kernel side of
//! probe attachment. It is spawned as
//! `<loader> --pid <pid> --binary <path>` and driven over its stdin/stdout
//! with a line protocol:
//!
//! ```text
//! attach udp:block_reconstructed   -> ok | err <reason>
//! target                           -> ok <path> | err <reason>
//! start                            -> ok, then fixed-size binary records
//! detach                           (no reply)
//! ```
//!
//! After `start` the loader's stdout carries nothing but records of
//! [`RECORD_LEN`] bytes. A reader thread frames them and forwards them over
//! a bounded channel that [`LoaderProvider::poll`] drains.

use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use super::{AttachError, ProbeSpec, ProviderError, TracingProvider};
use crate::decode::RECORD_LEN;
use crate::types::RawRecord;

/// Records buffered between the reader thread and the ingestion loop.
const CHANNEL_CAPACITY: usize = 4096;

/// Upper bound on records returned by one `poll`.
const MAX_BATCH: usize = 512;

/// Time the loader gets to exit after SIGTERM before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

const EXIT_POLL: Duration = Duration::from_millis(20);

type Control = BufReader<Box<dyn Read + Send>>;

enum Reply {
    Ok(String),
    Err(String),
}

/// Drives a probe loader process over pipes.
pub struct LoaderProvider {
    child: Option<Child>,
    pid: Option<u32>,
    writer: Option<Box<dyn Write + Send>>,
    control: Option<Control>,
    records: Option<Receiver<RawRecord>>,
    reader: Option<JoinHandle<()>>,
    target: Option<PathBuf>,
    detached: bool,
}

impl LoaderProvider {
    /// Spawns the loader for the process `pid` running `binary`.
    pub fn spawn(loader: &Path, pid: u32, binary: &Path) -> io::Result<Self> {
        let mut child = Command::new(loader)
            .arg("--pid")
            .arg(pid.to_string())
            .arg("--binary")
            .arg(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("loader stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("loader stdout not captured"))?;

        info!(loader = %loader.display(), pid, child = child.id(), "probe loader started");

        let mut provider = Self::from_pipes(stdout, stdin, Some(pid));
        provider.child = Some(child);
        Ok(provider)
    }

    /// Wraps an already connected loader. `pid` is used to look up the
    /// target binary when the loader cannot report it.
    pub fn from_pipes(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        pid: Option<u32>,
    ) -> Self {
        let reader: Box<dyn Read + Send> = Box::new(reader);
        Self {
            child: None,
            pid,
            writer: Some(Box::new(writer)),
            control: Some(BufReader::new(reader)),
            records: None,
            reader: None,
            target: None,
            detached: false,
        }
    }

    fn send(&mut self, line: &str) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "loader stdin closed"))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    fn request(&mut self, line: &str) -> io::Result<Reply> {
        self.send(line)?;
        let control = self.control.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "loader is already streaming")
        })?;

        let mut reply = String::new();
        if control.read_line(&mut reply)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "loader closed its output",
            ));
        }
        let reply = reply.trim_end();
        debug!(request = line, reply, "probe loader exchange");

        match reply.split_once(' ') {
            None if reply == "ok" => Ok(Reply::Ok(String::new())),
            Some(("ok", rest)) => Ok(Reply::Ok(rest.to_string())),
            None if reply == "err" => Ok(Reply::Err(String::new())),
            Some(("err", rest)) => Ok(Reply::Err(rest.to_string())),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected loader reply: {reply:?}"),
            )),
        }
    }

    fn proc_target(&self) -> Option<PathBuf> {
        let pid = self.pid?;
        fs::read_link(format!("/proc/{pid}/exe")).ok()
    }
}

fn read_records(mut reader: Control, tx: SyncSender<RawRecord>) {
    loop {
        let mut buf = vec![0u8; RECORD_LEN];
        match reader.read_exact(&mut buf) {
            Ok(()) => {
                if tx.send(RawRecord::from(buf)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("probe loader stream ended");
                return;
            }
            Err(e) => {
                warn!(error = %e, "probe loader stream failed");
                return;
            }
        }
    }
}

impl TracingProvider for LoaderProvider {
    fn attach(&mut self, probe: &ProbeSpec) -> Result<(), AttachError> {
        if self.control.is_none() {
            return Err(AttachError::Unavailable(
                "loader is already streaming".to_string(),
            ));
        }
        match self.request(&format!("attach {probe}"))? {
            Reply::Ok(_) => Ok(()),
            Reply::Err(reason) => Err(AttachError::Refused {
                probe: probe.to_string(),
                reason,
            }),
        }
    }

    fn start(&mut self) -> Result<(), ProviderError> {
        match self.request("start")? {
            Reply::Ok(_) => {}
            Reply::Err(reason) => return Err(ProviderError::Protocol(reason)),
        }
        let control = self.control.take().ok_or(ProviderError::NotStarted)?;
        let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
        let handle = thread::Builder::new()
            .name("probe-reader".to_string())
            .spawn(move || read_records(control, tx))?;
        self.records = Some(rx);
        self.reader = Some(handle);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, ProviderError> {
        let rx = self.records.as_ref().ok_or(ProviderError::NotStarted)?;

        let first = match rx.recv_timeout(timeout) {
            Ok(record) => record,
            Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => {
                // Keep a dead loader from turning the ingestion loop into a spin.
                thread::sleep(timeout);
                return Err(ProviderError::Closed);
            }
        };

        let mut batch = vec![first];
        while batch.len() < MAX_BATCH {
            match rx.try_recv() {
                Ok(record) => batch.push(record),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        Ok(batch)
    }

    fn resolved_target(&mut self) -> Option<PathBuf> {
        if self.target.is_none() {
            self.target = match self.request("target") {
                Ok(Reply::Ok(path)) if !path.is_empty() => Some(PathBuf::from(path)),
                Ok(_) => self.proc_target(),
                Err(e) => {
                    debug!(error = %e, "loader could not report its target");
                    self.proc_target()
                }
            };
        }
        self.target.clone()
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;

        if let Err(e) = self.send("detach") {
            debug!(error = %e, "could not send detach to probe loader");
        }
        // Closing stdin tells the loader to exit.
        self.writer = None;
        self.records = None;

        if let Some(mut child) = self.child.take() {
            stop_child(&mut child, EXIT_GRACE);
        }

        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("probe reader thread panicked");
            }
        }
    }
}

/// Terminates `child` with SIGTERM, waits up to `grace` for it to exit,
/// then kills it. The child is always reaped.
fn stop_child(child: &mut Child, grace: Duration) {
    if !matches!(child.try_wait(), Ok(Some(_))) {
        match i32::try_from(child.id()) {
            Ok(raw) => {
                if let Err(e) = signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    debug!(error = %e, "failed to send SIGTERM to probe loader");
                }
            }
            Err(_) => warn!(pid = child.id(), "probe loader pid out of range"),
        }

        let deadline = Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                Ok(None) => {
                    error!("timeout waiting for probe loader to exit, killing");
                    if let Err(e) = child.kill() {
                        error!(error = %e, "failed to kill probe loader");
                    }
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to poll probe loader, killing");
                    if let Err(e) = child.kill() {
                        error!(error = %e, "failed to kill probe loader");
                    }
                    break;
                }
            }
        }
    }

    match child.wait() {
        Ok(status) => info!(%status, "probe loader exited"),
        Err(e) => warn!(error = %e, "failed to reap probe loader"),
    }
}

impl Drop for LoaderProvider {
    fn drop(&mut self) {
        self.detach();
    }
}
