//! Locating the running bitcoind.
//!
//! Walks `/proc` looking for processes whose executable is the configured
//! binary. Only an unambiguous result is accepted: with several nodes
//! running on one host the operator has to pick one with `--pid`.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// `comm` is truncated to this many bytes by the kernel.
const COMM_LEN: usize = 15;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no running process found for {}", binary.display())]
    NotFound { binary: PathBuf },

    #[error("{} processes match {}: {pids:?}; pass --pid", pids.len(), binary.display())]
    Ambiguous { binary: PathBuf, pids: Vec<u32> },

    #[error("cannot scan {}: {source}", root.display())]
    Scan {
        root: PathBuf,
        source: std::io::Error,
    },
}

/// Finds the PID of the single process running `binary`.
pub fn find_pid(binary: &Path) -> Result<u32, DiscoveryError> {
    find_pid_in(Path::new("/proc"), binary)
}

/// Same as [`find_pid`] against an arbitrary proc root.
///
/// Executable links are checked first. Only when none match is the
/// process name (`comm`) compared with the binary's file name.
pub fn find_pid_in(proc_root: &Path, binary: &Path) -> Result<u32, DiscoveryError> {
    let pids = list_pids(proc_root)?;
    let target = fs::canonicalize(binary).unwrap_or_else(|_| binary.to_path_buf());

    let by_exe: Vec<u32> = pids
        .iter()
        .copied()
        .filter(|pid| exe_of(proc_root, *pid).is_some_and(|exe| exe == target))
        .collect();
    debug!(matches = by_exe.len(), binary = %target.display(), "matched by executable");
    if !by_exe.is_empty() {
        return single(by_exe, binary);
    }

    let Some(name) = binary.file_name().and_then(|n| n.to_str()) else {
        return Err(DiscoveryError::NotFound {
            binary: binary.to_path_buf(),
        });
    };
    let comm = truncate(name, COMM_LEN);
    let by_comm: Vec<u32> = pids
        .iter()
        .copied()
        .filter(|pid| comm_of(proc_root, *pid).is_some_and(|c| c == comm))
        .collect();
    debug!(matches = by_comm.len(), comm, "matched by process name");
    single(by_comm, binary)
}

fn single(mut pids: Vec<u32>, binary: &Path) -> Result<u32, DiscoveryError> {
    match pids.len() {
        0 => Err(DiscoveryError::NotFound {
            binary: binary.to_path_buf(),
        }),
        1 => Ok(pids[0]),
        _ => {
            pids.sort_unstable();
            Err(DiscoveryError::Ambiguous {
                binary: binary.to_path_buf(),
                pids,
            })
        }
    }
}

fn list_pids(proc_root: &Path) -> Result<Vec<u32>, DiscoveryError> {
    let entries = fs::read_dir(proc_root).map_err(|source| DiscoveryError::Scan {
        root: proc_root.to_path_buf(),
        source,
    })?;
    Ok(entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .collect())
}

fn exe_of(proc_root: &Path, pid: u32) -> Option<PathBuf> {
    let link = fs::read_link(proc_root.join(pid.to_string()).join("exe")).ok()?;
    // A replaced binary shows up as "<path> (deleted)".
    let raw = link.to_str()?;
    Some(PathBuf::from(raw.strip_suffix(" (deleted)").unwrap_or(raw)))
}

fn comm_of(proc_root: &Path, pid: u32) -> Option<String> {
    let comm = fs::read_to_string(proc_root.join(pid.to_string()).join("comm")).ok()?;
    Some(comm.trim_end().to_string())
}

fn truncate(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    struct FakeProc {
        root: tempfile::TempDir,
    }

    impl FakeProc {
        fn new() -> Self {
            let root = tempfile::tempdir().expect("create fake proc");
            fs::create_dir(root.path().join("self")).expect("create self dir");
            Self { root }
        }

        fn process(&self, pid: u32, exe: Option<&Path>, comm: &str) {
            let dir = self.root.path().join(pid.to_string());
            fs::create_dir(&dir).expect("create pid dir");
            if let Some(exe) = exe {
                symlink(exe, dir.join("exe")).expect("link exe");
            }
            fs::write(dir.join("comm"), format!("{comm}\n")).expect("write comm");
        }

        fn path(&self) -> &Path {
            self.root.path()
        }
    }

    fn binary(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"").expect("create binary");
        fs::canonicalize(path).expect("canonical binary")
    }

    #[test]
    fn single_executable_match_is_found() {
        let bins = tempfile::tempdir().unwrap();
        let bitcoind = binary(&bins, "bitcoind");
        let other = binary(&bins, "sshd");

        let proc = FakeProc::new();
        proc.process(100, Some(&other), "sshd");
        proc.process(4242, Some(&bitcoind), "bitcoind");

        assert_eq!(find_pid_in(proc.path(), &bitcoind).unwrap(), 4242);
    }

    #[test]
    fn several_matches_are_ambiguous() {
        let bins = tempfile::tempdir().unwrap();
        let bitcoind = binary(&bins, "bitcoind");

        let proc = FakeProc::new();
        proc.process(300, Some(&bitcoind), "bitcoind");
        proc.process(200, Some(&bitcoind), "bitcoind");

        match find_pid_in(proc.path(), &bitcoind) {
            Err(DiscoveryError::Ambiguous { pids, .. }) => assert_eq!(pids, vec![200, 300]),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_process_name() {
        let proc = FakeProc::new();
        proc.process(77, None, "bitcoind");
        proc.process(78, None, "bash");

        assert_eq!(
            find_pid_in(proc.path(), Path::new("/opt/fibre/bin/bitcoind")).unwrap(),
            77
        );
    }

    #[test]
    fn process_name_is_compared_truncated() {
        let proc = FakeProc::new();
        proc.process(9, None, "bitcoind-fibre-");

        assert_eq!(
            find_pid_in(proc.path(), Path::new("/usr/bin/bitcoind-fibre-relay")).unwrap(),
            9
        );
    }

    #[test]
    fn nothing_running_is_not_found() {
        let proc = FakeProc::new();
        proc.process(1, None, "init");

        assert!(matches!(
            find_pid_in(proc.path(), Path::new("/usr/bin/bitcoind")),
            Err(DiscoveryError::NotFound { .. })
        ));
    }

    #[test]
    fn missing_proc_root_is_a_scan_error() {
        assert!(matches!(
            find_pid_in(Path::new("/nonexistent/proc"), Path::new("/usr/bin/bitcoind")),
            Err(DiscoveryError::Scan { .. })
        ));
    }
}
