//! HTTP exposition of the metrics store.
//!
//! Serves `GET /metrics` in the Prometheus text format, behind optional
//! Basic authentication. All other paths return 404.

use std::{convert::Infallible, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use super::auth::{CHALLENGE, MetricsAuth};
use super::store::MetricsStore;

/// Serves the metrics endpoint on an already bound listener until the task
/// is dropped.
///
/// ```ignore
/// let store = Arc::new(MetricsStore::new()?);
/// let listener = TcpListener::bind("0.0.0.0:9435").await?;
/// tokio::spawn(serve_metrics(listener, store.clone(), MetricsAuth::disabled()));
/// ```
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<MetricsStore>,
    auth: MetricsAuth,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let auth = Arc::new(auth);

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        let auth = auth.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                let auth = auth.clone();
                async move { handle_request(req, &metrics, &auth).await }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                debug!(%peer, error = %err, "metrics connection error");
            }
        });
    }
}

/// Answers one request against the store.
pub async fn handle_request<B>(
    req: Request<B>,
    metrics: &MetricsStore,
    auth: &MetricsAuth,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let authorization = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            if !auth.authorize(authorization) {
                warn!("rejected unauthenticated metrics scrape");
                let mut resp = text(StatusCode::UNAUTHORIZED, "Unauthorized");
                resp.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(CHALLENGE),
                );
                return Ok(resp);
            }

            let mut resp = Response::new(Full::new(Bytes::from(metrics.gather_text())));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            );
            Ok(resp)
        }
        _ => Ok(text(StatusCode::NOT_FOUND, "Not Found")),
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    resp
}
