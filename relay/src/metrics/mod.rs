//! Metrics store and its HTTP exposition.
//!
//! Typical usage:
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay::metrics::{MetricsAuth, MetricsStore, catalog, serve_metrics};
//! use tokio::net::TcpListener;
//!
//! let store = Arc::new(MetricsStore::new()?);
//! let listener = TcpListener::bind("0.0.0.0:9435").await?;
//! tokio::spawn(serve_metrics(listener, store.clone(), MetricsAuth::disabled()));
//!
//! store.increment(catalog::BLOCKS_SENT, &["node-1"], 1.0)?;
//! ```

pub mod auth;
pub mod catalog;
pub mod http;
pub mod labels;
pub mod store;

pub use auth::MetricsAuth;
pub use catalog::{MetricDef, MetricKind};
pub use http::{handle_request, serve_metrics};
pub use labels::{PeerLabeler, sanitize_peer};
pub use store::{MetricsError, MetricsStore};
