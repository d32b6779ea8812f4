//! TESSERA Client
//!
//! Access layer for slow, eventually-consistent REST object stores.
//!
//! Every request goes through a concurrency [`Limiter`] and a retrying
//! [`Executor`] whose outcome policy is a pluggable [`Classifier`]. Reads go
//! through the shared [`ResourceCache`](tessera_cache::ResourceCache) with
//! single-flight semantics, and writes can be confirmed by polling the stored
//! content hash with a [`WriteMonitor`].
//!
//! ```no_run
//! use tessera_client::AccessLayer;
//! use tessera_core::{ClientConfig, Credentials, OpContext};
//!
//! # async fn demo() -> tessera_core::AccessResult<()> {
//! let layer = AccessLayer::from_env();
//! let config = ClientConfig::new("config.internal", 8089)
//!     .with_credentials(Credentials::bearer("token"));
//! let role = layer.resource(&config, None, Some("ops"), "role")?;
//! let found = role.find(&OpContext::new()).await?;
//! # let _ = found;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod client;
pub mod executor;
pub mod layer;
pub mod limiter;
pub mod monitor;
pub mod pager;
pub mod retry;
pub mod telemetry;
pub mod transport;

pub use classify::{
    default_decision, Attempt, Classifier, CreateConflictClassifier, Decision, DefaultClassifier,
    DeleteServerErrorClassifier, Probe,
};
pub use client::ResourceClient;
pub use executor::Executor;
pub use layer::{AccessLayer, AccessLayerBuilder};
pub use limiter::{Limiter, Permit};
pub use monitor::{MonitorReport, WriteMonitor, WriteState};
pub use pager::{PageParams, Pager};
pub use retry::{Backoff, ExponentialBackoff, FixedBackoff, NoRetry, RetryPolicy};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use transport::ReqwestTransport;
