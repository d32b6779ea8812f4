//! TESSERA Core - Shared Types
//!
//! Data types shared by every TESSERA crate: errors, configuration,
//! operation contexts, resource descriptors, the remote object model and the
//! transport seam. This crate performs no I/O of its own.

pub mod config;
pub mod context;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod identity;
pub mod object;
pub mod transport;

pub use config::{
    ClientConfig, ConfirmConfig, ConnectionKey, Credentials, LayerSettings, RetryConfig,
    DEFAULT_CACHE_CAPACITY, DEFAULT_CONCURRENCY,
};
pub use context::OpContext;
pub use descriptor::{DescriptorTable, PageSize, ResourceDescriptor};
pub use diagnostics::{Diagnostics, Outcome, Warning};
pub use error::{
    AccessError, AccessResult, CacheError, ConfigError, ConsistencyError, ContextError,
    RequestError,
};
pub use identity::{
    compute_content_hash, document_hash, new_remote_key, ContentHash, CONTENT_HASH_FIELD,
};
pub use object::{key_from_value, RemoteObject};
pub use transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};
