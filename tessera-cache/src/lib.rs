//! TESSERA Cache
//!
//! In-memory cache of remote objects. Each entry carries a one-shot gate so
//! that concurrent lookups of the same object trigger a single remote fetch;
//! a secondary table resolves logical ids to remote keys once seen.

mod gate;
mod resource_cache;
mod stats;

pub use gate::Gate;
pub use resource_cache::{CacheEntry, RemoteFetcher, ResourceCache};
pub use stats::CacheStats;
