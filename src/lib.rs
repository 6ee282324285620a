// Replica - transparent response caching for HTTP request pipelines
//
// This library bundles the request/response pipeline surface with a caching
// filter that captures successful responses as they stream to the client and
// replays them for identical requests.

// Re-export core functionality
pub use replica_core::*;

// Re-export optional crates
#[cfg(feature = "cache")]
pub use replica_cache;

#[cfg(feature = "cache")]
pub use replica_cache::{
    CacheError, CacheFilter, CacheFilterConfig, CacheKey, CacheResult, FilterOutcome,
    FilterStats, MemoryStore, ResponseSnapshot, SnapshotStore,
};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Error, Filter, FilterChain, Handler, HttpRequest, HttpResponse, Pipeline,
        ResponseWriter, StreamingResponse, handler_fn,
    };

    #[cfg(feature = "cache")]
    pub use crate::{CacheFilter, CacheFilterConfig, FilterOutcome, SnapshotStore};
}
