//! Transparent HTTP response caching for Replica pipelines.
//!
//! A [`CacheFilter`] sits in front of a handler. The first cacheable request
//! for a path and query runs the handler as usual while a
//! [`ResponseInterceptor`] records the status, headers, and body on the way
//! to the client. A `200 OK` is frozen into a [`ResponseSnapshot`] and
//! stored; identical requests within the TTL are answered from the snapshot
//! without running the handler again.
//!
//! # Components
//!
//! - [`DualWriteSink`] - writer that copies every byte to a capture buffer
//!   before passing it to the client
//! - [`ResponseInterceptor`] - recording decorator around the live response
//! - [`ResponseSnapshot`] - immutable captured response, replayable any
//!   number of times
//! - [`SnapshotStore`] / [`MemoryStore`] - TTL + LRU snapshot storage
//! - [`CacheFilter`] - the per-request decision point
//!
//! # Examples
//!
//! ```rust
//! use replica_cache::prelude::*;
//! use replica_core::{handler_fn, HttpRequest, HttpResponse, Pipeline, ResponseWriter};
//! use std::io::Write;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let cache = Arc::new(CacheFilter::new(CacheFilterConfig::default()));
//!
//! let mut pipeline = Pipeline::new(handler_fn(|_req: &mut HttpRequest, res: &mut dyn ResponseWriter| {
//!     res.set_header("Content-Type", "application/json");
//!     res.body()?.write_all(br#"{"id":7}"#)?;
//!     Ok(())
//! }));
//! pipeline.use_shared_filter(cache.clone());
//!
//! for _ in 0..2 {
//!     let mut req = HttpRequest::from_uri("GET", "/widgets?id=7");
//!     let mut res = HttpResponse::ok();
//!     pipeline.dispatch(&mut req, &mut res).await.unwrap();
//!     assert_eq!(res.body, br#"{"id":7}"#);
//! }
//!
//! assert_eq!(cache.stats().hits, 1);
//! cache.shutdown().await.unwrap();
//! # });
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod interceptor;
pub mod key;
pub mod sink;
pub mod snapshot;
pub mod store;

pub use config::{CacheFilterConfig, MaxAge};
pub use error::{CacheError, CacheResult};
pub use filter::{CacheFilter, FilterMarker, FilterOutcome, FilterStats};
pub use interceptor::{CaptureBuffer, ResponseInterceptor};
pub use key::CacheKey;
pub use sink::DualWriteSink;
pub use snapshot::{CachingHeaders, ResponseSnapshot};
pub use store::{MemoryStore, SnapshotStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CacheFilterConfig, MaxAge};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::filter::{CacheFilter, FilterOutcome, FilterStats};
    pub use crate::key::CacheKey;
    pub use crate::snapshot::ResponseSnapshot;
    pub use crate::store::{MemoryStore, SnapshotStore};
}
