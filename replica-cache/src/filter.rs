//! The caching filter.
//!
//! Each request passes through exactly one of these states:
//!
//! | State | Condition | Effect |
//! |---|---|---|
//! | Excluded | method is in the exclusion set | forwarded untouched |
//! | Duplicate | the request already went through a cache filter | forwarded untouched |
//! | Hit | a fresh snapshot exists for the key | snapshot replayed, downstream skipped |
//! | Miss | no fresh snapshot | downstream runs against an interceptor; a 200 is stored |
//!
//! ```rust
//! use replica_cache::{CacheFilter, CacheFilterConfig};
//! use replica_core::{handler_fn, HttpRequest, HttpResponse, Pipeline, ResponseWriter};
//! use std::io::Write;
//!
//! # tokio_test::block_on(async {
//! let mut pipeline = Pipeline::new(handler_fn(|_req: &mut HttpRequest, res: &mut dyn ResponseWriter| {
//!     res.set_header("Content-Type", "text/plain");
//!     res.body()?.write_all(b"hello")?;
//!     Ok(())
//! }));
//! pipeline.use_filter(CacheFilter::new(CacheFilterConfig::default()));
//!
//! let mut res = HttpResponse::ok();
//! pipeline.dispatch(&mut HttpRequest::new("GET", "/hello"), &mut res).await.unwrap();
//! assert_eq!(res.header("Cache-Control"), Some("max-age=3600"));
//! # });
//! ```

use crate::config::CacheFilterConfig;
use crate::error::{CacheError, CacheResult};
use crate::interceptor::{ResponseInterceptor, STATUS_OK};
use crate::key::CacheKey;
use crate::snapshot::{HEADER_IF_MODIFIED_SINCE, ResponseSnapshot};
use crate::store::{MemoryStore, SnapshotStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use replica_core::logging::{debug, trace, warn};
use replica_core::{Error, Filter, FilterChain, HttpRequest, ResponseWriter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Request attribute set on the first pass through a cache filter.
#[derive(Debug, Clone, Copy)]
pub struct FilterMarker;

/// Terminal state reached for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Method is excluded; downstream ran uncached
    Excluded,
    /// Request was already seen in this traversal; downstream ran uncached
    Duplicate,
    /// Snapshot replayed in full
    Hit,
    /// Snapshot matched `If-Modified-Since`; answered 304
    NotModified,
    /// Downstream ran and its response was stored
    Stored,
    /// Downstream ran with a non-200 final status
    Skipped { status: u16 },
    /// Downstream ran but the body exceeded the configured size limit
    Oversized { len: usize },
    /// Downstream ran but the store rejected the snapshot
    StoreFailed,
}

impl FilterOutcome {
    /// True when downstream processing was skipped.
    pub fn is_served_from_cache(&self) -> bool {
        matches!(self, FilterOutcome::Hit | FilterOutcome::NotModified)
    }
}

/// Point-in-time copy of the filter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub lookups: u64,
    pub hits: u64,
    pub not_modified: u64,
    pub misses: u64,
    pub stored: u64,
    pub skipped: u64,
    pub excluded: u64,
    pub duplicates: u64,
}

impl FilterStats {
    /// Fraction of lookups answered from the store.
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        (self.hits + self.not_modified) as f64 / self.lookups as f64
    }
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    hits: AtomicU64,
    not_modified: AtomicU64,
    misses: AtomicU64,
    stored: AtomicU64,
    skipped: AtomicU64,
    excluded: AtomicU64,
    duplicates: AtomicU64,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FilterStats {
        FilterStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            not_modified: self.not_modified.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// Response caching filter bound to one store.
///
/// The filter owns its store; nothing is shared through globals. Construct
/// one per pipeline (or share it behind an `Arc`), optionally start the
/// expiry reaper, and call [`shutdown`](Self::shutdown) when done.
pub struct CacheFilter<S: SnapshotStore = MemoryStore> {
    config: CacheFilterConfig,
    store: Arc<S>,
    counters: Counters,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheFilter<MemoryStore> {
    /// Filter backed by a [`MemoryStore`] sized from `config`.
    pub fn new(config: CacheFilterConfig) -> Self {
        let store = Arc::new(MemoryStore::from_config(&config));
        Self::with_store(config, store)
    }

    /// Filter configured from `REPLICA_CACHE_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(CacheFilterConfig::from_env())
    }
}

impl<S: SnapshotStore> CacheFilter<S> {
    pub fn with_store(config: CacheFilterConfig, store: Arc<S>) -> Self {
        debug!(
            ttl_seconds = config.ttl_seconds,
            excluded = ?config.excluded_methods,
            max_entries = ?config.max_entries,
            "Cache filter initialized"
        );
        Self {
            config,
            store,
            counters: Counters::default(),
            reaper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheFilterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn stats(&self) -> FilterStats {
        self.counters.snapshot()
    }

    /// Run one request through the filter and report which state it ended in.
    ///
    /// Errors from downstream processing are returned unchanged. A failure
    /// writing a stored snapshot to the client is returned as
    /// [`Error::Replay`] and leaves the snapshot in place; a failure
    /// flushing a live response is returned as [`Error::Transport`] and
    /// nothing is stored.
    pub async fn process(
        &self,
        req: &mut HttpRequest,
        res: &mut dyn ResponseWriter,
        chain: &dyn FilterChain,
    ) -> Result<FilterOutcome, Error> {
        if self.config.is_excluded(&req.method) {
            Counters::bump(&self.counters.excluded);
            debug!(method = %req.method, path = %req.path, "Method excluded from caching");
            chain.proceed(req, res).await?;
            return Ok(FilterOutcome::Excluded);
        }

        if req.attributes.contains::<FilterMarker>() {
            Counters::bump(&self.counters.duplicates);
            debug!(method = %req.method, path = %req.path, "Request already filtered");
            chain.proceed(req, res).await?;
            return Ok(FilterOutcome::Duplicate);
        }
        req.attributes.insert(FilterMarker);

        let key = CacheKey::from_request(req);
        Counters::bump(&self.counters.lookups);

        if let Some(snapshot) = self.lookup(&key).await {
            return self.replay(req, res, &key, &snapshot);
        }

        Counters::bump(&self.counters.misses);
        debug!(key = %key, "Cache miss");
        self.capture(req, res, chain, key).await
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Arc<ResponseSnapshot>> {
        match self.store.get(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn replay(
        &self,
        req: &HttpRequest,
        res: &mut dyn ResponseWriter,
        key: &CacheKey,
        snapshot: &ResponseSnapshot,
    ) -> Result<FilterOutcome, Error> {
        let since = req
            .header(HEADER_IF_MODIFIED_SINCE)
            .and_then(|h| httpdate::parse_http_date(h).ok());

        if let Some(since) = since.filter(|_| self.config.conditional_replay) {
            if snapshot.is_unmodified_since(since) {
                Counters::bump(&self.counters.not_modified);
                debug!(key = %key, "Cache hit, not modified");
                snapshot.replay_not_modified(res).map_err(Error::Replay)?;
                return Ok(FilterOutcome::NotModified);
            }
        }

        Counters::bump(&self.counters.hits);
        debug!(key = %key, status = snapshot.status(), "Cache hit");
        snapshot.replay(res).map_err(Error::Replay)?;
        Ok(FilterOutcome::Hit)
    }

    async fn capture(
        &self,
        req: &mut HttpRequest,
        res: &mut dyn ResponseWriter,
        chain: &dyn FilterChain,
        key: CacheKey,
    ) -> Result<FilterOutcome, Error> {
        let mut interceptor = ResponseInterceptor::new(res)
            .with_max_age(self.config.max_age())
            .with_capture_limit(self.config.max_body_size);

        chain.proceed(req, &mut interceptor).await?;
        interceptor.flush_buffer().map_err(Error::Transport)?;

        let status = interceptor.recorded_status();
        if status != STATUS_OK {
            Counters::bump(&self.counters.skipped);
            debug!(key = %key, status, "Response not cacheable");
            return Ok(FilterOutcome::Skipped { status });
        }

        if interceptor.is_overflowed() {
            let len = interceptor.body_len();
            Counters::bump(&self.counters.skipped);
            debug!(key = %key, len, limit = ?self.config.max_body_size, "Response body too large to cache");
            return Ok(FilterOutcome::Oversized { len });
        }

        let snapshot = interceptor
            .materialize()
            .map_err(|e| Error::Internal(e.to_string()))?;

        match self.store.put(key.clone(), Arc::new(snapshot)).await {
            Ok(()) => {
                Counters::bump(&self.counters.stored);
                debug!(key = %key, "Response stored");
                Ok(FilterOutcome::Stored)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to store response");
                Ok(FilterOutcome::StoreFailed)
            }
        }
    }
}

impl<S: SnapshotStore + 'static> CacheFilter<S> {
    /// Start a background task that purges expired snapshots every
    /// `interval`. Replaces a reaper started earlier.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_reaper(&self, interval: Duration) -> CacheResult<()> {
        if interval.is_zero() {
            return Err(CacheError::Config("reaper interval must be non-zero".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CacheError::Reaper(e.to_string()))?;

        let store = Arc::clone(&self.store);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, "Expired snapshots purged"),
                    Err(e) => warn!(error = %e, "Expiry sweep failed"),
                }
            }
        });

        if let Some(previous) = self.reaper.lock().replace(handle) {
            previous.abort();
        }
        trace!(interval = ?interval, "Cache reaper started");
        Ok(())
    }

    pub fn is_reaper_running(&self) -> bool {
        self.reaper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the reaper and empty the store.
    pub async fn shutdown(&self) -> CacheResult<()> {
        let reaper = self.reaper.lock().take();
        if let Some(handle) = reaper {
            handle.abort();
        }
        self.store.clear().await?;
        debug!("Cache filter shut down");
        Ok(())
    }
}

impl<S: SnapshotStore> Drop for CacheFilter<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl<S: SnapshotStore + 'static> Filter for CacheFilter<S> {
    async fn do_filter(
        &self,
        req: &mut HttpRequest,
        res: &mut dyn ResponseWriter,
        chain: &dyn FilterChain,
    ) -> Result<(), Error> {
        let outcome = self.process(req, res, chain).await?;
        trace!(path = %req.path, outcome = ?outcome, "Cache filter finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{HttpResponse, Pipeline, handler_fn};
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    /// Chain that answers with a fixed status and counts calls.
    struct Downstream {
        status: u16,
        calls: AtomicUsize,
    }

    impl Downstream {
        fn new(status: u16) -> Self {
            Self {
                status,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FilterChain for Downstream {
        async fn proceed(
            &self,
            req: &mut HttpRequest,
            res: &mut dyn ResponseWriter,
        ) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            res.set_status(self.status);
            res.set_header("Content-Type", "text/plain");
            res.body()?.write_all(req.path.as_bytes())?;
            Ok(())
        }
    }

    async fn run(filter: &CacheFilter, chain: &Downstream, method: &str, uri: &str) -> FilterOutcome {
        let mut req = HttpRequest::from_uri(method, uri);
        let mut res = HttpResponse::ok();
        filter.process(&mut req, &mut res, chain).await.unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let filter = CacheFilter::new(CacheFilterConfig::default());
        let chain = Downstream::new(200);

        assert_eq!(run(&filter, &chain, "GET", "/a").await, FilterOutcome::Stored);
        assert_eq!(run(&filter, &chain, "GET", "/a").await, FilterOutcome::Hit);
        assert_eq!(chain.calls(), 1);

        let stats = filter.stats();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_excluded_methods_bypass() {
        let filter = CacheFilter::new(CacheFilterConfig::default());
        let chain = Downstream::new(200);

        for method in ["POST", "PUT", "DELETE", "post"] {
            assert_eq!(run(&filter, &chain, method, "/a").await, FilterOutcome::Excluded);
        }
        assert_eq!(chain.calls(), 4);
        assert!(filter.store().is_empty().await);
        assert_eq!(filter.stats().lookups, 0);
    }

    #[tokio::test]
    async fn test_non_ok_is_not_stored() {
        let filter = CacheFilter::new(CacheFilterConfig::default());
        let chain = Downstream::new(404);

        for _ in 0..3 {
            assert_eq!(
                run(&filter, &chain, "GET", "/missing").await,
                FilterOutcome::Skipped { status: 404 }
            );
        }
        assert_eq!(chain.calls(), 3);
        assert!(filter.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_marker_short_circuits() {
        let filter = CacheFilter::new(CacheFilterConfig::default());
        let chain = Downstream::new(200);

        let mut req = HttpRequest::new("GET", "/a");
        req.attributes.insert(FilterMarker);
        let mut res = HttpResponse::ok();
        let outcome = filter.process(&mut req, &mut res, &chain).await.unwrap();

        assert_eq!(outcome, FilterOutcome::Duplicate);
        assert_eq!(filter.stats().lookups, 0);
        assert!(filter.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_body_is_not_stored() {
        let filter = CacheFilter::new(CacheFilterConfig::default().with_max_body_size(3));
        let chain = Downstream::new(200);

        let mut req = HttpRequest::new("GET", "/longer");
        let mut res = HttpResponse::ok();
        let outcome = filter.process(&mut req, &mut res, &chain).await.unwrap();

        assert_eq!(outcome, FilterOutcome::Oversized { len: 7 });
        assert_eq!(res.body, b"/longer");
        assert!(filter.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_reaper_lifecycle() {
        let filter = CacheFilter::new(CacheFilterConfig::default());
        assert!(filter.spawn_reaper(Duration::ZERO).is_err());

        filter.spawn_reaper(Duration::from_secs(1)).unwrap();
        assert!(filter.is_reaper_running());

        filter.shutdown().await.unwrap();
        assert!(!filter.is_reaper_running());
    }

    #[tokio::test]
    async fn test_as_pipeline_filter() {
        let mut pipeline = Pipeline::new(handler_fn(
            |_req: &mut HttpRequest, res: &mut dyn ResponseWriter| {
                res.body()?.write_all(b"ok")?;
                Ok(())
            },
        ));
        pipeline.use_filter(CacheFilter::new(CacheFilterConfig::default().with_ttl(Duration::from_secs(5))));

        let mut res = HttpResponse::ok();
        pipeline
            .dispatch(&mut HttpRequest::new("GET", "/"), &mut res)
            .await
            .unwrap();
        assert_eq!(res.header("Cache-Control"), Some("max-age=5"));
    }
}
