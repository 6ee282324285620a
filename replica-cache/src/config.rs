//! Cache filter configuration.
//!
//! The filter consumes already-resolved values. Resolvers are provided for
//! the common sources (string parameters, environment, JSON); every one of
//! them treats a missing or malformed value as "use the default" and logs a
//! warning instead of failing.

use crate::error::{CacheError, CacheResult};
use replica_core::logging::warn;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, SystemTime};

/// Default time-to-live, in seconds.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Default LRU bound on stored snapshots.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Methods that bypass the cache unless configured otherwise.
pub const DEFAULT_EXCLUDED_METHODS: [&str; 3] = ["POST", "DELETE", "PUT"];

/// `max-age` value advertised when no TTL was ever resolved.
pub const MAX_AGE_UNRESOLVED: i64 = -1;

/// 9999-12-31T23:59:59Z, the latest instant an HTTP date can carry.
const MAX_HTTP_DATE_SECS: u64 = 253_402_300_799;

/// Freshness lifetime advertised in `Cache-Control` and `Expires`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAge {
    Seconds(u64),
    /// TTL configuration was never resolved; the response must not be
    /// considered fresh by downstream caches.
    Unresolved,
}

impl MaxAge {
    /// Value for the `Cache-Control` header.
    pub fn header_value(&self) -> String {
        match self {
            MaxAge::Seconds(secs) => format!("max-age={}", secs),
            MaxAge::Unresolved => format!("max-age={}", MAX_AGE_UNRESOLVED),
        }
    }

    /// Expiry instant for a response created at `created_at`, capped at
    /// the end of year 9999.
    pub fn expires_at(&self, created_at: SystemTime) -> SystemTime {
        let latest = SystemTime::UNIX_EPOCH + Duration::from_secs(MAX_HTTP_DATE_SECS);
        let expires = match self {
            MaxAge::Seconds(secs) => created_at
                .checked_add(Duration::from_secs(*secs))
                .unwrap_or(latest),
            MaxAge::Unresolved => created_at,
        };
        expires.min(latest)
    }
}

impl fmt::Display for MaxAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header_value())
    }
}

/// Resolved configuration for [`CacheFilter`](crate::CacheFilter).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheFilterConfig {
    /// Lifetime of a stored snapshot, measured from insertion
    pub ttl_seconds: u64,

    /// Request methods forwarded without caching (upper-case)
    #[serde(deserialize_with = "deserialize_methods")]
    pub excluded_methods: BTreeSet<String>,

    /// LRU bound on stored snapshots; `None` keeps every entry until expiry
    pub max_entries: Option<usize>,

    /// Captured bodies larger than this are not stored
    pub max_body_size: Option<usize>,

    /// Answer `If-Modified-Since` on a hit with `304 Not Modified`
    pub conditional_replay: bool,
}

impl Default for CacheFilterConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            excluded_methods: default_excluded_methods(),
            max_entries: Some(DEFAULT_MAX_ENTRIES),
            max_body_size: None,
            conditional_replay: true,
        }
    }
}

impl CacheFilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve from string parameters.
    ///
    /// Recognised keys: `ttl_seconds`, `excluded_methods` (comma separated),
    /// `max_entries` (`0` means unbounded), `max_body_size`,
    /// `conditional_replay`.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let mut config = Self::default();

        // `time` and `disableCacheOnMethods` are the legacy names
        if let Some(ttl) = params.get("ttl_seconds").or_else(|| params.get("time")) {
            config.ttl_seconds = parse_or_default("ttl_seconds", ttl, DEFAULT_TTL_SECONDS);
        }
        if let Some(methods) = params
            .get("excluded_methods")
            .or_else(|| params.get("disableCacheOnMethods"))
        {
            config.excluded_methods = parse_methods(methods);
        }
        if let Some(max) = params.get("max_entries") {
            config.max_entries = match parse_or_default("max_entries", max, DEFAULT_MAX_ENTRIES) {
                0 => None,
                n => Some(n),
            };
        }
        if let Some(max) = params.get("max_body_size") {
            config.max_body_size = max.trim().parse().ok();
            if config.max_body_size.is_none() {
                warn!(key = "max_body_size", value = %max, "Invalid cache setting, using default");
            }
        }
        if let Some(flag) = params.get("conditional_replay") {
            config.conditional_replay = parse_or_default("conditional_replay", flag, true);
        }

        config
    }

    /// Resolve from `REPLICA_CACHE_TTL`, `REPLICA_CACHE_EXCLUDED_METHODS`,
    /// `REPLICA_CACHE_MAX_ENTRIES`, `REPLICA_CACHE_MAX_BODY_SIZE` and
    /// `REPLICA_CACHE_CONDITIONAL_REPLAY`.
    pub fn from_env() -> Self {
        let mut params = HashMap::new();
        for (var, key) in [
            ("REPLICA_CACHE_TTL", "ttl_seconds"),
            ("REPLICA_CACHE_EXCLUDED_METHODS", "excluded_methods"),
            ("REPLICA_CACHE_MAX_ENTRIES", "max_entries"),
            ("REPLICA_CACHE_MAX_BODY_SIZE", "max_body_size"),
            ("REPLICA_CACHE_CONDITIONAL_REPLAY", "conditional_replay"),
        ] {
            if let Ok(value) = env::var(var) {
                params.insert(key.to_string(), value);
            }
        }
        Self::from_params(&params)
    }

    /// Parse a JSON document. Absent fields take their defaults; a document
    /// that is not a JSON object of the right shape is an error.
    pub fn from_json(json: &str) -> CacheResult<Self> {
        serde_json::from_str(json).map_err(|e| CacheError::Config(e.to_string()))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = ttl.as_secs();
        self
    }

    pub fn with_excluded_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded_methods = methods
            .into_iter()
            .map(|m| m.as_ref().trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Disable LRU eviction; entries leave only through expiry.
    pub fn unbounded(mut self) -> Self {
        self.max_entries = None;
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = Some(size);
        self
    }

    pub fn with_conditional_replay(mut self, enable: bool) -> Self {
        self.conditional_replay = enable;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn max_age(&self) -> MaxAge {
        MaxAge::Seconds(self.ttl_seconds)
    }

    /// Capacity for the LRU store. A configured bound of zero is treated as
    /// unbounded.
    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.max_entries.and_then(NonZeroUsize::new)
    }

    pub fn is_excluded(&self, method: &str) -> bool {
        self.excluded_methods.contains(&method.to_uppercase())
    }
}

fn default_excluded_methods() -> BTreeSet<String> {
    DEFAULT_EXCLUDED_METHODS
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn parse_methods(raw: &str) -> BTreeSet<String> {
    let methods: BTreeSet<String> = raw
        .split(',')
        .map(|m| m.trim().to_uppercase())
        .filter(|m| !m.is_empty())
        .collect();

    if methods.is_empty() {
        warn!(key = "excluded_methods", value = %raw, "Empty method list, using default");
        default_excluded_methods()
    } else {
        methods
    }
}

fn parse_or_default<T>(key: &str, raw: &str, default: T) -> T
where
    T: std::str::FromStr + fmt::Display,
{
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, default = %default, "Invalid cache setting, using default");
            default
        }
    }
}

fn deserialize_methods<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let methods = Vec::<String>::deserialize(deserializer)?;
    Ok(CacheFilterConfig::default()
        .with_excluded_methods(methods)
        .excluded_methods)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = CacheFilterConfig::default();
        assert_eq!(config.ttl_seconds, 3600);
        assert!(config.is_excluded("POST"));
        assert!(config.is_excluded("DELETE"));
        assert!(config.is_excluded("PUT"));
        assert!(!config.is_excluded("GET"));
        assert!(!config.is_excluded("HEAD"));
        assert_eq!(config.max_age(), MaxAge::Seconds(3600));
    }

    #[test]
    fn test_from_params() {
        let config = CacheFilterConfig::from_params(&params(&[
            ("ttl_seconds", "60"),
            ("excluded_methods", "post, patch"),
            ("max_entries", "0"),
            ("max_body_size", "1024"),
        ]));

        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert!(config.is_excluded("PATCH"));
        assert!(config.is_excluded("post"));
        assert!(!config.is_excluded("PUT"));
        assert_eq!(config.max_entries, None);
        assert_eq!(config.max_body_size, Some(1024));
    }

    #[test]
    fn test_legacy_param_names() {
        let config = CacheFilterConfig::from_params(&params(&[
            ("time", "90"),
            ("disableCacheOnMethods", "PATCH"),
        ]));
        assert_eq!(config.ttl_seconds, 90);
        assert!(config.is_excluded("PATCH"));
        assert!(!config.is_excluded("POST"));

        let config = CacheFilterConfig::from_params(&params(&[
            ("time", "90"),
            ("ttl_seconds", "30"),
            ("disableCacheOnMethods", "PATCH"),
            ("excluded_methods", "DELETE"),
        ]));
        assert_eq!(config.ttl_seconds, 30);
        assert!(config.is_excluded("DELETE"));
        assert!(!config.is_excluded("PATCH"));
    }

    #[test]
    fn test_malformed_params_fall_back_to_defaults() {
        let config = CacheFilterConfig::from_params(&params(&[
            ("ttl_seconds", "an hour"),
            ("excluded_methods", " , "),
            ("max_entries", "-5"),
            ("conditional_replay", "maybe"),
        ]));

        assert_eq!(config, CacheFilterConfig::default());
    }

    #[test]
    fn test_from_json() {
        let config =
            CacheFilterConfig::from_json(r#"{"ttl_seconds": 5, "excluded_methods": ["get"]}"#)
                .unwrap();
        assert_eq!(config.ttl_seconds, 5);
        assert!(config.is_excluded("GET"));
        assert!(!config.is_excluded("POST"));
        assert_eq!(config.max_entries, Some(DEFAULT_MAX_ENTRIES));

        let err = CacheFilterConfig::from_json(r#"{"ttl_seconds": "soon"}"#).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn test_max_age_rendering() {
        let created = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);

        assert_eq!(MaxAge::Seconds(3600).header_value(), "max-age=3600");
        assert_eq!(
            MaxAge::Seconds(3600).expires_at(created),
            created + Duration::from_secs(3600)
        );
        assert_eq!(MaxAge::Unresolved.header_value(), "max-age=-1");
        assert_eq!(MaxAge::Unresolved.expires_at(created), created);
    }

    #[test]
    fn test_expiry_capped_at_year_9999() {
        let latest = "Fri, 31 Dec 9999 23:59:59 GMT";
        let now = SystemTime::now();

        let far = MaxAge::Seconds(300_000_000_000).expires_at(now);
        assert_eq!(httpdate::fmt_http_date(far), latest);
        let overflow = MaxAge::Seconds(u64::MAX).expires_at(now);
        assert_eq!(httpdate::fmt_http_date(overflow), latest);
    }

    #[test]
    fn test_capacity() {
        assert_eq!(
            CacheFilterConfig::new().with_max_entries(2).capacity(),
            NonZeroUsize::new(2)
        );
        assert_eq!(CacheFilterConfig::new().with_max_entries(0).capacity(), None);
        assert_eq!(CacheFilterConfig::new().unbounded().capacity(), None);
    }
}
