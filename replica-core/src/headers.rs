//! Ordered, multi-value header storage.
//!
//! Headers are kept as a flat list of name/value pairs in the order they were
//! first set. Lookup is case-insensitive. The first 12 pairs live inline, so a
//! typical response never allocates for its header block.
//!
//! Two write operations mirror the usual response API:
//!
//! - [`HeaderMap::set`] replaces every value for a name (last write wins)
//! - [`HeaderMap::append`] adds one more value, keeping earlier ones
//!
//! ```rust
//! use replica_core::headers::HeaderMap;
//!
//! let mut headers = HeaderMap::new();
//! headers.set("Content-Type", "text/plain");
//! headers.append("Set-Cookie", "a=1");
//! headers.append("Set-Cookie", "b=2");
//! headers.set("content-type", "application/json");
//!
//! assert_eq!(headers.get("Content-Type"), Some("application/json"));
//! assert_eq!(headers.get_all("set-cookie"), vec!["a=1", "b=2"]);
//! ```

use smallvec::SmallVec;
use std::fmt;

/// Number of headers stored inline before spilling to the heap.
pub const INLINE_HEADERS: usize = 12;

/// A header name-value pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name as it was set
    pub name: String,
    /// Header value
    pub value: String,
}

impl Header {
    #[inline]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Check if name matches (case-insensitive)
    #[inline]
    pub fn name_eq(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    inner: SmallVec<[Header; INLINE_HEADERS]>,
}

impl HeaderMap {
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: SmallVec::new_const(),
        }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: SmallVec::with_capacity(capacity),
        }
    }

    /// Number of name/value pairs (a multi-value header counts once per value).
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// First value for `name`.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|h| h.name_eq(name))
            .map(|h| h.value.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.inner
            .iter()
            .filter(|h| h.name_eq(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|h| h.name_eq(name))
    }

    /// Set `name` to a single value.
    ///
    /// The first existing pair keeps its position and takes the new value;
    /// any further pairs with the same name are dropped.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.inner.iter().position(|h| h.name_eq(&name)) {
            Some(pos) => {
                self.inner[pos].value = value;
                let mut index = 0;
                self.inner.retain(|h| {
                    let keep = index <= pos || !h.name_eq(&name);
                    index += 1;
                    keep
                });
            }
            None => self.inner.push(Header { name, value }),
        }
    }

    /// Add another value for `name` without touching existing ones.
    #[inline]
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push(Header::new(name, value));
    }

    /// Remove every pair for `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.inner.len();
        self.inner.retain(|h| !h.name_eq(name));
        before - self.inner.len()
    }

    /// Iterate over all pairs in order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_str()))
    }

    /// Distinct header names in first-seen order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.inner.len());
        for h in &self.inner {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&h.name)) {
                names.push(&h.name);
            }
        }
        names
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.get("Content-Type")
    }

    #[inline]
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl fmt::Debug for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
