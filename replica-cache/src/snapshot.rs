//! Immutable, replayable response snapshots.
//!
//! A [`ResponseSnapshot`] holds the status, ordered headers, and body bytes
//! of one completed response. It is never mutated after construction and is
//! shared through an `Arc`, so any number of requests can replay it at once.

use crate::config::MaxAge;
use bytes::Bytes;
use replica_core::{HeaderMap, HttpResponse, ResponseWriter};
use std::io::{self, Write};
use std::time::SystemTime;

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_LAST_MODIFIED: &str = "Last-Modified";
pub const HEADER_EXPIRES: &str = "Expires";
pub const HEADER_CACHE_CONTROL: &str = "Cache-Control";
pub const HEADER_IF_MODIFIED_SINCE: &str = "If-Modified-Since";

/// Headers a replayed 304 carries over from the snapshot.
const NOT_MODIFIED_HEADERS: [&str; 3] = [HEADER_LAST_MODIFIED, HEADER_EXPIRES, HEADER_CACHE_CONTROL];

/// Caching headers synthesized for a captured response.
///
/// Each header is only filled in when the handler did not set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachingHeaders {
    pub created_at: SystemTime,
    pub max_age: MaxAge,
}

impl CachingHeaders {
    pub fn new(created_at: SystemTime, max_age: MaxAge) -> Self {
        Self {
            created_at,
            max_age,
        }
    }

    /// Name/value pairs missing from `present`, in a fixed order.
    pub fn missing(&self, present: impl Fn(&str) -> bool) -> Vec<(&'static str, String)> {
        let mut out = Vec::with_capacity(3);
        if !present(HEADER_LAST_MODIFIED) {
            out.push((HEADER_LAST_MODIFIED, httpdate::fmt_http_date(self.created_at)));
        }
        if !present(HEADER_EXPIRES) {
            out.push((
                HEADER_EXPIRES,
                httpdate::fmt_http_date(self.max_age.expires_at(self.created_at)),
            ));
        }
        if !present(HEADER_CACHE_CONTROL) {
            out.push((HEADER_CACHE_CONTROL, self.max_age.header_value()));
        }
        out
    }
}

/// A complete, previously generated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    created_at: SystemTime,
}

impl ResponseSnapshot {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>, created_at: SystemTime) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            created_at,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.content_type()
    }

    /// `Last-Modified` as recorded, parsed.
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.headers
            .get(HEADER_LAST_MODIFIED)
            .and_then(|h| httpdate::parse_http_date(h).ok())
    }

    /// Write status, headers, then body to `res`, and flush.
    ///
    /// The first value of each header name replaces whatever `res` holds;
    /// later values for the same name are added after it.
    pub fn replay(&self, res: &mut dyn ResponseWriter) -> io::Result<()> {
        res.set_status(self.status);
        self.replay_headers(res, |_| true);

        let mut body = res.body()?;
        body.write_all(&self.body)?;
        body.flush()?;
        drop(body);

        res.flush_buffer()
    }

    /// Answer a conditional request with `304 Not Modified` and the
    /// snapshot's caching headers, without a body.
    pub fn replay_not_modified(&self, res: &mut dyn ResponseWriter) -> io::Result<()> {
        res.set_status(304);
        self.replay_headers(res, |name| {
            NOT_MODIFIED_HEADERS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name))
        });
        res.flush_buffer()
    }

    /// True if a client holding a copy dated `since` is up to date.
    pub fn is_unmodified_since(&self, since: SystemTime) -> bool {
        // HTTP dates have one-second resolution
        self.last_modified()
            .is_some_and(|modified| modified <= since)
    }

    /// Buffered copy, for callers outside a streaming pipeline.
    pub fn to_response(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.to_vec(),
        }
    }

    fn replay_headers(&self, res: &mut dyn ResponseWriter, include: impl Fn(&str) -> bool) {
        let mut seen: Vec<&str> = Vec::with_capacity(self.headers.len());
        for (name, value) in self.headers.iter() {
            if !include(name) {
                continue;
            }
            if seen.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                res.add_header(name, value);
            } else {
                seen.push(name);
                res.set_header(name, value);
            }
        }
    }
}
