//! Response interceptor.
//!
//! [`ResponseInterceptor`] decorates the live [`ResponseWriter`]. Status and
//! header changes are forwarded to the wrapped response and mirrored into a
//! local record; body bytes go through a [`DualWriteSink`] so the client sees
//! them immediately while a private buffer accumulates a copy.
//!
//! Once downstream processing returns, the caller runs
//! [`flush_buffer`](ResponseWriter::flush_buffer) and may then
//! [`materialize`](ResponseInterceptor::materialize) the record into a
//! [`ResponseSnapshot`].

use crate::config::MaxAge;
use crate::error::{CacheError, CacheResult};
use crate::sink::DualWriteSink;
use crate::snapshot::{CachingHeaders, ResponseSnapshot};
use replica_core::logging::trace;
use replica_core::{BodySink, HeaderMap, ResponseWriter};
use std::io::{self, Write};
use std::time::SystemTime;

/// Status that marks a response as cacheable.
pub const STATUS_OK: u16 = 200;

/// In-memory copy of a response body.
///
/// With a limit set, the copy is discarded as soon as it grows past the
/// limit; only the byte count keeps advancing. Writes never fail.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    bytes: Vec<u8>,
    written: usize,
    limit: Option<usize>,
    overflowed: bool,
}

impl CaptureBuffer {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Total bytes written, including any discarded past the limit.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        if self.overflowed {
            return Ok(buf.len());
        }
        if self.limit.is_some_and(|limit| self.written > limit) {
            self.overflowed = true;
            self.bytes = Vec::new();
            return Ok(buf.len());
        }
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Recording decorator around a live response.
pub struct ResponseInterceptor<'a> {
    inner: &'a mut dyn ResponseWriter,
    status: u16,
    headers: HeaderMap,
    capture: CaptureBuffer,
    caching: CachingHeaders,
    committed: bool,
    finalized: bool,
}

impl<'a> ResponseInterceptor<'a> {
    /// Wrap `inner`. Until a TTL is supplied with
    /// [`with_max_age`](Self::with_max_age), the synthesized `Cache-Control`
    /// carries the unresolved sentinel.
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self {
            inner,
            status: STATUS_OK,
            headers: HeaderMap::new(),
            capture: CaptureBuffer::default(),
            caching: CachingHeaders::new(SystemTime::now(), MaxAge::Unresolved),
            committed: false,
            finalized: false,
        }
    }

    pub fn with_max_age(mut self, max_age: MaxAge) -> Self {
        self.caching.max_age = max_age;
        self
    }

    /// Stop keeping the body copy once it exceeds `limit` bytes.
    pub fn with_capture_limit(mut self, limit: Option<usize>) -> Self {
        self.capture = CaptureBuffer::new(limit);
        self
    }

    pub fn with_created_at(mut self, created_at: SystemTime) -> Self {
        self.caching.created_at = created_at;
        self
    }

    /// Status as last set by downstream processing.
    pub fn recorded_status(&self) -> u16 {
        self.status
    }

    pub fn recorded_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn captured_body(&self) -> &[u8] {
        self.capture.as_slice()
    }

    /// Bytes written to the body so far.
    pub fn body_len(&self) -> usize {
        self.capture.written()
    }

    /// True when the capture limit was exceeded and the copy discarded.
    pub fn is_overflowed(&self) -> bool {
        self.capture.is_overflowed()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Freeze the record into a snapshot.
    ///
    /// Fails with [`CacheError::Incomplete`] unless
    /// [`flush_buffer`](ResponseWriter::flush_buffer) has completed.
    pub fn materialize(self) -> CacheResult<ResponseSnapshot> {
        if !self.finalized {
            return Err(CacheError::Incomplete);
        }
        Ok(ResponseSnapshot::new(
            self.status,
            self.headers,
            self.capture.into_vec(),
            self.caching.created_at,
        ))
    }

    // Runs before the head can reach the client.
    fn commit(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        self.apply_caching_headers();
        trace!(status = self.status, "Intercepted response committed");
    }

    // Caching headers only make sense on a response that may be stored.
    // Safe to repeat: names already recorded are left alone.
    fn apply_caching_headers(&mut self) {
        if self.status != STATUS_OK {
            return;
        }
        let headers = &self.headers;
        for (name, value) in self.caching.missing(|name| headers.contains(name)) {
            self.inner.set_header(name, &value);
            self.headers.set(name, value);
        }
    }
}

impl ResponseWriter for ResponseInterceptor<'_> {
    fn status(&self) -> u16 {
        self.status
    }

    fn set_status(&mut self, status: u16) {
        self.status = status;
        self.inner.set_status(status);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.set(name, value);
        self.inner.set_header(name, value);
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.append(name, value);
        self.inner.add_header(name, value);
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).or_else(|| self.inner.header(name))
    }

    fn body(&mut self) -> io::Result<BodySink<'_>> {
        self.commit();
        let pass_through = self.inner.body()?;
        Ok(Box::new(DualWriteSink::new(&mut self.capture, pass_through)))
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        self.commit();
        // The status may have become 200 after the head was committed
        self.apply_caching_headers();
        self.inner.flush_buffer()?;
        self.finalized = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{HttpResponse, StreamingResponse};
    use std::time::Duration;

    fn created() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_records_and_forwards() {
        let mut live = HttpResponse::ok();
        let snapshot = {
            let mut res = ResponseInterceptor::new(&mut live)
                .with_max_age(MaxAge::Seconds(3600))
                .with_created_at(created());
            res.set_header("Content-Type", "application/json");
            res.add_header("Vary", "Accept");
            res.add_header("Vary", "Origin");
            res.body().unwrap().write_all(b"{\"id\":").unwrap();
            res.body().unwrap().write_all(b"7}").unwrap();
            res.flush_buffer().unwrap();
            res.materialize().unwrap()
        };

        assert_eq!(live.body, b"{\"id\":7}");
        assert_eq!(&snapshot.body()[..], b"{\"id\":7}");
        assert_eq!(snapshot.status(), 200);
        assert_eq!(snapshot.headers(), &live.headers);
        assert_eq!(snapshot.headers().get_all("vary"), vec!["Accept", "Origin"]);
        assert_eq!(snapshot.headers().get("Cache-Control"), Some("max-age=3600"));
        assert_eq!(snapshot.last_modified(), Some(created()));
    }

    #[test]
    fn test_default_status_is_ok() {
        let mut live = HttpResponse::new(204);
        let mut res = ResponseInterceptor::new(&mut live);
        res.flush_buffer().unwrap();
        assert_eq!(res.recorded_status(), STATUS_OK);
    }

    #[test]
    fn test_unresolved_max_age_sentinel() {
        let mut live = HttpResponse::ok();
        let mut res = ResponseInterceptor::new(&mut live).with_created_at(created());
        res.flush_buffer().unwrap();
        let snapshot = res.materialize().unwrap();

        assert_eq!(snapshot.headers().get("Cache-Control"), Some("max-age=-1"));
        assert_eq!(
            snapshot.headers().get("Expires"),
            Some(httpdate::fmt_http_date(created()).as_str())
        );
    }

    #[test]
    fn test_handler_caching_headers_win() {
        let mut live = HttpResponse::ok();
        let mut res = ResponseInterceptor::new(&mut live).with_max_age(MaxAge::Seconds(60));
        res.set_header("Cache-Control", "no-transform");
        res.set_header("Last-Modified", "Tue, 14 Nov 2023 22:13:20 GMT");
        res.flush_buffer().unwrap();
        let snapshot = res.materialize().unwrap();

        assert_eq!(snapshot.headers().get_all("cache-control"), vec!["no-transform"]);
        assert_eq!(
            snapshot.headers().get("Last-Modified"),
            Some("Tue, 14 Nov 2023 22:13:20 GMT")
        );
        assert!(snapshot.headers().contains("Expires"));
    }

    #[test]
    fn test_error_status_gets_no_caching_headers() {
        let mut live = HttpResponse::ok();
        let mut res = ResponseInterceptor::new(&mut live).with_max_age(MaxAge::Seconds(60));
        res.set_status(404);
        res.body().unwrap().write_all(b"gone").unwrap();
        res.flush_buffer().unwrap();

        assert_eq!(res.recorded_status(), 404);
        assert!(!res.recorded_headers().contains("Cache-Control"));
        drop(res);
        assert_eq!(live.status, 404);
        assert!(!live.headers.contains("Cache-Control"));
    }

    #[test]
    fn test_late_ok_status_gets_caching_headers() {
        let mut live = HttpResponse::ok();
        let snapshot = {
            let mut res = ResponseInterceptor::new(&mut live)
                .with_max_age(MaxAge::Seconds(3600))
                .with_created_at(created());
            res.set_status(202);
            res.body().unwrap().write_all(b"accepted").unwrap();
            assert!(!res.recorded_headers().contains("Cache-Control"));
            res.set_status(200);
            res.flush_buffer().unwrap();
            res.materialize().unwrap()
        };

        assert_eq!(snapshot.status(), 200);
        assert_eq!(snapshot.headers().get("Cache-Control"), Some("max-age=3600"));
        assert_eq!(snapshot.last_modified(), Some(created()));
        assert_eq!(
            snapshot.headers().get("Expires"),
            Some(httpdate::fmt_http_date(created() + Duration::from_secs(3600)).as_str())
        );
        assert_eq!(snapshot.headers(), &live.headers);
    }

    #[test]
    fn test_materialize_before_flush_is_incomplete() {
        let mut live = HttpResponse::ok();
        let mut res = ResponseInterceptor::new(&mut live);
        res.body().unwrap().write_all(b"partial").unwrap();

        assert!(matches!(res.materialize(), Err(CacheError::Incomplete)));
    }

    #[test]
    fn test_streams_before_finalize() {
        let mut live = StreamingResponse::new(Vec::new());
        {
            let mut res = ResponseInterceptor::new(&mut live).with_max_age(MaxAge::Seconds(10));
            res.set_header("Content-Type", "text/plain");
            res.body().unwrap().write_all(b"early").unwrap();
        }

        assert!(live.is_committed());
        let wire = String::from_utf8(live.into_inner()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n"));
        assert!(wire.contains("Cache-Control: max-age=10\r\n"));
        assert!(wire.ends_with("\r\n\r\nearly"));
    }

    #[test]
    fn test_capture_limit() {
        let mut live = HttpResponse::ok();
        let mut res = ResponseInterceptor::new(&mut live).with_capture_limit(Some(4));
        res.body().unwrap().write_all(b"1234").unwrap();
        assert!(!res.is_overflowed());
        res.body().unwrap().write_all(b"5").unwrap();
        res.body().unwrap().write_all(b"678").unwrap();
        res.flush_buffer().unwrap();

        assert!(res.is_overflowed());
        assert_eq!(res.body_len(), 8);
        assert!(res.captured_body().is_empty());
        drop(res);
        assert_eq!(live.body, b"12345678");
    }
}
