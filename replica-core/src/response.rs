//! Response writers.
//!
//! [`ResponseWriter`] is the surface handlers and filters use to produce a
//! response: set the status, set or add headers, and stream body bytes through
//! a [`BodySink`]. Implementations decide when the status line and headers
//! reach the wire.
//!
//! - [`HttpResponse`] buffers everything in memory.
//! - [`StreamingResponse`] writes to a live connection, committing the head on
//!   first body access and passing every body write straight through.

use crate::headers::HeaderMap;
use crate::http::HttpResponse;
use crate::logging::{trace, warn};
use std::io::{self, Write};

/// Writable body of a response. Each write reaches the underlying sink
/// before the call returns.
pub type BodySink<'a> = Box<dyn Write + Send + 'a>;

/// Status, header, and body surface of an outgoing response.
pub trait ResponseWriter: Send {
    /// Currently set status code.
    fn status(&self) -> u16;

    fn set_status(&mut self, status: u16);

    /// Replace every value of `name` with `value`.
    fn set_header(&mut self, name: &str, value: &str);

    /// Add a value to `name`, keeping existing values.
    fn add_header(&mut self, name: &str, value: &str);

    /// First value currently set for `name`.
    fn header(&self, name: &str) -> Option<&str>;

    /// Obtain the body sink.
    fn body(&mut self) -> io::Result<BodySink<'_>>;

    /// Force the head and any buffered body bytes out to the client.
    fn flush_buffer(&mut self) -> io::Result<()>;
}

impl ResponseWriter for HttpResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.set(name, value);
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.append(name, value);
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    fn body(&mut self) -> io::Result<BodySink<'_>> {
        Ok(Box::new(&mut self.body))
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Response written directly to a client connection.
///
/// The HTTP/1.1 status line and header block are written to `W` the first
/// time the body is requested or the response is flushed. After that point
/// the head is fixed: status and header changes are dropped with a warning.
pub struct StreamingResponse<W: Write + Send> {
    out: W,
    status: u16,
    headers: HeaderMap,
    committed: bool,
}

impl<W: Write + Send> StreamingResponse<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            status: 200,
            headers: HeaderMap::new(),
            committed: false,
        }
    }

    /// True once the head has been written to the connection.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn commit(&mut self) -> io::Result<()> {
        if self.committed {
            return Ok(());
        }

        let reason = http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("");

        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason);
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        self.out.write_all(head.as_bytes())?;
        self.committed = true;
        trace!(status = self.status, headers = self.headers.len(), "Response committed");
        Ok(())
    }
}

impl<W: Write + Send> ResponseWriter for StreamingResponse<W> {
    fn status(&self) -> u16 {
        self.status
    }

    fn set_status(&mut self, status: u16) {
        if self.committed {
            warn!(status, "Status change after commit ignored");
            return;
        }
        self.status = status;
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if self.committed {
            warn!(header = name, "Header change after commit ignored");
            return;
        }
        self.headers.set(name, value);
    }

    fn add_header(&mut self, name: &str, value: &str) {
        if self.committed {
            warn!(header = name, "Header change after commit ignored");
            return;
        }
        self.headers.append(name, value);
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    fn body(&mut self) -> io::Result<BodySink<'_>> {
        self.commit()?;
        Ok(Box::new(&mut self.out))
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        self.commit()?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_response_writer() {
        let mut res = HttpResponse::ok();
        res.set_status(201);
        res.set_header("Content-Type", "text/plain");
        res.add_header("Set-Cookie", "a=1");
        res.add_header("Set-Cookie", "b=2");
        res.body().unwrap().write_all(b"hello").unwrap();
        res.body().unwrap().write_all(b" world").unwrap();
        res.flush_buffer().unwrap();

        assert_eq!(res.status(), 201);
        assert_eq!(res.header("content-type"), Some("text/plain"));
        assert_eq!(res.headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
        assert_eq!(res.body, b"hello world");
    }

    #[test]
    fn test_streaming_response_commits_head_once() {
        let mut res = StreamingResponse::new(Vec::new());
        res.set_status(404);
        res.set_header("Content-Type", "text/plain");
        assert!(!res.is_committed());

        res.body().unwrap().write_all(b"missing").unwrap();
        res.body().unwrap().write_all(b"!").unwrap();
        res.flush_buffer().unwrap();

        let wire = String::from_utf8(res.into_inner()).unwrap();
        assert_eq!(
            wire,
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\nmissing!"
        );
    }

    #[test]
    fn test_streaming_response_ignores_late_headers() {
        let mut res = StreamingResponse::new(Vec::new());
        res.flush_buffer().unwrap();
        assert!(res.is_committed());

        res.set_status(500);
        res.set_header("X-Late", "1");

        assert_eq!(res.status(), 200);
        assert_eq!(res.header("X-Late"), None);
        assert_eq!(res.get_ref().as_slice(), b"HTTP/1.1 200 OK\r\n\r\n");
    }

    #[test]
    fn test_streaming_body_is_written_through() {
        let mut res = StreamingResponse::new(Vec::new());
        {
            let mut body = res.body().unwrap();
            body.write_all(b"abc").unwrap();
        }
        assert!(res.get_ref().ends_with(b"\r\n\r\nabc"));
    }
}
