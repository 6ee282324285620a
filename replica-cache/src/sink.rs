//! Dual-write byte sink.
//!
//! [`DualWriteSink`] presents one [`Write`] to a handler and applies every
//! write to two sinks: a capture sink (normally an in-memory buffer) and a
//! pass-through sink (the client connection). The capture sink is always
//! written first. An error from either sink is returned to the caller; bytes
//! already accepted by the capture sink stay there.
//!
//! There is no buffering or locking here. A sink belongs to exactly one
//! in-flight response.

use std::io::{self, Write};

/// Fan-out writer feeding a capture sink and a pass-through sink.
#[derive(Debug)]
pub struct DualWriteSink<C: Write, P: Write> {
    capture: C,
    pass_through: P,
}

impl<C: Write, P: Write> DualWriteSink<C, P> {
    pub fn new(capture: C, pass_through: P) -> Self {
        Self {
            capture,
            pass_through,
        }
    }

    /// Write a single byte to both sinks.
    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }

    /// Write `len` bytes of `buf` starting at `offset` to both sinks.
    pub fn write_range(&mut self, buf: &[u8], offset: usize, len: usize) -> io::Result<()> {
        let end = offset.checked_add(len).filter(|end| *end <= buf.len()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "range {}+{} out of bounds for buffer of {} bytes",
                    offset,
                    len,
                    buf.len()
                ),
            )
        })?;
        self.write_all(&buf[offset..end])
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn pass_through(&self) -> &P {
        &self.pass_through
    }

    /// Flush both sinks, capture first, and hand them back.
    pub fn close(mut self) -> io::Result<(C, P)> {
        self.flush()?;
        Ok((self.capture, self.pass_through))
    }
}

impl<C: Write, P: Write> Write for DualWriteSink<C, P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Both sinks must see the same bytes, so partial writes are not
        // exposed: each side takes the whole buffer or the call fails.
        self.capture.write_all(buf)?;
        self.pass_through.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.capture.flush()?;
        self.pass_through.flush()
    }
}
