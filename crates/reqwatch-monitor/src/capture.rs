//! Stream wrappers that count, and optionally buffer, body bytes.
//!
//! Both wrappers pass every operation through to the wrapped stream; the
//! only added behavior is bookkeeping.

use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};

use crate::config::BodyLimit;

fn capture(buffer: &mut Vec<u8>, limit: BodyLimit, data: &[u8]) {
    match limit {
        BodyLimit::Nothing => {}
        BodyLimit::Unbounded => buffer.extend_from_slice(data),
        BodyLimit::Bytes(max) => {
            let room = max.saturating_sub(buffer.len());
            buffer.extend_from_slice(&data[..room.min(data.len())]);
        }
    }
}

/// Wraps a request body reader. Every byte consumed is counted; bytes are
/// buffered up to the configured limit.
#[derive(Debug)]
pub struct CaptureReader<R> {
    inner: R,
    limit: BodyLimit,
    buffer: Vec<u8>,
    bytes_read: u64,
}

impl<R> CaptureReader<R> {
    pub fn new(inner: R, limit: BodyLimit) -> Self {
        let buffer = match limit {
            BodyLimit::Bytes(max) => Vec::with_capacity(max.min(8 * 1024)),
            _ => Vec::new(),
        };
        Self {
            inner,
            limit,
            buffer,
            bytes_read: 0,
        }
    }

    /// Buffered bytes, at most the limit.
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Total bytes consumed from the underlying reader.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Whether more bytes were read than buffered.
    pub fn truncated(&self) -> bool {
        (self.buffer.len() as u64) < self.bytes_read
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Returns the wrapped reader and the buffered bytes.
    pub fn into_parts(self) -> (R, Vec<u8>, u64) {
        (self.inner, self.buffer, self.bytes_read)
    }

    fn record(&mut self, data: &[u8]) {
        self.bytes_read += data.len() as u64;
        capture(&mut self.buffer, self.limit, data);
    }
}

impl<R: Read> Read for CaptureReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.record(&buf[..n]);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CaptureReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        // The consumed bytes are the head of the inner buffer.
        match self.inner.fill_buf() {
            Ok(available) => {
                let taken = &available[..amt.min(available.len())];
                self.bytes_read += taken.len() as u64;
                capture(&mut self.buffer, self.limit, taken);
            }
            Err(e) => tracing::debug!("Body bytes consumed without capture: {}", e),
        }
        self.inner.consume(amt);
    }
}

impl<R: Seek> Seek for CaptureReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Wraps a response body writer. Counts bytes written and tracks the status
/// code, content type and headers set on the response.
#[derive(Debug)]
pub struct CaptureWriter<W> {
    inner: W,
    bytes_written: u64,
    status: Option<u16>,
    status_message: Option<String>,
    content_type: Option<String>,
    headers: Vec<(String, String)>,
}

impl<W> CaptureWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
            status: None,
            status_message: None,
            content_type: None,
            headers: Vec::new(),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// The status code set on the response, `200` if never set.
    pub fn status(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Legacy setter carrying a reason phrase alongside the code.
    pub fn set_status_with_message(&mut self, status: u16, message: impl Into<String>) {
        self.status = Some(status);
        self.status_message = Some(message.into());
    }

    /// Marks the response as an error.
    pub fn send_error(&mut self, status: u16, message: Option<String>) {
        self.status = Some(status);
        self.status_message = message;
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    /// Sets a header, replacing any previous value (names compare
    /// case-insensitively).
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.clone());
        }
        self.headers.push((name, value));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CaptureWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
