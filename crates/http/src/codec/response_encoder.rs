//! HTTP response encoder
//!
//! Serializes a fully buffered `Response<Bytes>`: status line, header fields, a
//! `Content-Length` that matches the body, and the body itself.

use crate::protocol::SendError;

use bytes::{BufMut, Bytes, BytesMut};
use http::{header, HeaderValue, Response, Version};
use std::io;
use std::io::Write;
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseEncoder;

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Encoder<Response<Bytes>> for ResponseEncoder {
    type Error = SendError;

    /// Encodes the response into `dst`.
    ///
    /// A `Content-Length` already present on a response with an empty body is kept
    /// (the answer to a `HEAD` request); otherwise it is set to the body length.
    fn encode(&mut self, response: Response<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, body) = response.into_parts();

        let version = match head.version {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(SendError::UnsupportedVersion { version: v });
            }
        };

        dst.reserve(INIT_HEADER_SIZE + body.len());
        write!(FastWrite(dst), "{} {} {}\r\n", version, head.status.as_str(), head.status.canonical_reason().unwrap_or(""))?;

        let keep_declared_length = body.is_empty() && head.headers.contains_key(header::CONTENT_LENGTH);
        if !keep_declared_length {
            head.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        for (header_name, header_value) in head.headers.iter() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        dst.put_slice(&body);
        Ok(())
    }
}

/// Writer adapter for formatting straight into the reserved `BytesMut`.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
