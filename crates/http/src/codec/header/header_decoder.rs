//! HTTP header decoder implementation for parsing HTTP request headers
//!
//! This module decodes the request line and header fields from raw bytes into a
//! [`RequestHeader`], and decides from `Content-Length` / `Transfer-Encoding` how the
//! body that follows is framed.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: 8KB
//! - Only HTTP/1.0 and HTTP/1.1 are accepted
//! - `Transfer-Encoding` on a request is rejected, bodies need a `Content-Length`

use bytes::{Buf, BytesMut};
use http::{HeaderValue, Request};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;

use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of headers allowed in a request
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
pub(crate) const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Shortest possible request line plus terminator: "GET / HTTP/1.1\r\n\r\n" minus the path
const MIN_REQUEST_BYTES: usize = 14;

/// Decoder for HTTP request headers implementing the [`Decoder`] trait.
///
/// On success the header bytes are consumed from the source buffer, leaving the
/// body (if any) and possibly further pipelined requests behind.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    /// Attempts to decode HTTP headers from the provided bytes buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((header, payload_size)))` if a complete header was parsed
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError)` if parsing failed or a limit was exceeded
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_REQUEST_BYTES {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let parsed_result = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e),
        });

        let body_offset = match parsed_result? {
            Status::Complete(body_offset) => body_offset,
            // If parsing incomplete, ensure current buffer size does not exceed limit
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };

        trace!(header_size = body_offset, "parsed request header");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            // Currently HTTP/2 and HTTP/3 not supported
            _ => return Err(ParseError::InvalidVersion(req.version)),
        };

        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let path = req.path.ok_or(ParseError::InvalidUri)?;

        let mut header_builder = Request::builder().method(method).uri(path).version(version);
        for header in req.headers.iter() {
            header_builder = header_builder.header(header.name, header.value);
        }

        let header = RequestHeader::from(header_builder.body(()).map_err(ParseError::invalid_header)?);
        let payload_size = parse_payload(&header)?;

        src.advance(body_offset);
        Ok(Some((header, payload_size)))
    }
}

/// Determines how the request body is framed.
///
/// # Errors
///
/// Returns `ParseError` if:
/// - A `Transfer-Encoding` header is present (chunked uploads are not supported)
/// - The `Content-Length` value is not a valid unsigned integer
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (Some(te_value), _) => Err(ParseError::unsupported_transfer_encoding(display_value(te_value))),

        (None, None) => Ok(PayloadSize::Empty),

        (None, Some(_)) if !header.need_body() => Ok(PayloadSize::Empty),

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(ParseError::invalid_content_length)?;

            let length =
                cl_str.trim().parse::<u64>().map_err(|e| ParseError::invalid_content_length(format!("value {cl_str}: {e}")))?;

            Ok(PayloadSize::from_content_length(length))
        }
    }
}

fn display_value(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}
