//! HTTP codec module for decoding requests and encoding responses
//!
//! The codecs implement the `tokio_util` [`Decoder`](tokio_util::codec::Decoder) and
//! [`Encoder`](tokio_util::codec::Encoder) traits, but are driven synchronously: the
//! session feeds them whatever bytes a non-blocking read produced and flushes the
//! encoded output when the socket is writable.
//!
//! - Request handling:
//!   - [`RequestDecoder`]: decodes a complete request (header and body)
//!   - Header parsing via the `header` module
//!   - `Content-Length` bodies via the `body` module
//!
//! - Response handling:
//!   - [`ResponseEncoder`]: serializes status line, headers and body
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use reactor_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from(&b"GET /index.html HTTP/1.1\r\nHost: a\r\n\r\n"[..]);
//! let request = decoder.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(request.uri().path(), "/index.html");
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;

/// Largest input a single request can occupy: a full header block plus the largest body.
pub(crate) const MAX_REQUEST_BYTES: usize = header::MAX_HEADER_BYTES + request_decoder::MAX_BODY_BYTES as usize;
