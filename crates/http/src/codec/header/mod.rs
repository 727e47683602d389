//! HTTP request header decoding.
//!
//! - [`HeaderDecoder`]: parses the request line and header fields with `httparse`,
//!   enforces the header size and count limits and reports how the body is framed.

mod header_decoder;

pub use header_decoder::HeaderDecoder;
pub(crate) use header_decoder::MAX_HEADER_BYTES;
