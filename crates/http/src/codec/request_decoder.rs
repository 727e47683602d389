//! HTTP request decoder module
//!
//! Decodes complete requests from a byte buffer that grows as the socket is read.
//! The decoder keeps its progress between calls, so a request split across many
//! reads is assembled without re-parsing the header.

use crate::codec::body::LengthDecoder;
use crate::codec::header::HeaderDecoder;
use crate::ensure;
use crate::protocol::{ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::{Bytes, BytesMut};
use http::Request;
use tokio_util::codec::Decoder;

/// Maximum request body size accepted by the decoder
pub(crate) const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// A decoder for HTTP requests that handles both headers and payload
///
/// # State Machine
///
/// - `pending` is `None`: currently parsing headers
/// - `pending` is `Some(_)`: header parsed, collecting the body
#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    pending: Option<PendingBody>,
}

#[derive(Debug)]
struct PendingBody {
    header: RequestHeader,
    payload_decoder: LengthDecoder,
    body: BytesMut,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether a header has been decoded and its body is still incomplete
    pub fn is_reading_body(&self) -> bool {
        self.pending.is_some()
    }
}

impl Decoder for RequestDecoder {
    type Item = Request<Bytes>;
    type Error = ParseError;

    /// Attempts to decode a complete HTTP request from the provided buffer
    ///
    /// # Returns
    ///
    /// - `Ok(Some(request))`: a full request (header and body) was decoded
    /// - `Ok(None)`: need more data to proceed
    /// - `Err(_)`: encountered a parsing error
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.pending.is_none() {
            let Some((header, payload_size)) = self.header_decoder.decode(src)? else {
                return Ok(None);
            };

            ensure!(payload_size.len() <= MAX_BODY_BYTES, ParseError::too_large_body(payload_size.len(), MAX_BODY_BYTES));

            if let PayloadSize::Empty = payload_size {
                return Ok(Some(header.body(Bytes::new())));
            }

            self.pending = Some(PendingBody {
                header,
                payload_decoder: LengthDecoder::new(payload_size.len()),
                body: BytesMut::with_capacity(payload_size.len() as usize),
            });
        }

        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };

        loop {
            match pending.payload_decoder.decode(src)? {
                Some(PayloadItem::Chunk(bytes)) => pending.body.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => break,
                None => return Ok(None),
            }
        }

        Ok(self.pending.take().map(|pending| pending.header.body(pending.body.freeze())))
    }
}
