//! `Content-Length` body framing, RFC 7230 section 3.3.2.

use std::cmp;

use crate::protocol::{ParseError, PayloadItem};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Hands out body bytes until `length` is used up. Anything after that stays
/// in the buffer for the next pipelined request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    length: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let take = cmp::min(self.length, src.len() as u64);
        self.length -= take;
        let bytes = src.split_to(take as usize).freeze();

        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(item: Option<PayloadItem>) -> Vec<u8> {
        match item {
            Some(PayloadItem::Chunk(bytes)) => bytes.to_vec(),
            other => panic!("expected a chunk, got {other:?}"),
        }
    }

    #[test]
    fn stops_at_announced_length() {
        let mut buffer = BytesMut::from(&b"0123456789GET / HTTP/1.1\r\n"[..]);
        let mut decoder = LengthDecoder::new(10);

        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), b"0123456789");
        assert_eq!(decoder.decode(&mut buffer).unwrap(), Some(PayloadItem::Eof));
        assert_eq!(&buffer[..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn split_across_reads() {
        let mut decoder = LengthDecoder::new(6);

        let mut buffer = BytesMut::from(&b"abc"[..]);
        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), b"abc");
        assert_eq!(decoder.decode(&mut buffer).unwrap(), None);

        buffer.extend_from_slice(b"defGET");
        assert_eq!(chunk(decoder.decode(&mut buffer).unwrap()), b"def");
        assert_eq!(&buffer[..], b"GET");
    }
}
