use bytes::Bytes;

/// One step of a request body as produced by the body decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    Chunk(Bytes),
    /// All announced bytes were consumed
    Eof,
}

/// Body framing announced by a request header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    Length(u64),
    Empty,
}

impl PayloadSize {
    /// A zero `Content-Length` is the same as no body at all.
    pub fn from_content_length(length: u64) -> Self {
        if length == 0 { Self::Empty } else { Self::Length(length) }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::Length(length) => *length,
            Self::Empty => 0,
        }
    }
}
