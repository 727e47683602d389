use std::io;
use thiserror::Error;

/// Why a request could not be decoded. Every variant ends up as a `400` and a
/// closed connection.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size {current_size} exceeds the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("more than {max_num} headers")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length: {reason}")]
    InvalidContentLength { reason: String },

    #[error("unsupported transfer-encoding: {value}")]
    UnsupportedTransferEncoding { value: String },

    #[error("body size {current_size} exceeds the limit {max_size}")]
    TooLargeBody { current_size: u64, max_size: u64 },

    // required by the `Decoder` trait, never produced from an in-memory buffer
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    pub fn unsupported_transfer_encoding<S: ToString>(value: S) -> Self {
        Self::UnsupportedTransferEncoding { value: value.to_string() }
    }

    pub fn too_large_body(current_size: u64, max_size: u64) -> Self {
        Self::TooLargeBody { current_size, max_size }
    }
}

/// Why a response could not be encoded.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("unsupported http version: {version:?}")]
    UnsupportedVersion { version: http::Version },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}
