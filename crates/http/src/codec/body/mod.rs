//! HTTP request body decoding.
//!
//! Only `Content-Length` framed bodies are supported: [`LengthDecoder`] hands out
//! payload chunks until the announced length has been consumed.

mod length_decoder;

pub use length_decoder::LengthDecoder;
