//! Core HTTP protocol types shared by the codec and the session.
//!
//! - [`RequestHeader`]: wraps the parsed request line and headers
//! - [`PayloadItem`] / [`PayloadSize`]: body framing produced by the decoders
//! - [`ParseError`], [`SendError`]: decode and encode failures

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;
pub(crate) use request::is_keep_alive;

mod error;
pub use error::ParseError;
pub use error::SendError;
