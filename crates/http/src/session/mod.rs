//! HTTP session handling module
//!
//! A session owns one client stream and everything buffered for it. It is driven
//! from the outside, one step at a time, so the same code works on a worker thread
//! and on the reactor thread:
//!
//! 1. [`HttpSession::read`] pulls whatever the socket has
//! 2. [`HttpSession::parse`] tries to decode a complete request
//! 3. [`HttpSession::process`] runs the handler and encodes the response
//!    (or [`HttpSession::reject`] encodes a `400` after a parse error)
//! 4. [`HttpSession::write`] flushes the encoded response
//! 5. [`HttpSession::is_keep_alive`] decides whether the connection is reused

mod http_session;

pub use http_session::HttpSession;
pub use http_session::ParseStatus;
pub use http_session::ReadStatus;
pub use http_session::WriteStatus;
