//! The HTTP session driven by the reactor server
//!
//! This crate provides the per-connection HTTP/1.x state machine consumed by the
//! `reactor-server` event loop. Unlike an async connection it never blocks and never
//! owns a task: the reactor calls into it whenever the socket becomes readable or
//! writable, and the session reports what it needs next.
//!
//! # Architecture
//!
//! - [`codec`]: `httparse` based request decoding and response encoding, exposed
//!   through the `tokio_util` [`Decoder`](tokio_util::codec::Decoder) and
//!   [`Encoder`](tokio_util::codec::Encoder) traits
//! - [`protocol`]: request header wrapper, payload items and error types
//! - [`handler`]: synchronous request handlers, including a static file handler
//! - [`session`]: the [`session::HttpSession`] buffering state machine
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpStream;
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::{Request, Response, StatusCode};
//! use reactor_http::handler::make_handler;
//! use reactor_http::session::{HttpSession, ParseStatus};
//!
//! let handler = Arc::new(make_handler(|_req: Request<Bytes>| {
//!     Response::builder().status(StatusCode::OK).body(Bytes::from_static(b"Hello World!"))
//! }));
//!
//! let stream = TcpStream::connect("127.0.0.1:1316").unwrap();
//! let mut session = HttpSession::new(stream, handler);
//! session.read(true).unwrap();
//! if let ParseStatus::Complete = session.parse() {
//!     session.process();
//!     session.write(true).unwrap();
//! }
//! ```
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only
//! - Request bodies must be announced with `Content-Length`; chunked uploads are rejected
//! - Maximum header size: 8KB, maximum number of headers: 64, maximum body size: 1MB

pub mod codec;
pub mod handler;
pub mod protocol;
pub mod session;

mod utils;
pub(crate) use utils::ensure;
