use std::error::Error;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONNECTION, HeaderValue};
use http::{Method, Request, Response, StatusCode, Version};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, trace, warn};

use crate::codec::{MAX_REQUEST_BYTES, RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::{ParseError, is_keep_alive};

const READ_CHUNK_SIZE: usize = 4 * 1024;
const INIT_BUFFER_SIZE: usize = 8 * 1024;

/// Result of pulling bytes from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `bytes` were appended to the input buffer; `eof` is set when the peer
    /// closed its write side.
    Received { bytes: usize, eof: bool },
    /// Nothing was available, wait for the next readiness notification.
    WouldBlock,
}

/// Result of trying to decode the buffered input.
#[derive(Debug)]
pub enum ParseStatus {
    NeedMoreData,
    Complete,
    Invalid(ParseError),
}

/// Result of flushing the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Flushed,
    WouldBlock { remaining: usize },
}

/// The per-connection HTTP state machine.
///
/// # Type Parameters
///
/// * `S`: the (non-blocking) stream, usually a `TcpStream`
/// * `H`: the request handler shared by every session
#[derive(Debug)]
pub struct HttpSession<S, H> {
    stream: S,
    handler: Arc<H>,
    decoder: RequestDecoder,
    encoder: ResponseEncoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    request: Option<Request<Bytes>>,
    keep_alive: bool,
    peer_closed: bool,
}

impl<S, H> HttpSession<S, H>
where
    S: Read + Write,
    H: Handler,
{
    pub fn new(stream: S, handler: Arc<H>) -> Self {
        Self {
            stream,
            handler,
            decoder: RequestDecoder::new(),
            encoder: ResponseEncoder::new(),
            read_buf: BytesMut::with_capacity(INIT_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(INIT_BUFFER_SIZE),
            request: None,
            keep_alive: false,
            peer_closed: false,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Reads from the stream into the input buffer.
    ///
    /// With `drain` set the stream is read until it would block (required for
    /// edge-triggered notification); otherwise a single read is issued. Draining
    /// also stops once more than one maximal request is buffered, so the decoder
    /// gets to enforce its limits first.
    pub fn read(&mut self, drain: bool) -> io::Result<ReadStatus> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut total = 0;

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    trace!(bytes = total, "peer closed its write side");
                    self.peer_closed = true;
                    return Ok(ReadStatus::Received { bytes: total, eof: true });
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    total += n;
                    if !drain || self.read_buf.len() > MAX_REQUEST_BYTES {
                        return Ok(ReadStatus::Received { bytes: total, eof: false });
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Ok(if total == 0 {
                        ReadStatus::WouldBlock
                    } else {
                        ReadStatus::Received { bytes: total, eof: false }
                    });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Tries to decode a complete request from the input buffer.
    ///
    /// A decoded request stays pending until [`process`](Self::process) consumes it,
    /// so calling `parse` again returns `Complete` without touching the buffer.
    pub fn parse(&mut self) -> ParseStatus {
        if self.request.is_some() {
            return ParseStatus::Complete;
        }

        match self.decoder.decode(&mut self.read_buf) {
            Ok(Some(request)) => {
                debug!(method = %request.method(), path = request.uri().path(), "decoded request");
                self.request = Some(request);
                ParseStatus::Complete
            }
            Ok(None) => ParseStatus::NeedMoreData,
            Err(e) => {
                warn!(cause = %e, "can't decode request");
                ParseStatus::Invalid(e)
            }
        }
    }

    /// Runs the handler for the pending request and encodes its response.
    pub fn process(&mut self) {
        let Some(request) = self.request.take() else {
            error!("process called without a complete request");
            return;
        };

        let version = request.version();
        let is_head = request.method() == Method::HEAD;
        let keep_alive = !self.peer_closed && is_keep_alive(version, request.headers());

        let response = match self.handler.call(request) {
            Ok(response) => response,
            Err(e) => {
                let e: Box<dyn Error + Send + Sync> = e.into();
                error!(cause = %e, "handle request error");
                build_error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        let response = if is_head { strip_body(response) } else { response };
        self.respond(response, version, keep_alive);
    }

    /// Encodes a best-effort `400 Bad Request` and gives up on the connection.
    ///
    /// Whatever was buffered is discarded since it can't be framed anymore.
    pub fn reject(&mut self) {
        self.read_buf.clear();
        self.request = None;
        self.decoder = RequestDecoder::new();
        self.respond(build_error_response(StatusCode::BAD_REQUEST), Version::HTTP_11, false);
    }

    /// Writes the encoded output to the stream.
    ///
    /// With `drain` unset a single write is issued and any rest is reported as
    /// `WouldBlock`.
    pub fn write(&mut self, drain: bool) -> io::Result<WriteStatus> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => {
                    self.write_buf.advance(n);
                    if !drain && !self.write_buf.is_empty() {
                        return Ok(WriteStatus::WouldBlock { remaining: self.write_buf.len() });
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Ok(WriteStatus::WouldBlock { remaining: self.write_buf.len() });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.stream.flush()?;
        Ok(WriteStatus::Flushed)
    }

    /// Whether the connection should be reused once the current response is flushed.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive && !self.peer_closed
    }

    /// Whether bytes of a following (pipelined) request are already buffered.
    pub fn has_buffered_input(&self) -> bool {
        self.request.is_some() || !self.read_buf.is_empty()
    }

    pub fn has_pending_output(&self) -> bool {
        !self.write_buf.is_empty()
    }

    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    fn respond(&mut self, mut response: Response<Bytes>, version: Version, keep_alive: bool) {
        *response.version_mut() = version;
        let connection = if keep_alive { HeaderValue::from_static("keep-alive") } else { HeaderValue::from_static("close") };
        response.headers_mut().insert(CONNECTION, connection);

        match self.encoder.encode(response, &mut self.write_buf) {
            Ok(()) => self.keep_alive = keep_alive,
            Err(e) => {
                error!(cause = %e, "can't encode response, connection will be closed");
                self.keep_alive = false;
            }
        }
    }
}

fn strip_body(response: Response<Bytes>) -> Response<Bytes> {
    let (mut parts, body) = response.into_parts();
    parts.headers.entry(http::header::CONTENT_LENGTH).or_insert_with(|| HeaderValue::from(body.len()));
    Response::from_parts(parts, Bytes::new())
}

fn build_error_response(status_code: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status_code;
    response
}
