//! Serving HTTP: plugs [`HttpSession`] into the reactor.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use reactor_http::handler::Handler;
use reactor_http::session::{HttpSession, ParseStatus, ReadStatus, WriteStatus};
use tracing::trace;

use crate::connection::{Session, SessionFactory};

const BUSY_RESPONSE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\ncontent-type: text/plain\r\ncontent-length: 12\r\nconnection: close\r\n\r\nServer busy!";

impl<H> Session for HttpSession<TcpStream, H>
where
    H: Handler + 'static,
{
    fn read(&mut self, drain: bool) -> io::Result<ReadStatus> {
        HttpSession::read(self, drain)
    }

    fn parse(&mut self) -> ParseStatus {
        HttpSession::parse(self)
    }

    fn process(&mut self) {
        HttpSession::process(self)
    }

    fn reject(&mut self) {
        HttpSession::reject(self)
    }

    fn write(&mut self, drain: bool) -> io::Result<WriteStatus> {
        HttpSession::write(self, drain)
    }

    fn is_keep_alive(&self) -> bool {
        HttpSession::is_keep_alive(self)
    }

    fn has_buffered_input(&self) -> bool {
        HttpSession::has_buffered_input(self)
    }

    fn has_pending_output(&self) -> bool {
        HttpSession::has_pending_output(self)
    }
}

/// Wraps every accepted socket in an [`HttpSession`] sharing one handler.
#[derive(Debug)]
pub struct HttpSessionFactory<H> {
    handler: Arc<H>,
}

impl<H> HttpSessionFactory<H> {
    pub fn new(handler: H) -> Self {
        Self { handler: Arc::new(handler) }
    }
}

impl<H> SessionFactory for HttpSessionFactory<H>
where
    H: Handler + 'static,
{
    type Session = HttpSession<TcpStream, H>;

    fn create(&self, stream: TcpStream, peer: SocketAddr) -> Self::Session {
        trace!(%peer, "new http session");
        HttpSession::new(stream, Arc::clone(&self.handler))
    }

    fn busy_response(&self) -> &[u8] {
        BUSY_RESPONSE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_response_length_matches_body() {
        let text = std::str::from_utf8(BUSY_RESPONSE).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("HTTP/1.1 503"));
        assert!(head.contains(&format!("content-length: {}", body.len())));
    }
}
