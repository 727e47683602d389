//! Per-connection state owned by the reactor thread.
//!
//! A [`Connection`] holds its session while idle. When a task is dispatched the
//! session is moved into the task and the connection only keeps its
//! [`Generation`]; the task hands the session back in its completion. The
//! descriptor is owned by the session, so it is closed exactly once: when the
//! session is dropped on the reactor thread.

use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::RawFd;
use std::time::Instant;

use reactor_http::session::{ParseStatus, ReadStatus, WriteStatus};

use crate::poller::Interest;

/// The HTTP collaborator as seen by the reactor.
///
/// The reactor never looks at request content, it only reacts to these results.
#[cfg_attr(test, mockall::automock)]
pub trait Session: Send + 'static {
    fn read(&mut self, drain: bool) -> std::io::Result<ReadStatus>;

    fn parse(&mut self) -> ParseStatus;

    fn process(&mut self);

    /// Queues a best-effort error response for input that can't be parsed.
    fn reject(&mut self);

    fn write(&mut self, drain: bool) -> std::io::Result<WriteStatus>;

    fn is_keep_alive(&self) -> bool;

    fn has_buffered_input(&self) -> bool;

    /// Whether part of an encoded response is still waiting to be written.
    fn has_pending_output(&self) -> bool;
}

/// Creates sessions for accepted sockets.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    fn create(&self, stream: TcpStream, peer: SocketAddr) -> Self::Session;

    /// Bytes written to a connection refused because the table is full.
    fn busy_response(&self) -> &[u8] {
        &[]
    }
}

/// Identifies one incarnation of a descriptor. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reading,
    Processing,
    Writing,
}

#[derive(Debug)]
pub struct Connection<S> {
    generation: Generation,
    peer: SocketAddr,
    last_active: Instant,
    interest: Interest,
    phase: Phase,
    session: Option<S>,
}

impl<S> Connection<S> {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_active = now;
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// A task currently owns the session.
    pub fn is_in_flight(&self) -> bool {
        self.session.is_none()
    }

    /// Moves the session out for a task.
    pub fn take_session(&mut self) -> Option<S> {
        let session = self.session.take()?;
        self.phase = Phase::Processing;
        Some(session)
    }

    /// Gives the session back after a task, armed for `interest`.
    pub fn restore(&mut self, session: S, interest: Interest) {
        self.session = Some(session);
        self.set_interest(interest);
    }

    pub fn set_interest(&mut self, interest: Interest) {
        self.interest = interest;
        self.phase = if interest.is_writable() { Phase::Writing } else { Phase::Reading };
    }

    pub fn into_session(self) -> Option<S> {
        self.session
    }
}

/// Live connections by descriptor, bounded by a configured capacity.
#[derive(Debug)]
pub struct ConnectionTable<S> {
    connections: HashMap<RawFd, Connection<S>>,
    capacity: usize,
    next_generation: u64,
}

impl<S> ConnectionTable<S> {
    pub fn new(capacity: usize) -> Self {
        Self { connections: HashMap::new(), capacity, next_generation: 1 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.capacity
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.connections.contains_key(&fd)
    }

    /// Adds a freshly accepted connection, armed for reading, and returns its generation.
    ///
    /// Callers check [`is_full`](Self::is_full) first.
    pub fn insert(&mut self, fd: RawFd, peer: SocketAddr, session: S, now: Instant) -> Generation {
        let generation = Generation(self.next_generation);
        self.next_generation += 1;

        let connection = Connection {
            generation,
            peer,
            last_active: now,
            interest: Interest::READABLE,
            phase: Phase::Reading,
            session: Some(session),
        };
        self.connections.insert(fd, connection);
        generation
    }

    pub fn get(&self, fd: RawFd) -> Option<&Connection<S>> {
        self.connections.get(&fd)
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&fd)
    }

    /// Whether `fd` is still live in the given generation.
    pub fn is_current(&self, fd: RawFd, generation: Generation) -> bool {
        self.connections.get(&fd).is_some_and(|connection| connection.generation == generation)
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<Connection<S>> {
        self.connections.remove(&fd)
    }

    pub fn fds(&self) -> Vec<RawFd> {
        self.connections.keys().copied().collect()
    }
}
