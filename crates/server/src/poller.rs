//! A thin wrapper over a single `epoll` instance.
//!
//! Ready events are copied out of the kernel buffer into an internal queue by
//! [`Poller::wait`] and handed out one by one through [`Poller::next_ready`].
//! Removing a descriptor also drops its queued events, so a descriptor that was
//! deregistered is never reported afterwards.

use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::trace;

use crate::error::PollerError;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// The readiness a descriptor is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest {
    readable: bool,
    writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const WRITABLE: Interest = Interest { readable: false, writable: true };
    pub const BOTH: Interest = Interest { readable: true, writable: true };

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// `EPOLLRDHUP` only comes with read interest: a half-closed peer must not
    /// wake a socket that is waiting to flush a response.
    fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.readable {
            bits |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
        }
        if self.writable {
            bits |= libc::EPOLLOUT as u32;
        }
        bits
    }
}

/// How readiness is reported for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// reported once per readiness transition, the caller drains until `WouldBlock`
    Edge,
    /// reported on every wait while the condition holds
    Level,
}

impl Trigger {
    /// Whether a caller must drain the descriptor before waiting again.
    pub fn must_drain(&self) -> bool {
        matches!(self, Trigger::Edge)
    }
}

/// A single readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    fd: RawFd,
    flags: u32,
}

impl Event {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_readable(&self) -> bool {
        self.flags & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.flags & libc::EPOLLOUT as u32 != 0
    }

    pub fn is_hangup(&self) -> bool {
        self.flags & libc::EPOLLHUP as u32 != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & libc::EPOLLERR as u32 != 0
    }

    /// The peer shut down its writing half.
    pub fn is_read_hangup(&self) -> bool {
        self.flags & libc::EPOLLRDHUP as u32 != 0
    }
}

pub struct Poller {
    epoll: OwnedFd,
    events: Vec<libc::epoll_event>,
    ready: VecDeque<Event>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("epoll", &self.epoll)
            .field("capacity", &self.events.len())
            .field("ready", &self.ready)
            .finish()
    }
}

impl Poller {
    pub fn new() -> Result<Self, PollerError> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a poller that collects at most `capacity` events per wait.
    pub fn with_capacity(capacity: usize) -> Result<Self, PollerError> {
        // SAFETY: epoll_create1 has no memory preconditions, the result is checked below.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };

        let capacity = capacity.max(1);
        Ok(Self { epoll, events: vec![libc::epoll_event { events: 0, u64: 0 }; capacity], ready: VecDeque::new() })
    }

    /// Registers `fd`; fails with a registration error if it is already registered.
    pub fn add(&mut self, fd: RawFd, interest: Interest, trigger: Trigger, oneshot: bool) -> Result<(), PollerError> {
        self.ctl(libc::EPOLL_CTL_ADD, "add", fd, flags(interest, trigger, oneshot))
    }

    /// Changes the interest of a registered `fd`, re-arming it if it was one-shot.
    pub fn modify(&mut self, fd: RawFd, interest: Interest, trigger: Trigger, oneshot: bool) -> Result<(), PollerError> {
        self.ctl(libc::EPOLL_CTL_MOD, "modify", fd, flags(interest, trigger, oneshot))
    }

    /// Deregisters `fd` and forgets every event queued for it.
    pub fn remove(&mut self, fd: RawFd) -> Result<(), PollerError> {
        self.ready.retain(|event| event.fd != fd);
        self.ctl(libc::EPOLL_CTL_DEL, "remove", fd, 0)
    }

    /// Blocks until a registered descriptor is ready or `timeout` elapses.
    ///
    /// `None` blocks indefinitely. Sub-millisecond timeouts are rounded up so a
    /// pending deadline never turns into a busy loop. Returns the number of new
    /// events, `0` on timeout or when interrupted by a signal.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<usize, PollerError> {
        let timeout_ms = match timeout {
            Some(timeout) => timeout.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
            None => -1,
        };

        let max_events = self.events.len().min(i32::MAX as usize) as i32;
        // SAFETY: the buffer holds `max_events` initialized entries and lives for the call.
        let n = unsafe { libc::epoll_wait(self.epoll.as_raw_fd(), self.events.as_mut_ptr(), max_events, timeout_ms) };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(e.into());
        }

        let n = n as usize;
        for event in &self.events[..n] {
            let (flags, data) = (event.events, event.u64);
            self.ready.push_back(Event { fd: data as RawFd, flags });
        }
        trace!(events = n, timeout_ms, "poller woke up");
        Ok(n)
    }

    /// Pops the next queued event in the order the kernel reported it.
    pub fn next_ready(&mut self) -> Option<Event> {
        self.ready.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    fn ctl(&mut self, op: libc::c_int, name: &'static str, fd: RawFd, events: u32) -> Result<(), PollerError> {
        let mut event = libc::epoll_event { events, u64: fd as u64 };
        // SAFETY: `event` outlives the call; the kernel ignores it for EPOLL_CTL_DEL.
        let rc = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc == 0 {
            return Ok(());
        }

        let e = io::Error::last_os_error();
        match e.raw_os_error() {
            Some(libc::EEXIST) | Some(libc::ENOENT) => Err(PollerError::registration(fd, name, e)),
            _ => Err(PollerError::Io { source: e }),
        }
    }
}

fn flags(interest: Interest, trigger: Trigger, oneshot: bool) -> u32 {
    let mut bits = interest.bits();
    if trigger == Trigger::Edge {
        bits |= libc::EPOLLET as u32;
    }
    if oneshot {
        bits |= libc::EPOLLONESHOT as u32;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    const TICK: Option<Duration> = Some(Duration::from_millis(50));

    fn drain_events(poller: &mut Poller) -> Vec<Event> {
        std::iter::from_fn(|| poller.next_ready()).collect()
    }

    #[test]
    fn reports_readable() {
        let mut poller = Poller::new().unwrap();
        let (mut a, b) = UnixStream::pair().unwrap();
        poller.add(b.as_raw_fd(), Interest::READABLE, Trigger::Level, false).unwrap();

        assert_eq!(poller.wait(Some(Duration::ZERO)).unwrap(), 0);

        a.write_all(b"ping").unwrap();
        assert_eq!(poller.wait(TICK).unwrap(), 1);
        let event = poller.next_ready().unwrap();
        assert_eq!(event.fd(), b.as_raw_fd());
        assert!(event.is_readable());
        assert!(!event.is_writable());
    }

    #[test]
    fn double_add_is_registration_error() {
        let mut poller = Poller::new().unwrap();
        let (_a, b) = UnixStream::pair().unwrap();
        poller.add(b.as_raw_fd(), Interest::READABLE, Trigger::Level, false).unwrap();

        let err = poller.add(b.as_raw_fd(), Interest::READABLE, Trigger::Level, false).unwrap_err();
        assert!(err.is_registration());
    }

    #[test]
    fn modify_unregistered_is_registration_error() {
        let mut poller = Poller::new().unwrap();
        let (_a, b) = UnixStream::pair().unwrap();

        assert!(poller.modify(b.as_raw_fd(), Interest::WRITABLE, Trigger::Level, false).unwrap_err().is_registration());
        assert!(poller.remove(b.as_raw_fd()).unwrap_err().is_registration());
    }

    #[test]
    fn removed_fd_is_never_delivered() {
        let mut poller = Poller::new().unwrap();
        let (mut a1, b1) = UnixStream::pair().unwrap();
        let (mut a2, b2) = UnixStream::pair().unwrap();
        poller.add(b1.as_raw_fd(), Interest::READABLE, Trigger::Level, false).unwrap();
        poller.add(b2.as_raw_fd(), Interest::READABLE, Trigger::Level, false).unwrap();

        a1.write_all(b"1").unwrap();
        a2.write_all(b"2").unwrap();
        assert_eq!(poller.wait(TICK).unwrap(), 2);
        assert_eq!(poller.pending(), 2);

        poller.remove(b1.as_raw_fd()).unwrap();
        let events = drain_events(&mut poller);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd(), b2.as_raw_fd());

        poller.wait(TICK).unwrap();
        assert!(drain_events(&mut poller).iter().all(|event| event.fd() != b1.as_raw_fd()));
    }

    #[test]
    fn edge_reports_once_level_repeats() {
        let mut poller = Poller::new().unwrap();
        let (mut a1, edge) = UnixStream::pair().unwrap();
        let (mut a2, level) = UnixStream::pair().unwrap();
        poller.add(edge.as_raw_fd(), Interest::READABLE, Trigger::Edge, false).unwrap();
        poller.add(level.as_raw_fd(), Interest::READABLE, Trigger::Level, false).unwrap();

        a1.write_all(b"x").unwrap();
        a2.write_all(b"x").unwrap();
        poller.wait(TICK).unwrap();
        assert_eq!(drain_events(&mut poller).len(), 2);

        poller.wait(Some(Duration::from_millis(10))).unwrap();
        let events = drain_events(&mut poller);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd(), level.as_raw_fd());
    }

    #[test]
    fn oneshot_needs_rearm() {
        let mut poller = Poller::new().unwrap();
        let (mut a, b) = UnixStream::pair().unwrap();
        poller.add(b.as_raw_fd(), Interest::READABLE, Trigger::Level, true).unwrap();

        a.write_all(b"x").unwrap();
        assert_eq!(poller.wait(TICK).unwrap(), 1);
        drain_events(&mut poller);
        assert_eq!(poller.wait(Some(Duration::from_millis(10))).unwrap(), 0);

        poller.modify(b.as_raw_fd(), Interest::READABLE, Trigger::Level, true).unwrap();
        assert_eq!(poller.wait(TICK).unwrap(), 1);
    }

    #[test]
    fn peer_close_sets_read_hangup() {
        let mut poller = Poller::new().unwrap();
        let (a, b) = UnixStream::pair().unwrap();
        poller.add(b.as_raw_fd(), Interest::READABLE, Trigger::Level, false).unwrap();

        drop(a);
        poller.wait(TICK).unwrap();
        let event = poller.next_ready().unwrap();
        assert!(event.is_read_hangup());
    }

    #[test]
    fn half_close_does_not_wake_write_interest() {
        let mut poller = Poller::new().unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        // fill the send buffer so the socket is not writable
        let chunk = [0u8; 64 * 1024];
        while b.write(&chunk).is_ok() {}
        poller.add(b.as_raw_fd(), Interest::WRITABLE, Trigger::Level, true).unwrap();

        a.shutdown(std::net::Shutdown::Write).unwrap();
        assert_eq!(poller.wait(Some(Duration::from_millis(20))).unwrap(), 0);
        drop(a);
    }

    #[test]
    fn writable_interest() {
        let mut poller = Poller::new().unwrap();
        let (_a, b) = UnixStream::pair().unwrap();
        poller.add(b.as_raw_fd(), Interest::WRITABLE, Trigger::Edge, false).unwrap();

        poller.wait(TICK).unwrap();
        assert!(poller.next_ready().unwrap().is_writable());
    }
}
