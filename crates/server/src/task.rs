//! Work units run against a session, inline or on a worker.
//!
//! [`run`] owns the session for the duration of the task and always hands it
//! back inside a [`Completion`], even when the collaborator panics, so the
//! reactor thread stays the only place where a session is dropped.

use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};

use reactor_http::session::{ParseStatus, ReadStatus, WriteStatus};
use tracing::{debug, error, trace};

use crate::connection::{Generation, Session};
use crate::poller::Interest;
use crate::pool::panic_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ReadAndProcess,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// the peer closed before a complete request arrived
    PeerClosed,
    /// the response was sent and the connection is not kept alive
    Finished,
    ParseError,
    Io,
    Panicked,
    Timeout,
    Hangup,
    Registration,
    Shutdown,
}

/// What the reactor should do with the connection once a task is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Arm(Interest),
    Close(CloseReason),
}

#[derive(Debug)]
pub struct Task<S> {
    pub fd: RawFd,
    pub generation: Generation,
    pub op: Op,
    pub session: S,
    /// read and write until `WouldBlock`, required for edge-triggered sockets
    pub drain: bool,
}

#[derive(Debug)]
pub struct Completion<S> {
    pub fd: RawFd,
    pub generation: Generation,
    pub session: S,
    pub outcome: Outcome,
}

/// Runs `task`, turning a panic into `Close(Panicked)`.
pub fn run<S: Session>(task: Task<S>) -> Completion<S> {
    let Task { fd, generation, op, mut session, drain } = task;

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| drive(&mut session, op, drain))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            error!(fd, %generation, cause = panic_message(payload.as_ref()), "session panicked");
            Outcome::Close(CloseReason::Panicked)
        }
    };

    trace!(fd, %generation, ?op, ?outcome, "task finished");
    Completion { fd, generation, session, outcome }
}

/// Maps the collaborator's results for one readiness notification to an outcome.
///
/// Pending output is always flushed first, whatever the notification was.
pub fn drive<S: Session + ?Sized>(session: &mut S, op: Op, drain: bool) -> Outcome {
    let op = if session.has_pending_output() { Op::Write } else { op };
    let eof = match op {
        Op::ReadAndProcess => match session.read(drain) {
            Ok(ReadStatus::Received { eof, .. }) => eof,
            Ok(ReadStatus::WouldBlock) => false,
            Err(e) => {
                debug!(cause = %e, "read failed");
                return Outcome::Close(CloseReason::Io);
            }
        },
        Op::Write => match after_write(session, drain) {
            Some(outcome) => return outcome,
            None => false,
        },
    };

    serve_buffered(session, eof, drain)
}

/// Handles every complete request already buffered, in order.
fn serve_buffered<S: Session + ?Sized>(session: &mut S, eof: bool, drain: bool) -> Outcome {
    loop {
        match session.parse() {
            ParseStatus::NeedMoreData if eof => return Outcome::Close(CloseReason::PeerClosed),
            ParseStatus::NeedMoreData => return Outcome::Arm(Interest::READABLE),
            ParseStatus::Invalid(e) => {
                debug!(cause = %e, "malformed request");
                session.reject();
                if let Err(e) = session.write(drain) {
                    debug!(cause = %e, "can't send error response");
                }
                return Outcome::Close(CloseReason::ParseError);
            }
            ParseStatus::Complete => {
                session.process();
                if let Some(outcome) = after_write(session, drain) {
                    return outcome;
                }
            }
        }
    }
}

/// Flushes the pending response.
///
/// `None` means the response is out, the connection stays open and another
/// request is already buffered.
fn after_write<S: Session + ?Sized>(session: &mut S, drain: bool) -> Option<Outcome> {
    match session.write(drain) {
        Ok(WriteStatus::WouldBlock { remaining }) => {
            trace!(remaining, "response partially written");
            Some(Outcome::Arm(Interest::WRITABLE))
        }
        Ok(WriteStatus::Flushed) if !session.is_keep_alive() => Some(Outcome::Close(CloseReason::Finished)),
        Ok(WriteStatus::Flushed) if session.has_buffered_input() => None,
        Ok(WriteStatus::Flushed) => Some(Outcome::Arm(Interest::READABLE)),
        Err(e) => {
            debug!(cause = %e, "write failed");
            Some(Outcome::Close(CloseReason::Io))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionTable, MockSession};
    use mockall::Sequence;
    use reactor_http::protocol::ParseError;
    use std::io;
    use std::time::Instant;

    fn idle_session() -> MockSession {
        let mut session = MockSession::new();
        session.expect_has_pending_output().return_const(false);
        session
    }

    fn received(bytes: usize, eof: bool) -> io::Result<ReadStatus> {
        Ok(ReadStatus::Received { bytes, eof })
    }

    #[test]
    fn incomplete_request_keeps_reading() {
        let mut session = idle_session();
        session.expect_read().returning(|_| received(10, false));
        session.expect_parse().returning(|| ParseStatus::NeedMoreData);

        assert_eq!(drive(&mut session, Op::ReadAndProcess, true), Outcome::Arm(Interest::READABLE));
    }

    #[test]
    fn keep_alive_response_written_inline_rearms_read() {
        let mut session = idle_session();
        let mut seq = Sequence::new();
        session.expect_read().times(1).in_sequence(&mut seq).returning(|_| received(40, false));
        session.expect_parse().times(1).in_sequence(&mut seq).returning(|| ParseStatus::Complete);
        session.expect_process().times(1).in_sequence(&mut seq).return_const(());
        session.expect_write().times(1).in_sequence(&mut seq).returning(|_| Ok(WriteStatus::Flushed));
        session.expect_is_keep_alive().return_const(true);
        session.expect_has_buffered_input().return_const(false);

        assert_eq!(drive(&mut session, Op::ReadAndProcess, true), Outcome::Arm(Interest::READABLE));
    }

    #[test]
    fn pending_output_switches_to_write() {
        let mut session = idle_session();
        session.expect_read().returning(|_| received(40, false));
        session.expect_parse().returning(|| ParseStatus::Complete);
        session.expect_process().return_const(());
        session.expect_write().returning(|_| Ok(WriteStatus::WouldBlock { remaining: 100 }));

        assert_eq!(drive(&mut session, Op::ReadAndProcess, false), Outcome::Arm(Interest::WRITABLE));
    }

    #[test]
    fn flushed_without_keep_alive_closes() {
        let mut session = idle_session();
        session.expect_write().returning(|_| Ok(WriteStatus::Flushed));
        session.expect_is_keep_alive().return_const(false);

        assert_eq!(drive(&mut session, Op::Write, true), Outcome::Close(CloseReason::Finished));
    }

    #[test]
    fn parse_error_rejects_and_closes() {
        let mut session = idle_session();
        session.expect_read().returning(|_| received(5, false));
        session.expect_parse().returning(|| ParseStatus::Invalid(ParseError::InvalidMethod));
        session.expect_reject().times(1).return_const(());
        session.expect_write().times(1).returning(|_| Ok(WriteStatus::Flushed));

        assert_eq!(drive(&mut session, Op::ReadAndProcess, true), Outcome::Close(CloseReason::ParseError));
    }

    #[test]
    fn peer_closed_before_request_closes() {
        let mut session = idle_session();
        session.expect_read().returning(|_| received(0, true));
        session.expect_parse().returning(|| ParseStatus::NeedMoreData);

        assert_eq!(drive(&mut session, Op::ReadAndProcess, true), Outcome::Close(CloseReason::PeerClosed));
    }

    #[test]
    fn pending_output_is_written_before_reading() {
        let mut session = MockSession::new();
        session.expect_has_pending_output().return_const(true);
        session.expect_read().never();
        session.expect_write().times(1).returning(|_| Ok(WriteStatus::WouldBlock { remaining: 4096 }));

        assert_eq!(drive(&mut session, Op::ReadAndProcess, true), Outcome::Arm(Interest::WRITABLE));
    }

    #[test]
    fn pending_output_after_half_close_is_flushed_then_closed() {
        let mut session = MockSession::new();
        session.expect_has_pending_output().return_const(true);
        session.expect_read().never();
        session.expect_write().times(1).returning(|_| Ok(WriteStatus::Flushed));
        session.expect_is_keep_alive().return_const(false);

        assert_eq!(drive(&mut session, Op::ReadAndProcess, false), Outcome::Close(CloseReason::Finished));
    }

    #[test]
    fn read_error_closes() {
        let mut session = idle_session();
        session.expect_read().returning(|_| Err(io::Error::from(io::ErrorKind::ConnectionReset)));

        assert_eq!(drive(&mut session, Op::ReadAndProcess, true), Outcome::Close(CloseReason::Io));
    }

    #[test]
    fn pipelined_requests_are_served_after_flush() {
        let mut session = idle_session();
        let mut seq = Sequence::new();
        session.expect_write().times(1).in_sequence(&mut seq).returning(|_| Ok(WriteStatus::Flushed));
        session.expect_parse().times(1).in_sequence(&mut seq).returning(|| ParseStatus::Complete);
        session.expect_process().times(1).in_sequence(&mut seq).return_const(());
        session.expect_write().times(1).in_sequence(&mut seq).returning(|_| Ok(WriteStatus::Flushed));
        session.expect_is_keep_alive().return_const(true);

        let mut buffered = [true, false].into_iter();
        session.expect_has_buffered_input().returning(move || buffered.next().unwrap_or(false));

        assert_eq!(drive(&mut session, Op::Write, true), Outcome::Arm(Interest::READABLE));
    }

    struct PanickingSession;

    impl Session for PanickingSession {
        fn read(&mut self, _drain: bool) -> io::Result<ReadStatus> {
            panic!("collaborator bug")
        }

        fn parse(&mut self) -> ParseStatus {
            ParseStatus::NeedMoreData
        }

        fn process(&mut self) {}

        fn reject(&mut self) {}

        fn write(&mut self, _drain: bool) -> io::Result<WriteStatus> {
            Ok(WriteStatus::Flushed)
        }

        fn is_keep_alive(&self) -> bool {
            false
        }

        fn has_buffered_input(&self) -> bool {
            false
        }

        fn has_pending_output(&self) -> bool {
            false
        }
    }

    #[test]
    fn panic_is_reported_with_session_returned() {
        let mut table = ConnectionTable::new(1);
        let generation = table.insert(5, "127.0.0.1:1".parse().unwrap(), (), Instant::now());

        let task = Task { fd: 5, generation, op: Op::ReadAndProcess, session: PanickingSession, drain: true };
        let completion = run(task);

        assert_eq!(completion.fd, 5);
        assert_eq!(completion.generation, generation);
        assert_eq!(completion.outcome, Outcome::Close(CloseReason::Panicked));
    }
}
