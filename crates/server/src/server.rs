//! The reactor loop.
//!
//! One thread owns the listening socket, the poller, the connection table and the
//! timer heap. Each iteration of [`Server::turn`]:
//!
//! 1. waits on the poller, bounded by the earliest idle deadline
//! 2. evicts every connection whose deadline passed
//! 3. applies the completions handed back by finished tasks
//! 4. dispatches the ready events in kernel order
//!
//! Client sockets are registered one-shot, so at most one task per connection
//! exists at a time; the socket is re-armed when the task's completion is applied.
//! A completion whose generation no longer matches the table belongs to a
//! connection that was closed meanwhile and is discarded.

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, info, trace, warn};

use crate::config::{Dispatch, ServerConfig};
use crate::connection::{ConnectionTable, Generation, SessionFactory};
use crate::error::ServerError;
use crate::poller::{Event, Interest, Poller, Trigger};
use crate::pool::WorkerPool;
use crate::task::{self, CloseReason, Completion, Op, Outcome, Task};
use crate::timer::TimerHeap;
use crate::waker::Waker;

/// Counters updated by the reactor thread, readable from anywhere.
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    closed: AtomicU64,
    dispatched: AtomicU64,
    stale_completions: AtomicU64,
    panicked: AtomicU64,
}

macro_rules! counters {
    ($($name:ident),* $(,)?) => {
        impl ServerStats {
            $(
                pub fn $name(&self) -> u64 {
                    self.$name.load(Ordering::Relaxed)
                }
            )*
        }
    };
}

counters!(accepted, rejected, evicted, closed, dispatched, stale_completions, panicked);

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Asks a running server to stop. Cheap to clone and usable from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    closing: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.closing.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            error!(cause = %e, "can't wake the reactor for shutdown");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

pub struct Server<F: SessionFactory> {
    config: ServerConfig,
    dispatch: Dispatch,
    factory: F,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    poller: Poller,
    waker: Arc<Waker>,
    pool: Option<WorkerPool>,
    table: ConnectionTable<F::Session>,
    timer: TimerHeap<Generation>,
    completion_tx: Sender<Completion<F::Session>>,
    completion_rx: Receiver<Completion<F::Session>>,
    closing: Arc<AtomicBool>,
    stats: Arc<ServerStats>,
}

impl<F: SessionFactory> std::fmt::Debug for Server<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("dispatch", &self.dispatch)
            .field("connections", &self.table.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl<F: SessionFactory> Server<F> {
    /// Binds the listening socket and starts the worker pool if tasks run on it.
    pub fn bind(config: ServerConfig, factory: F) -> Result<Self, ServerError> {
        config.validate()?;
        let dispatch = config.dispatch();

        let listener = TcpListener::bind(config.addr).map_err(|source| ServerError::Bind { addr: config.addr, source })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let mut poller = Poller::new()?;
        poller.add(listener.as_raw_fd(), Interest::READABLE, config.triggers.listener, false)?;

        let waker = Arc::new(Waker::new()?);
        poller.add(waker.as_raw_fd(), Interest::READABLE, Trigger::Edge, false)?;

        let pool = match dispatch {
            Dispatch::Pool => Some(WorkerPool::new(config.workers)?),
            Dispatch::Inline => None,
        };

        let (completion_tx, completion_rx) = channel::unbounded();
        info!(
            %local_addr,
            listener = ?config.triggers.listener,
            client = ?config.triggers.client,
            ?dispatch,
            idle_timeout_ms = config.idle_timeout.map(|t| t.as_millis() as u64),
            "server bound"
        );

        Ok(Self {
            table: ConnectionTable::new(config.max_connections),
            timer: TimerHeap::with_capacity(config.max_connections.min(1024)),
            config,
            dispatch,
            factory,
            listener: Some(listener),
            local_addr,
            poller,
            waker,
            pool,
            completion_tx,
            completion_rx,
            closing: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ServerStats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { closing: Arc::clone(&self.closing), waker: Arc::clone(&self.waker) }
    }

    /// Runs until shutdown is requested, then stops gracefully.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "server started");
        let result = self.run_loop();
        self.stop();
        result
    }

    fn run_loop(&mut self) -> Result<(), ServerError> {
        while !self.closing.load(Ordering::Acquire) {
            self.turn(None)?;
        }
        Ok(())
    }

    /// Runs one iteration of the loop, waiting at most `timeout` (and never past
    /// the earliest idle deadline).
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        let deadline_wait = self.timer.next_timeout(Instant::now());
        let wait = match (timeout, deadline_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.poller.wait(wait)?;

        self.expire(Instant::now());
        self.apply_completions();

        while let Some(event) = self.poller.next_ready() {
            self.handle_event(event);
        }
        Ok(())
    }

    fn expire(&mut self, now: Instant) {
        let mut expired = Vec::new();
        self.timer.expire_due(now, |fd, generation| expired.push((fd, generation)));

        for (fd, generation) in expired {
            if !self.table.is_current(fd, generation) {
                continue;
            }
            debug!(fd, %generation, "connection idle for too long");
            bump(&self.stats.evicted);
            self.close(fd, CloseReason::Timeout);
        }
    }

    fn handle_event(&mut self, event: Event) {
        let fd = event.fd();
        if self.listener.as_ref().is_some_and(|listener| listener.as_raw_fd() == fd) {
            self.accept();
        } else if fd == self.waker.as_raw_fd() {
            if let Err(e) = self.waker.drain() {
                warn!(cause = %e, "can't reset the waker");
            }
            self.apply_completions();
        } else {
            self.handle_client(event);
        }
    }

    fn accept(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };

            match listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(cause = %e, "accept failed");
                    return;
                }
            }

            if !self.config.triggers.listener.must_drain() {
                return;
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(cause = %e, %peer, "can't make accepted socket non-blocking");
            return;
        }

        if self.table.is_full() {
            bump(&self.stats.rejected);
            warn!(%peer, capacity = self.table.capacity(), "connection table full, refusing connection");
            let busy = self.factory.busy_response();
            if !busy.is_empty()
                && let Err(e) = stream.write_all(busy)
            {
                debug!(cause = %e, %peer, "can't send busy response");
            }
            return;
        }

        let fd = stream.as_raw_fd();
        let session = self.factory.create(stream, peer);
        let generation = self.table.insert(fd, peer, session, Instant::now());

        if let Err(e) = self.poller.add(fd, Interest::READABLE, self.config.triggers.client, true) {
            error!(cause = %e, fd, %peer, "can't register accepted socket");
            self.table.remove(fd);
            return;
        }
        if let Some(idle) = self.config.idle_timeout {
            self.timer.add(fd, idle, generation);
        }

        bump(&self.stats.accepted);
        debug!(fd, %generation, %peer, "connection accepted");
    }

    fn handle_client(&mut self, event: Event) {
        let fd = event.fd();
        let Some(connection) = self.table.get_mut(fd) else {
            trace!(fd, "event for unknown fd");
            return;
        };
        if connection.is_in_flight() {
            return;
        }

        let interest = connection.interest();
        let op = if event.is_error() {
            self.close(fd, CloseReason::Hangup);
            return;
        } else if interest.is_writable() {
            // a response is still pending, a half-closed peer can still receive it
            if event.is_writable() || event.is_read_hangup() {
                Op::Write
            } else if event.is_hangup() {
                self.close(fd, CloseReason::Hangup);
                return;
            } else {
                self.arm(fd, interest);
                return;
            }
        } else if event.is_readable() || event.is_read_hangup() {
            // a half-closed peer may still have sent a request, read it first
            Op::ReadAndProcess
        } else if event.is_hangup() {
            self.close(fd, CloseReason::Hangup);
            return;
        } else {
            self.arm(fd, interest);
            return;
        };

        let now = Instant::now();
        connection.touch(now);
        let generation = connection.generation();
        let Some(session) = connection.take_session() else {
            return;
        };

        if let Some(idle) = self.config.idle_timeout
            && let Err(e) = self.timer.refresh_at(fd, now + idle)
        {
            warn!(cause = %e, fd, "connection without idle timer");
        }

        bump(&self.stats.dispatched);
        let task = Task { fd, generation, op, session, drain: self.config.triggers.client.must_drain() };
        self.submit(task);
    }

    fn submit(&mut self, task: Task<F::Session>) {
        let (fd, generation) = (task.fd, task.generation);
        match self.pool.as_ref() {
            Some(pool) => {
                let tx = self.completion_tx.clone();
                let waker = Arc::clone(&self.waker);
                let submitted = pool.submit(move || {
                    if tx.send(task::run(task)).is_ok()
                        && let Err(e) = waker.wake()
                    {
                        error!(cause = %e, "can't wake the reactor");
                    }
                });
                if let Err(e) = submitted {
                    error!(cause = %e, fd, %generation, "can't submit task");
                    self.close(fd, CloseReason::Shutdown);
                }
            }
            None => {
                let completion = task::run(task);
                self.complete(completion);
            }
        }
    }

    fn apply_completions(&mut self) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.complete(completion);
        }
    }

    fn complete(&mut self, completion: Completion<F::Session>) {
        let Completion { fd, generation, session, outcome } = completion;

        let Some(connection) = self.table.get_mut(fd).filter(|connection| connection.generation() == generation) else {
            bump(&self.stats.stale_completions);
            debug!(fd, %generation, ?outcome, "discarding completion of a closed connection");
            drop(session);
            return;
        };

        match outcome {
            Outcome::Arm(interest) => {
                connection.restore(session, interest);
                self.arm(fd, interest);
            }
            Outcome::Close(reason) => {
                if reason == CloseReason::Panicked {
                    bump(&self.stats.panicked);
                }
                connection.restore(session, connection.interest());
                self.close(fd, reason);
            }
        }
    }

    fn arm(&mut self, fd: RawFd, interest: Interest) {
        if let Err(e) = self.poller.modify(fd, interest, self.config.triggers.client, true) {
            warn!(cause = %e, fd, "can't re-arm connection");
            self.close(fd, CloseReason::Registration);
        }
    }

    /// Deregisters, drops the timer, erases the table entry and closes the socket,
    /// in that order. Closing an unknown descriptor is a no-op.
    ///
    /// A connection whose session is out on a task only loses its table entry here;
    /// the socket is closed when the stale completion comes back.
    fn close(&mut self, fd: RawFd, reason: CloseReason) {
        if !self.table.contains(fd) {
            return;
        }
        if let Err(e) = self.poller.remove(fd) {
            warn!(cause = %e, fd, "can't deregister connection");
        }
        self.timer.remove(fd);

        if let Some(connection) = self.table.remove(fd) {
            bump(&self.stats.closed);
            debug!(fd, generation = %connection.generation(), peer = %connection.peer(), ?reason, "connection closed");
            drop(connection.into_session());
        }
    }

    /// Closes the listener, lingers if configured, then closes everything and
    /// joins the workers.
    fn stop(&mut self) {
        info!(connections = self.table.len(), "server shutting down");

        if let Some(listener) = self.listener.take()
            && let Err(e) = self.poller.remove(listener.as_raw_fd())
        {
            warn!(cause = %e, "can't deregister listener");
        }

        if let Some(linger) = self.config.linger {
            let deadline = Instant::now() + linger;
            loop {
                let now = Instant::now();
                if self.table.is_empty() || now >= deadline {
                    break;
                }
                if let Err(e) = self.turn(Some(deadline - now)) {
                    warn!(cause = %e, "linger aborted");
                    break;
                }
            }
        }

        for fd in self.table.fds() {
            self.close(fd, CloseReason::Shutdown);
        }

        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
        // every connection is gone, this only drops returning sessions
        self.apply_completions();

        info!(
            accepted = self.stats.accepted(),
            rejected = self.stats.rejected(),
            evicted = self.stats.evicted(),
            closed = self.stats.closed(),
            "server stopped"
        );
    }
}
