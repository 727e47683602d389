use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PollerError {
    #[error("can't {op} fd {fd} on the poller: {source}")]
    Registration {
        fd: RawFd,
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("poller io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl PollerError {
    pub fn registration(fd: RawFd, op: &'static str, source: io::Error) -> Self {
        Self::Registration { fd, op, source }
    }

    /// Whether the kernel refused the call because of the registration state
    /// (`EEXIST` on add, `ENOENT` on modify/remove).
    pub fn is_registration(&self) -> bool {
        matches!(self, Self::Registration { .. })
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("can't spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("worker pool is shut down")]
    Closed,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimerError {
    #[error("no timer registered for fd {fd}")]
    NotFound { fd: RawFd },
}

/// Errors that stop the server from starting or from running its loop.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("can't bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("poller error: {source}")]
    Poller {
        #[from]
        source: PollerError,
    },

    #[error("worker pool error: {source}")]
    Pool {
        #[from]
        source: PoolError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ServerError {
    pub fn invalid_config<S: ToString>(reason: S) -> Self {
        Self::InvalidConfig { reason: reason.to_string() }
    }
}
