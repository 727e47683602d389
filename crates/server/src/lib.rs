//! An epoll reactor HTTP server.
//!
//! A single reactor thread accepts connections, waits for readiness and evicts
//! idle connections; reading, parsing, handling and writing run either on the
//! reactor thread itself or on a fixed pool of workers.
//!
//! # Example
//!
//! ```no_run
//! use reactor_http::handler::StaticFiles;
//! use reactor_server::{HttpSessionFactory, Server, ServerConfig};
//!
//! let factory = HttpSessionFactory::new(StaticFiles::new("./resources"));
//! let mut server = Server::bind(ServerConfig::default(), factory).unwrap();
//!
//! let handle = server.shutdown_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(10));
//!     handle.shutdown();
//! });
//!
//! server.run().unwrap();
//! ```
//!
//! # Modules
//!
//! - [`poller`]: the `epoll` wrapper
//! - [`pool`]: the fixed worker pool
//! - [`timer`]: the idle timer heap
//! - [`connection`]: the connection table and the session seam
//! - [`task`]: what a worker does with a session
//! - [`server`]: the reactor loop
//! - [`service`]: HTTP sessions plugged into the reactor

pub mod config;
pub mod connection;
pub mod error;
pub mod poller;
pub mod pool;
pub mod server;
pub mod service;
pub mod signal;
pub mod task;
pub mod timer;
pub mod waker;

pub use config::{Cli, Dispatch, ServerConfig, TriggerModes};
pub use error::{PollerError, PoolError, ServerError, TimerError};
pub use server::{Server, ServerStats, ShutdownHandle};
pub use service::HttpSessionFactory;
