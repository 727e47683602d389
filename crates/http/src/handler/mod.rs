//! Request handlers invoked by the session once a request is complete.
//!
//! Handlers are synchronous: they run on whichever thread processes the
//! connection (a worker thread or the reactor thread itself) and must not block
//! for long.

mod static_files;

pub use static_files::StaticFiles;

use std::error::Error;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};

pub trait Handler: Send + Sync {
    type Error: Into<Box<dyn Error + Send + Sync>>;

    fn call(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Self::Error>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    type Error = H::Error;

    fn call(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Self::Error> {
        (**self).call(req)
    }
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<Err, F> Handler for HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Result<Response<Bytes>, Err> + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>>,
{
    type Error = Err;

    fn call(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Self::Error> {
        (self.f)(req)
    }
}

pub fn make_handler<F, Err>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Result<Response<Bytes>, Err> + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>>,
{
    HandlerFn { f }
}
