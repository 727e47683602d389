use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// An `eventfd` that interrupts [`Poller::wait`](crate::poller::Poller::wait) from other threads.
#[derive(Debug)]
pub struct Waker {
    fd: OwnedFd,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        // SAFETY: eventfd has no memory preconditions, the result is checked below.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    pub fn wake(&self) -> io::Result<()> {
        let one = 1u64.to_ne_bytes();
        // SAFETY: writes exactly the 8 bytes of `one`, which outlives the call.
        let n = unsafe { libc::write(self.fd.as_raw_fd(), one.as_ptr().cast(), one.len()) };
        if n < 0 {
            let e = io::Error::last_os_error();
            // the counter is saturated, the poller is woken anyway
            if e.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(e);
        }
        Ok(())
    }

    /// Resets the counter so the next wait blocks again.
    pub fn drain(&self) -> io::Result<()> {
        let mut buf = [0u8; 8];
        // SAFETY: reads at most 8 bytes into `buf`, which outlives the call.
        let n = unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(e);
        }
        Ok(())
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::{Interest, Poller, Trigger};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wakes_poller_from_another_thread() {
        let mut poller = Poller::new().unwrap();
        let waker = Arc::new(Waker::new().unwrap());
        poller.add(waker.as_raw_fd(), Interest::READABLE, Trigger::Edge, false).unwrap();

        let remote = Arc::clone(&waker);
        let handle = thread::spawn(move || remote.wake().unwrap());

        assert_eq!(poller.wait(Some(Duration::from_secs(5))).unwrap(), 1);
        assert_eq!(poller.next_ready().unwrap().fd(), waker.as_raw_fd());
        handle.join().unwrap();
    }

    #[test]
    fn drain_resets_counter() {
        let mut poller = Poller::new().unwrap();
        let waker = Waker::new().unwrap();
        poller.add(waker.as_raw_fd(), Interest::READABLE, Trigger::Level, false).unwrap();

        waker.wake().unwrap();
        waker.wake().unwrap();
        waker.drain().unwrap();
        assert_eq!(poller.wait(Some(Duration::from_millis(10))).unwrap(), 0);

        // draining an empty counter is not an error
        waker.drain().unwrap();
    }
}
