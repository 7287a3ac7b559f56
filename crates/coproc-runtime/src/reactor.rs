//! Descriptor-readiness collaborator
//!
//! The event loop is agnostic to how readiness is multiplexed; it only
//! needs the three operations of [`Reactor`]. The bundled [`PollReactor`]
//! implements them over `poll(2)` via `nix`; an epoll/kqueue reactor would
//! satisfy the same contract.

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use coproc_core::Error;

/// Direction of interest for one watched descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Identifies one registration with the reactor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoToken(u64);

impl IoToken {
    #[inline]
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        IoToken(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Readiness multiplexing primitive driven by the event loop
pub trait Reactor {
    /// Register interest in one direction of one descriptor
    fn add(&self, token: IoToken, fd: RawFd, interest: Interest) -> Result<(), Error>;

    /// Drop a registration; no-op for unknown tokens
    fn remove(&self, token: IoToken);

    /// Block until a registered descriptor is ready or the timeout elapses
    ///
    /// `None` blocks indefinitely; the event loop only passes `None` when
    /// at least one descriptor is registered. Tokens of ready descriptors
    /// are appended to `ready`.
    fn wait(&self, timeout: Option<Duration>, ready: &mut Vec<IoToken>) -> Result<(), Error>;
}

/// A reactor that watches nothing and sleeps through its timeout
///
/// Useful for loops that never touch I/O and for deterministic tests that
/// drive a [`ManualClock`](crate::clock::ManualClock) by hand.
#[derive(Debug, Default)]
pub struct NullReactor;

impl Reactor for NullReactor {
    fn add(&self, _token: IoToken, _fd: RawFd, _interest: Interest) -> Result<(), Error> {
        Err(Error::failed("this event loop was built without i/o support"))
    }

    fn remove(&self, _token: IoToken) {}

    fn wait(&self, timeout: Option<Duration>, _ready: &mut Vec<IoToken>) -> Result<(), Error> {
        if let Some(timeout) = timeout {
            std::thread::sleep(timeout);
        }
        Ok(())
    }
}

pub use self::poll::PollReactor;

mod poll {
    use super::*;

    use std::io;
    use std::os::fd::BorrowedFd;

    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    struct Registration {
        token: IoToken,
        fd: RawFd,
        interest: Interest,
    }

    /// `poll(2)`-based readiness reactor
    ///
    /// Registrations are kept in a flat list; the pollfd array is rebuilt
    /// per wait. Fine for the handful of descriptors a single-threaded
    /// loop typically watches.
    #[derive(Default)]
    pub struct PollReactor {
        entries: RefCell<Vec<Registration>>,
    }

    impl PollReactor {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn flags_for(interest: Interest) -> PollFlags {
        match interest {
            Interest::Readable => PollFlags::POLLIN,
            Interest::Writable => PollFlags::POLLOUT,
        }
    }

    fn timeout_for(timeout: Option<Duration>) -> PollTimeout {
        match timeout {
            None => PollTimeout::NONE,
            Some(d) => {
                // Round sub-millisecond waits up so a short deadline does
                // not degenerate into a busy loop.
                let mut ms = d.as_millis();
                if ms == 0 && !d.is_zero() {
                    ms = 1;
                }
                let ms = i32::try_from(ms).unwrap_or(i32::MAX);
                PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
            }
        }
    }

    impl Reactor for PollReactor {
        fn add(&self, token: IoToken, fd: RawFd, interest: Interest) -> Result<(), Error> {
            self.entries.borrow_mut().push(Registration {
                token,
                fd,
                interest,
            });
            Ok(())
        }

        fn remove(&self, token: IoToken) {
            self.entries.borrow_mut().retain(|r| r.token != token);
        }

        fn wait(&self, timeout: Option<Duration>, ready: &mut Vec<IoToken>) -> Result<(), Error> {
            let entries = self.entries.borrow();
            let mut fds: Vec<PollFd> = entries
                .iter()
                .map(|r| {
                    // The fd stays valid for the duration of the call: the
                    // owner is suspended awaiting it and cannot close it.
                    let fd = unsafe { BorrowedFd::borrow_raw(r.fd) };
                    PollFd::new(fd, flags_for(r.interest))
                })
                .collect();

            loop {
                match poll(&mut fds, timeout_for(timeout)) {
                    Ok(_) => break,
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        return Err(Error::from(io::Error::from_raw_os_error(e as i32)));
                    }
                }
            }

            for (fd, registration) in fds.iter().zip(entries.iter()) {
                let revents = fd.revents().unwrap_or(PollFlags::empty());
                let wanted = flags_for(registration.interest)
                    | PollFlags::POLLERR
                    | PollFlags::POLLHUP
                    | PollFlags::POLLNVAL;
                if revents.intersects(wanted) {
                    ready.push(registration.token);
                }
            }
            Ok(())
        }
    }

}
