// src/backend/mod.rs

//! OS-specific readiness multiplexers behind a common trait.
//!
//! A backend is a pure syscall wrapper: it knows which fds it tracks and how
//! to block for readiness, but nothing about handlers. The concrete backend
//! is chosen once at construction by [`detect`], probing in priority order
//! epoll > kqueue > select.

use crate::error::Error;
use crate::interest::{Interest, Trigger};
use log::{debug, warn};
use std::os::unix::io::RawFd;
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;

pub mod mock;
pub mod select;

/// Capacity grows in multiples of this unit.
pub(crate) const CAPACITY_UNIT: usize = 32;

pub(crate) fn round_up_capacity(requested: usize) -> usize {
    requested.max(1).div_ceil(CAPACITY_UNIT) * CAPACITY_UNIT
}

pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

/// A readiness multiplexer.
///
/// `add` always receives the full combined interest mask recomputed from
/// registry state, never an incremental bit: the backend issues an ADD when
/// the fd is new to it and a MODIFY when it is already tracked. `remove`
/// receives the remaining mask; an empty mask deletes the registration.
pub trait Backend {
    /// Diagnostic identifier: "epoll", "kqueue" or "select".
    fn name(&self) -> &'static str;

    /// Current event-buffer capacity.
    fn capacity(&self) -> usize;

    /// Grows capacity to at least `size`, rounded up to the next multiple of
    /// the alignment unit. Prior state is retained. The select backend fails
    /// with [`Error::CapacityExceeded`] past its descriptor-set ceiling.
    fn expand(&mut self, size: usize) -> Result<(), Error>;

    /// Registers or re-registers `fd` with its full combined mask.
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error>;

    /// Narrows `fd` to the remaining mask, deleting the registration when
    /// the mask is empty. Fails with [`Error::NotFound`] for untracked fds.
    fn remove(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error>;

    /// Blocks up to `timeout` (`None` blocks indefinitely) and fills `out`
    /// with one coalesced trigger per ready fd. An interrupted syscall
    /// (EINTR) is not an error and reports zero triggers.
    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Trigger>) -> Result<usize, Error>;
}

/// Selects the best available backend for this platform at runtime.
pub fn detect(capacity: usize) -> Result<Box<dyn Backend>, Error> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    match epoll::EpollBackend::new(capacity) {
        Ok(backend) => {
            debug!("selected epoll backend (capacity {})", backend.capacity());
            return Ok(Box::new(backend));
        }
        Err(e) => warn!("epoll unavailable ({}), falling back", e),
    }

    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    match kqueue::KqueueBackend::new(capacity) {
        Ok(backend) => {
            debug!("selected kqueue backend (capacity {})", backend.capacity());
            return Ok(Box::new(backend));
        }
        Err(e) => warn!("kqueue unavailable ({}), falling back", e),
    }

    let backend = select::SelectBackend::new(capacity)?;
    debug!("selected select backend (capacity {})", backend.capacity());
    Ok(Box::new(backend))
}
