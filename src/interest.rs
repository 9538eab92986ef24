// src/interest.rs

//! Generic readiness-interest model shared by the registries and the polling
//! backends: the `Interest` bitset and the per-cycle `Trigger` record.

use bitflags::bitflags;
use std::os::unix::io::RawFd;

bitflags! {
    /// Read/write intent for a file descriptor, independent of any backend's
    /// native flag set. Backends translate this to epoll/kevent/fd_set terms.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Interest: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/// One ready file descriptor in one poll cycle. Never persisted across
/// cycles; each fd appears at most once per cycle with its combined mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub fd: RawFd,
    pub readiness: Interest,
}

/// Appends readiness for `fd`, merging into an existing record so backends
/// that report read and write readiness separately (kqueue) still yield one
/// trigger per fd.
pub(crate) fn push_coalesced(out: &mut Vec<Trigger>, fd: RawFd, readiness: Interest) {
    if readiness.is_empty() {
        return;
    }
    if let Some(existing) = out.iter_mut().find(|t| t.fd == fd) {
        existing.readiness |= readiness;
    } else {
        out.push(Trigger { fd, readiness });
    }
}
