// src/registry.rs

//! Per-fd handler bookkeeping: the FileEvent table.
//!
//! One entry per fd, existing iff at least one of its read/write handler
//! slots is set. The combined interest mask is always recomputed from the
//! live slots here, never read back from the backend.

use crate::event_loop::FdHandler;
use crate::interest::Interest;
use std::collections::HashMap;
use std::os::unix::io::RawFd;

#[derive(Default)]
struct FileEvent {
    read: Option<FdHandler>,
    write: Option<FdHandler>,
}

#[derive(Default)]
pub(crate) struct FdRegistry {
    files: HashMap<RawFd, FileEvent>,
}

impl FdRegistry {
    /// Number of fds with at least one registered interest.
    pub(crate) fn len(&self) -> usize {
        self.files.len()
    }

    /// Combined mask recomputed from the live handler slots; empty for an
    /// unregistered fd.
    pub(crate) fn interest(&self, fd: RawFd) -> Interest {
        let mut mask = Interest::empty();
        if let Some(entry) = self.files.get(&fd) {
            if entry.read.is_some() {
                mask |= Interest::READ;
            }
            if entry.write.is_some() {
                mask |= Interest::WRITE;
            }
        }
        mask
    }

    pub(crate) fn read_handler(&self, fd: RawFd) -> Option<FdHandler> {
        self.files.get(&fd).and_then(|e| e.read.clone())
    }

    pub(crate) fn write_handler(&self, fd: RawFd) -> Option<FdHandler> {
        self.files.get(&fd).and_then(|e| e.write.clone())
    }

    pub(crate) fn set_read(&mut self, fd: RawFd, handler: FdHandler) {
        self.files.entry(fd).or_default().read = Some(handler);
    }

    pub(crate) fn set_write(&mut self, fd: RawFd, handler: FdHandler) {
        self.files.entry(fd).or_default().write = Some(handler);
    }

    /// Clears the read slot, destroying the entry when it was the last
    /// interest. Returns whether a handler was present.
    pub(crate) fn clear_read(&mut self, fd: RawFd) -> bool {
        self.clear(fd, |entry| entry.read.take())
    }

    pub(crate) fn clear_write(&mut self, fd: RawFd) -> bool {
        self.clear(fd, |entry| entry.write.take())
    }

    fn clear<F>(&mut self, fd: RawFd, take: F) -> bool
    where
        F: FnOnce(&mut FileEvent) -> Option<FdHandler>,
    {
        let Some(entry) = self.files.get_mut(&fd) else {
            return false;
        };
        let had = take(entry).is_some();
        if entry.read.is_none() && entry.write.is_none() {
            self.files.remove(&fd);
        }
        had
    }
}
