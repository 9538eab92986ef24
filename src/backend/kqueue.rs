// src/backend/kqueue.rs

//! BSD/macOS kqueue backend. Read and write interest are separate kevent
//! filters, so a combined mask is applied by diffing against the tracked
//! mask and emitting EV_ADD/EV_DELETE changes in one `kevent` call, and the
//! two filters are coalesced back into a single trigger per fd on the way
//! out.

use crate::backend::{round_up_capacity, Backend};
use crate::error::Error;
use crate::interest::{push_coalesced, Interest, Trigger};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

fn change(fd: RawFd, filter: i16, flags: u16) -> libc::kevent {
    libc::kevent {
        ident: fd as libc::uintptr_t,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: ptr::null_mut(),
    }
}

#[derive(Debug)]
pub struct KqueueBackend {
    kq: RawFd,
    /// Tracked fds and their current mask; the diff against a requested
    /// mask decides which filters to add or delete.
    registered: HashMap<RawFd, Interest>,
    events: Vec<libc::kevent>,
}

impl KqueueBackend {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let kq = unsafe { libc::kqueue() };
        if kq == -1 {
            return Err(Error::backend("kqueue"));
        }
        if unsafe { libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            let err = Error::backend("fcntl(FD_CLOEXEC)");
            unsafe { libc::close(kq) };
            return Err(err);
        }
        debug!("created kqueue backend with kq fd {}", kq);
        Ok(Self {
            kq,
            registered: HashMap::new(),
            events: vec![unsafe { std::mem::zeroed() }; round_up_capacity(capacity)],
        })
    }

    /// Applies filter changes moving `fd` from mask `from` to mask `to`.
    fn apply(&mut self, fd: RawFd, from: Interest, to: Interest) -> Result<(), Error> {
        let mut changes: Vec<libc::kevent> = Vec::with_capacity(2);
        for (bit, filter) in [
            (Interest::READ, libc::EVFILT_READ),
            (Interest::WRITE, libc::EVFILT_WRITE),
        ] {
            let have = from.contains(bit);
            let want = to.contains(bit);
            if want && !have {
                changes.push(change(fd, filter, libc::EV_ADD));
            } else if have && !want {
                changes.push(change(fd, filter, libc::EV_DELETE));
            }
        }
        if changes.is_empty() {
            return Ok(());
        }
        let rc = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as libc::c_int,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if rc == -1 {
            return Err(Error::backend("kevent (changelist)"));
        }
        trace!(
            "kevent applied {} filter change(s) for fd {} ({:?} -> {:?})",
            changes.len(),
            fd,
            from,
            to
        );
        Ok(())
    }
}

impl Backend for KqueueBackend {
    fn name(&self) -> &'static str {
        "kqueue"
    }

    fn capacity(&self) -> usize {
        self.events.len()
    }

    fn expand(&mut self, size: usize) -> Result<(), Error> {
        let new_capacity = round_up_capacity(size);
        if new_capacity > self.events.len() {
            trace!(
                "kqueue event buffer grows {} -> {}",
                self.events.len(),
                new_capacity
            );
            self.events.resize(new_capacity, unsafe { std::mem::zeroed() });
        }
        Ok(())
    }

    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error> {
        if interest.is_empty() {
            return Err(Error::InvalidArgument("interest mask must be non-empty"));
        }
        let current = self.registered.get(&fd).copied().unwrap_or_default();
        self.apply(fd, current, interest)?;
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error> {
        let Some(current) = self.registered.get(&fd).copied() else {
            return Err(Error::NotFound { fd });
        };
        self.apply(fd, current, interest)?;
        if interest.is_empty() {
            self.registered.remove(&fd);
        } else {
            self.registered.insert(fd, interest);
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Trigger>) -> Result<usize, Error> {
        out.clear();
        let ts_storage;
        let ts_ptr = match timeout {
            None => ptr::null(),
            Some(d) => {
                ts_storage = libc::timespec {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_nsec: d.subsec_nanos() as libc::c_long,
                };
                &ts_storage as *const libc::timespec
            }
        };
        let num_events = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                ts_ptr,
            )
        };
        if num_events == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("kevent interrupted (EINTR), reporting no triggers");
                return Ok(0);
            }
            return Err(Error::Backend {
                op: "kevent (poll)",
                source: err,
            });
        }

        for raw in &self.events[..num_events as usize] {
            let fd = raw.ident as RawFd;
            let mut readiness = match raw.filter {
                libc::EVFILT_READ => Interest::READ,
                libc::EVFILT_WRITE => Interest::WRITE,
                _ => Interest::empty(),
            };
            // EV_EOF/EV_ERROR still surface through the filter's own
            // readiness; a failed fd additionally wakes its full mask.
            if raw.flags & libc::EV_ERROR != 0 {
                readiness |= self
                    .registered
                    .get(&fd)
                    .copied()
                    .unwrap_or(Interest::READ | Interest::WRITE);
            }
            push_coalesced(out, fd, readiness);
        }
        trace!("kevent returned {} raw event(s)", num_events);
        Ok(out.len())
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        if unsafe { libc::close(self.kq) } == -1 {
            warn!(
                "failed to close kq fd {}: {}",
                self.kq,
                io::Error::last_os_error()
            );
        } else {
            debug!("closed kq fd {}", self.kq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use test_log::test;

    #[test]
    fn remove_untracked_fd_is_not_found() {
        let mut backend = KqueueBackend::new(4).expect("kqueue failed");
        assert!(matches!(
            backend.remove(999, Interest::empty()),
            Err(Error::NotFound { fd: 999 })
        ));
    }

    #[test]
    fn both_filters_coalesce_into_one_trigger() {
        let mut backend = KqueueBackend::new(4).expect("kqueue failed");
        let (sock, mut peer) = UnixStream::pair().expect("socketpair failed");
        let fd = sock.as_raw_fd();

        backend
            .add(fd, Interest::READ | Interest::WRITE)
            .expect("add failed");
        peer.write_all(b"x").expect("write failed");

        let mut out = Vec::new();
        let n = backend
            .poll(Some(Duration::from_millis(500)), &mut out)
            .expect("poll failed");
        assert_eq!(n, 1, "read and write filters must merge per fd");
        assert_eq!(out[0].readiness, Interest::READ | Interest::WRITE);

        backend.remove(fd, Interest::empty()).expect("remove failed");
    }
}
