// src/backend/epoll.rs

//! Linux epoll backend using raw `libc` FFI calls. The ready fd is carried
//! in `epoll_event.u64`, so no token table is needed on the poll path.

use crate::backend::{round_up_capacity, timeout_millis, Backend};
use crate::error::Error;
use crate::interest::{push_coalesced, Interest, Trigger};
use bitflags::bitflags;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    struct EpollFlags: u32 {
        const EPOLLIN = libc::EPOLLIN as u32;
        const EPOLLOUT = libc::EPOLLOUT as u32;
        const EPOLLPRI = libc::EPOLLPRI as u32;
        const EPOLLERR = libc::EPOLLERR as u32;
        const EPOLLHUP = libc::EPOLLHUP as u32;
    }
}

fn event_flags(interest: Interest) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if interest.contains(Interest::READ) {
        flags |= EpollFlags::EPOLLIN;
    }
    if interest.contains(Interest::WRITE) {
        flags |= EpollFlags::EPOLLOUT;
    }
    flags
}

#[derive(Debug)]
pub struct EpollBackend {
    epoll_fd: RawFd,
    /// Tracked fds and the mask they were last registered with; decides
    /// whether `add` issues EPOLL_CTL_ADD or EPOLL_CTL_MOD.
    registered: HashMap<RawFd, Interest>,
    events: Vec<libc::epoll_event>,
}

impl EpollBackend {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd == -1 {
            return Err(Error::backend("epoll_create1"));
        }
        debug!("created epoll backend with epoll_fd {}", epoll_fd);
        Ok(Self {
            epoll_fd,
            registered: HashMap::new(),
            events: vec![unsafe { std::mem::zeroed() }; round_up_capacity(capacity)],
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> Result<(), Error> {
        let mut event = libc::epoll_event {
            events: event_flags(interest).bits(),
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event) } == -1 {
            return Err(Error::backend("epoll_ctl"));
        }
        Ok(())
    }
}

impl Backend for EpollBackend {
    fn name(&self) -> &'static str {
        "epoll"
    }

    fn capacity(&self) -> usize {
        self.events.len()
    }

    fn expand(&mut self, size: usize) -> Result<(), Error> {
        let new_capacity = round_up_capacity(size);
        if new_capacity > self.events.len() {
            trace!(
                "epoll event buffer grows {} -> {}",
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
        let op = if self.registered.contains_key(&fd) {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        self.ctl(op, fd, interest)?;
        self.registered.insert(fd, interest);
        trace!(
            "epoll_ctl {} fd {} with mask {:?}",
            if op == libc::EPOLL_CTL_ADD { "ADD" } else { "MOD" },
            fd,
            interest
        );
        Ok(())
    }

    fn remove(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error> {
        if !self.registered.contains_key(&fd) {
            return Err(Error::NotFound { fd });
        }
        if interest.is_empty() {
            self.ctl(libc::EPOLL_CTL_DEL, fd, interest)?;
            self.registered.remove(&fd);
            trace!("epoll_ctl DEL fd {}", fd);
        } else {
            self.ctl(libc::EPOLL_CTL_MOD, fd, interest)?;
            self.registered.insert(fd, interest);
            trace!("epoll_ctl MOD fd {} to remaining mask {:?}", fd, interest);
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Trigger>) -> Result<usize, Error> {
        out.clear();
        let num_events = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_millis(timeout),
            )
        };
        if num_events == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("epoll_wait interrupted (EINTR), reporting no triggers");
                return Ok(0);
            }
            return Err(Error::Backend {
                op: "epoll_wait",
                source: err,
            });
        }

        for raw in &self.events[..num_events as usize] {
            let fd = raw.u64 as RawFd;
            let flags = EpollFlags::from_bits_truncate(raw.events);
            let mut readiness = Interest::empty();
            if flags.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI) {
                readiness |= Interest::READ;
            }
            if flags.contains(EpollFlags::EPOLLOUT) {
                readiness |= Interest::WRITE;
            }
            // Error and hangup wake every registered handler so the failure
            // is observed through the caller's own read/write.
            if flags.intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP) {
                readiness |= self
                    .registered
                    .get(&fd)
                    .copied()
                    .unwrap_or(Interest::READ | Interest::WRITE);
            }
            push_coalesced(out, fd, readiness);
        }
        trace!("epoll_wait returned {} raw event(s)", num_events);
        Ok(out.len())
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        if unsafe { libc::close(self.epoll_fd) } == -1 {
            warn!(
                "failed to close epoll_fd {}: {}",
                self.epoll_fd,
                io::Error::last_os_error()
            );
        } else {
            debug!("closed epoll_fd {}", self.epoll_fd);
        }
    }
}
