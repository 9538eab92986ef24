// src/backend/select.rs

//! Portable `select(2)` fallback. The descriptor sets are rebuilt from the
//! tracked fd map on every poll, and `FD_SETSIZE` is the one hard capacity
//! ceiling in the subsystem.

use crate::backend::{round_up_capacity, Backend};
use crate::error::Error;
use crate::interest::{push_coalesced, Interest, Trigger};
use log::{debug, trace};
use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

const FD_SET_LIMIT: usize = libc::FD_SETSIZE as usize;

#[derive(Debug)]
pub struct SelectBackend {
    /// Tracked fds in ascending order; doubles as the iteration source for
    /// rebuilding the fd_sets and decoding the results.
    registered: BTreeMap<RawFd, Interest>,
    capacity: usize,
}

impl SelectBackend {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let rounded = round_up_capacity(capacity);
        if rounded > FD_SET_LIMIT {
            return Err(Error::CapacityExceeded {
                requested: capacity,
                limit: FD_SET_LIMIT,
            });
        }
        debug!("created select backend with capacity {}", rounded);
        Ok(Self {
            registered: BTreeMap::new(),
            capacity: rounded,
        })
    }
}

impl Backend for SelectBackend {
    fn name(&self) -> &'static str {
        "select"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn expand(&mut self, size: usize) -> Result<(), Error> {
        let rounded = round_up_capacity(size);
        if rounded > FD_SET_LIMIT {
            // Prior state stays untouched.
            return Err(Error::CapacityExceeded {
                requested: size,
                limit: FD_SET_LIMIT,
            });
        }
        if rounded > self.capacity {
            trace!("select capacity grows {} -> {}", self.capacity, rounded);
            self.capacity = rounded;
        }
        Ok(())
    }

    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error> {
        if interest.is_empty() {
            return Err(Error::InvalidArgument("interest mask must be non-empty"));
        }
        if fd < 0 || fd as usize >= FD_SET_LIMIT {
            return Err(Error::CapacityExceeded {
                requested: fd as usize + 1,
                limit: FD_SET_LIMIT,
            });
        }
        self.registered.insert(fd, interest);
        trace!("select tracks fd {} with mask {:?}", fd, interest);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error> {
        if !self.registered.contains_key(&fd) {
            return Err(Error::NotFound { fd });
        }
        if interest.is_empty() {
            self.registered.remove(&fd);
            trace!("select drops fd {}", fd);
        } else {
            self.registered.insert(fd, interest);
            trace!("select narrows fd {} to mask {:?}", fd, interest);
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Trigger>) -> Result<usize, Error> {
        out.clear();

        let mut read_set: libc::fd_set = unsafe { mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { mem::zeroed() };
        let mut error_set: libc::fd_set = unsafe { mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut read_set);
            libc::FD_ZERO(&mut write_set);
            libc::FD_ZERO(&mut error_set);
        }

        let mut nfds: RawFd = 0;
        for (&fd, &interest) in &self.registered {
            if interest.contains(Interest::READ) {
                unsafe { libc::FD_SET(fd, &mut read_set) };
            }
            if interest.contains(Interest::WRITE) {
                unsafe { libc::FD_SET(fd, &mut write_set) };
            }
            unsafe { libc::FD_SET(fd, &mut error_set) };
            nfds = nfds.max(fd + 1);
        }

        let mut tv_storage;
        let tv_ptr = match timeout {
            None => ptr::null_mut(),
            Some(d) => {
                tv_storage = libc::timeval {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_usec: d.subsec_micros() as libc::suseconds_t,
                };
                &mut tv_storage as *mut libc::timeval
            }
        };

        let num_ready = unsafe {
            libc::select(
                nfds,
                &mut read_set,
                &mut write_set,
                &mut error_set,
                tv_ptr,
            )
        };
        if num_ready == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("select interrupted (EINTR), reporting no triggers");
                return Ok(0);
            }
            return Err(Error::Backend {
                op: "select",
                source: err,
            });
        }
        if num_ready == 0 {
            return Ok(0);
        }

        for (&fd, &interest) in &self.registered {
            let mut readiness = Interest::empty();
            if unsafe { libc::FD_ISSET(fd, &read_set) } {
                readiness |= Interest::READ;
            }
            if unsafe { libc::FD_ISSET(fd, &write_set) } {
                readiness |= Interest::WRITE;
            }
            // An exceptional condition wakes the fd's full registered mask.
            if unsafe { libc::FD_ISSET(fd, &error_set) } {
                readiness |= interest;
            }
            push_coalesced(out, fd, readiness);
        }
        trace!("select reported {} ready descriptor(s)", num_ready);
        Ok(out.len())
    }
}
