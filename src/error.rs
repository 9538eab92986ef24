// src/error.rs

//! Error surface of the reactor. Registration and removal errors return
//! synchronously to the caller; a backend syscall failure during a poll
//! fails that `process` call and the embedder decides what to do next.

use crate::interest::Interest;
use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The fd already has a handler for this interest.
    #[error("fd {fd} already has a handler for {interest:?}")]
    DuplicateRegistration { fd: RawFd, interest: Interest },

    /// The backend was asked to modify or delete an fd it does not track.
    #[error("fd {fd} is not registered with the backend")]
    NotFound { fd: RawFd },

    /// Requested capacity is beyond the backend's hard platform ceiling
    /// (only the select backend has one: its fixed descriptor-set limit).
    #[error("requested capacity {requested} exceeds the backend limit of {limit}")]
    CapacityExceeded { requested: usize, limit: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `process` was called on a loop that has not been started or has been
    /// stopped.
    #[error("event loop is not running")]
    NotRunning,

    /// An OS call made by the backend failed.
    #[error("{op} failed")]
    Backend {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Captures `errno` for a failed backend syscall.
    pub(crate) fn backend(op: &'static str) -> Self {
        Error::Backend {
            op,
            source: io::Error::last_os_error(),
        }
    }
}
