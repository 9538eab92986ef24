// src/lib.rs

//! core-reactor: a single-threaded readiness/timer event loop.
//!
//! The loop multiplexes readiness on a set of file descriptors across
//! OS-specific polling backends (epoll on Linux, kqueue on the BSDs and
//! macOS, select as the portable fallback) and schedules one-shot and
//! repeating timers, dispatching callbacks to registered handlers. One
//! thread drives the loop; there is no cross-thread registration surface
//! and no internal locking.
//!
//! ```no_run
//! use core_reactor::EventLoop;
//! use std::os::unix::io::AsRawFd;
//! use std::os::unix::net::UnixStream;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), core_reactor::Error> {
//! let (sock, _peer) = UnixStream::pair().unwrap();
//! let mut el = EventLoop::new()?;
//!
//! el.add_reader(sock.as_raw_fd(), |el, fd| {
//!     println!("fd {} is readable", fd);
//!     el.stop();
//! })?;
//! el.add_timer(Duration::from_secs(1), 1, |el, _id| el.stop())?;
//!
//! el.start();
//! while el.is_running() {
//!     el.process(None)?;
//! }
//! # Ok(())
//! # }
//! ```

#![cfg(unix)]

pub mod backend;
pub mod error;
pub mod event_loop;
pub mod interest;
pub mod timer;

mod registry;

pub use crate::backend::Backend;
pub use crate::error::Error;
pub use crate::event_loop::{EventLoop, FdHandler, TimerHandler, DEFAULT_CAPACITY};
pub use crate::interest::{Interest, Trigger};
pub use crate::timer::TimerId;
