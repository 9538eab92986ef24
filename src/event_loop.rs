// src/event_loop.rs

//! The reactor facade: composes a polling backend with the fd and timer
//! registries and drives one `process` cycle at a time.
//!
//! Everything runs on the loop's own thread. Handlers receive `&mut
//! EventLoop` and may register or remove fds and timers mid-dispatch,
//! including cancelling themselves; dispatch re-resolves every fd and timer
//! id against the registries instead of holding references across handler
//! calls, so such mutation is well-defined. Calling `process` recursively
//! from inside a handler is not supported.

use crate::backend::{self, Backend};
use crate::error::Error;
use crate::interest::{Interest, Trigger};
use crate::registry::FdRegistry;
use crate::timer::{TimerId, TimerQueue};
use log::{debug, trace};
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Callback for fd readiness. The closure owns whatever state it captured;
/// dropping the registration drops the closure.
pub type FdHandler = Rc<RefCell<dyn FnMut(&mut EventLoop, RawFd)>>;

/// Callback for timer expiry.
pub type TimerHandler = Rc<RefCell<dyn FnMut(&mut EventLoop, TimerId)>>;

pub const DEFAULT_CAPACITY: usize = 32;

/// Single-threaded readiness/timer reactor.
///
/// The loop owns all registration records, addressed by fd or timer id.
/// Callers own the fd lifecycle: the loop never closes an fd, so close only
/// after `remove_reader`/`remove_writer` has returned.
pub struct EventLoop {
    backend: Box<dyn Backend>,
    files: FdRegistry,
    timers: TimerQueue,
    running: bool,
    trigger_buf: Vec<Trigger>,
}

impl EventLoop {
    /// Creates a loop over the best backend this platform offers
    /// (epoll > kqueue > select).
    pub fn new() -> Result<Self, Error> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
        Ok(Self::with_backend(backend::detect(capacity)?))
    }

    /// Wraps an explicit backend; used to embed a scripted backend in tests.
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            files: FdRegistry::default(),
            timers: TimerQueue::default(),
            running: false,
            trigger_buf: Vec::new(),
        }
    }

    /// Diagnostic identifier of the selected backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Idempotent; a stopped loop can be started again.
    pub fn start(&mut self) {
        if !self.running {
            debug!("event loop started ({} backend)", self.backend.name());
        }
        self.running = true;
    }

    /// Idempotent. Takes effect no later than the start of the next cycle.
    pub fn stop(&mut self) {
        if self.running {
            debug!("event loop stopped");
        }
        self.running = false;
    }

    /// Registers a read-readiness handler for `fd`.
    pub fn add_reader<F>(&mut self, fd: RawFd, handler: F) -> Result<(), Error>
    where
        F: FnMut(&mut EventLoop, RawFd) + 'static,
    {
        if self.files.read_handler(fd).is_some() {
            return Err(Error::DuplicateRegistration {
                fd,
                interest: Interest::READ,
            });
        }
        let mask = self.files.interest(fd) | Interest::READ;
        self.register(fd, mask)?;
        self.files.set_read(fd, Rc::new(RefCell::new(handler)));
        Ok(())
    }

    /// Registers a write-readiness handler for `fd`.
    pub fn add_writer<F>(&mut self, fd: RawFd, handler: F) -> Result<(), Error>
    where
        F: FnMut(&mut EventLoop, RawFd) + 'static,
    {
        if self.files.write_handler(fd).is_some() {
            return Err(Error::DuplicateRegistration {
                fd,
                interest: Interest::WRITE,
            });
        }
        let mask = self.files.interest(fd) | Interest::WRITE;
        self.register(fd, mask)?;
        self.files.set_write(fd, Rc::new(RefCell::new(handler)));
        Ok(())
    }

    /// Removes the read handler for `fd`. `Ok(false)` if none was
    /// registered. Removing the last interest destroys the fd's record and
    /// its backend registration; the fd itself stays open.
    pub fn remove_reader(&mut self, fd: RawFd) -> Result<bool, Error> {
        if self.files.read_handler(fd).is_none() {
            return Ok(false);
        }
        let remaining = self.files.interest(fd) - Interest::READ;
        self.backend.remove(fd, remaining)?;
        self.files.clear_read(fd);
        trace!("removed read interest for fd {} (remaining {:?})", fd, remaining);
        Ok(true)
    }

    /// Write-side counterpart of [`EventLoop::remove_reader`].
    pub fn remove_writer(&mut self, fd: RawFd) -> Result<bool, Error> {
        if self.files.write_handler(fd).is_none() {
            return Ok(false);
        }
        let remaining = self.files.interest(fd) - Interest::WRITE;
        self.backend.remove(fd, remaining)?;
        self.files.clear_write(fd);
        trace!("removed write interest for fd {} (remaining {:?})", fd, remaining);
        Ok(true)
    }

    /// Schedules a timer firing after `delay`, then every `delay` again
    /// until `repeat` iterations are spent. `repeat` of 1 fires once, N > 1
    /// fires N times, negative repeats forever; 0 is rejected.
    pub fn add_timer<F>(&mut self, delay: Duration, repeat: i32, handler: F) -> Result<TimerId, Error>
    where
        F: FnMut(&mut EventLoop, TimerId) + 'static,
    {
        self.timers.insert(delay, repeat, Rc::new(RefCell::new(handler)))
    }

    /// Cancels a timer. Safe to call from within the timer's own handler.
    pub fn remove_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    /// Number of live timers.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Number of fds with at least one registered interest.
    pub fn fd_count(&self) -> usize {
        self.files.len()
    }

    /// One cycle: blocks in the backend for at most
    /// `min(timeout, earliest live timer deadline)` (indefinitely when both
    /// are absent), dispatches fd triggers, then drains every timer due
    /// against one cached clock value. fd handlers run before timer
    /// handlers; per fd the read handler runs before the write handler; fd
    /// order is backend-defined, timer order is strict deadline order.
    ///
    /// Returns the number of handler invocations.
    pub fn process(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        if !self.running {
            return Err(Error::NotRunning);
        }

        let wake = self.wake_timeout(timeout);
        let mut triggers = std::mem::take(&mut self.trigger_buf);
        if let Err(e) = self.backend.poll(wake, &mut triggers) {
            self.trigger_buf = triggers;
            return Err(e);
        }

        let mut fired = self.dispatch_triggers(&triggers);
        triggers.clear();
        self.trigger_buf = triggers;

        // One clock fetch serves every deadline comparison this cycle, so a
        // timer rescheduling itself at zero delay fires once per cycle
        // instead of starving fd dispatch.
        let now = Instant::now();
        fired += self.dispatch_timers(now);
        Ok(fired)
    }

    /// Runs `process` until `stop` is observed. `tick` bounds each cycle's
    /// blocking time; `None` lets cycles block until readiness or the next
    /// timer deadline.
    pub fn run(&mut self, tick: Option<Duration>) -> Result<(), Error> {
        self.start();
        while self.running {
            self.process(tick)?;
        }
        Ok(())
    }

    /// Registers `fd` with its full recomputed mask, growing the backend's
    /// buffer first so a capacity failure leaves nothing registered.
    fn register(&mut self, fd: RawFd, mask: Interest) -> Result<(), Error> {
        let needed = self.files.len() + 1;
        if needed > self.backend.capacity() {
            self.backend.expand(needed)?;
        }
        self.backend.add(fd, mask)?;
        trace!("registered fd {} with mask {:?}", fd, mask);
        Ok(())
    }

    fn wake_timeout(&mut self, caller: Option<Duration>) -> Option<Duration> {
        let timer_wait = self
            .timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match (caller, timer_wait) {
            (Some(c), Some(t)) => Some(c.min(t)),
            (Some(c), None) => Some(c),
            (None, Some(t)) => Some(t),
            (None, None) => None,
        }
    }

    fn dispatch_triggers(&mut self, triggers: &[Trigger]) -> usize {
        let mut fired = 0;
        for trigger in triggers {
            // Lookup per trigger: a handler removed earlier this cycle must
            // not run, even if the backend reported its fd ready.
            if trigger.readiness.contains(Interest::READ) {
                if let Some(handler) = self.files.read_handler(trigger.fd) {
                    (&mut *handler.borrow_mut())(self, trigger.fd);
                    fired += 1;
                }
            }
            if trigger.readiness.contains(Interest::WRITE) {
                if let Some(handler) = self.files.write_handler(trigger.fd) {
                    (&mut *handler.borrow_mut())(self, trigger.fd);
                    fired += 1;
                }
            }
        }
        fired
    }

    fn dispatch_timers(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        for (id, deadline) in self.timers.take_due(now) {
            // An earlier handler this cycle may have cancelled it.
            let Some(handler) = self.timers.handler(id) else {
                continue;
            };
            (&mut *handler.borrow_mut())(self, id);
            fired += 1;
            self.timers.finish_fire(id, deadline);
        }
        fired
    }
}
