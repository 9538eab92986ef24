// src/backend/mock.rs

//! Scripted in-memory backend for exercising the event loop without real
//! descriptors. Records every trait call so tests can assert the exact
//! add/modify/delete sequence the loop issued, and replays queued triggers
//! on poll.

use crate::backend::Backend;
use crate::error::Error;
use crate::interest::{Interest, Trigger};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

/// Mock polls never block longer than this, so a test driving an
/// indefinite wait cannot hang.
const MAX_NAP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `known` tells whether the fd was already tracked, i.e. whether a real
    /// backend would have issued a modify instead of an add.
    Add {
        fd: RawFd,
        interest: Interest,
        known: bool,
    },
    Remove {
        fd: RawFd,
        remaining: Interest,
    },
    Expand {
        size: usize,
    },
    Poll,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub calls: Vec<MockCall>,
    /// Trigger batches handed out one per poll, in order.
    pub scripted: VecDeque<Vec<Trigger>>,
}

pub struct MockBackend {
    state: Rc<RefCell<MockState>>,
    registered: HashMap<RawFd, Interest>,
    capacity: usize,
}

impl MockBackend {
    /// Returns the backend and a shared handle to its call/script state.
    pub fn new(capacity: usize) -> (Self, Rc<RefCell<MockState>>) {
        let state = Rc::new(RefCell::new(MockState::default()));
        (
            Self {
                state: Rc::clone(&state),
                registered: HashMap::new(),
                capacity,
            },
            state,
        )
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn expand(&mut self, size: usize) -> Result<(), Error> {
        self.state
            .borrow_mut()
            .calls
            .push(MockCall::Expand { size });
        self.capacity = self.capacity.max(size);
        Ok(())
    }

    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error> {
        let known = self.registered.contains_key(&fd);
        self.state.borrow_mut().calls.push(MockCall::Add {
            fd,
            interest,
            known,
        });
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error> {
        if !self.registered.contains_key(&fd) {
            return Err(Error::NotFound { fd });
        }
        self.state.borrow_mut().calls.push(MockCall::Remove {
            fd,
            remaining: interest,
        });
        if interest.is_empty() {
            self.registered.remove(&fd);
        } else {
            self.registered.insert(fd, interest);
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Trigger>) -> Result<usize, Error> {
        out.clear();
        let scripted = {
            let mut state = self.state.borrow_mut();
            state.calls.push(MockCall::Poll);
            state.scripted.pop_front()
        };
        match scripted {
            Some(triggers) => out.extend(triggers),
            None => {
                // Emulate blocking so timer deadlines actually elapse.
                let nap = timeout.unwrap_or(MAX_NAP).min(MAX_NAP);
                if !nap.is_zero() {
                    std::thread::sleep(nap);
                }
            }
        }
        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_and_replays_scripts() {
        let (mut backend, state) = MockBackend::new(4);
        backend.add(5, Interest::READ).expect("add failed");
        state.borrow_mut().scripted.push_back(vec![Trigger {
            fd: 5,
            readiness: Interest::READ,
        }]);

        let mut out = Vec::new();
        let n = backend.poll(Some(Duration::ZERO), &mut out).expect("poll");
        assert_eq!(n, 1);
        assert_eq!(out[0].fd, 5);

        let calls = &state.borrow().calls;
        assert_eq!(
            calls[0],
            MockCall::Add {
                fd: 5,
                interest: Interest::READ,
                known: false
            }
        );
        assert_eq!(calls[1], MockCall::Poll);
    }
}
