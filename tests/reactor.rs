// tests/reactor.rs

//! End-to-end tests against the real platform backend, driving the loop
//! with Unix socket pairs and wall-clock timers.

use core_reactor::{Error, EventLoop, TimerId};
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};
use test_log::test;

/// Drives `process` with short cycles until `done` reports true or the
/// budget is spent.
fn pump<F>(el: &mut EventLoop, budget: Duration, mut done: F)
where
    F: FnMut(&EventLoop) -> bool,
{
    let end = Instant::now() + budget;
    while Instant::now() < end && !done(el) {
        el.process(Some(Duration::from_millis(10)))
            .expect("process failed");
    }
}

#[test]
fn backend_name_is_a_known_multiplexer() {
    let el = EventLoop::new().expect("no backend available");
    assert!(["epoll", "kqueue", "select"].contains(&el.backend_name()));
}

#[test]
fn readable_fd_dispatches_its_handler() {
    let (sock, mut peer) = UnixStream::pair().expect("socketpair failed");
    let mut el = EventLoop::new().expect("no backend available");

    let reads = Rc::new(Cell::new(0));
    let r = Rc::clone(&reads);
    el.add_reader(sock.as_raw_fd(), move |_, _| r.set(r.get() + 1))
        .expect("add_reader failed");

    peer.write_all(b"ping").expect("write failed");

    el.start();
    let fired = el
        .process(Some(Duration::from_millis(500)))
        .expect("process failed");
    assert_eq!(fired, 1);
    assert_eq!(reads.get(), 1);
}

#[test]
fn removed_reader_never_triggers_again() {
    let (sock, mut peer) = UnixStream::pair().expect("socketpair failed");
    let mut el = EventLoop::new().expect("no backend available");

    let reads = Rc::new(Cell::new(0));
    let r = Rc::clone(&reads);
    el.add_reader(sock.as_raw_fd(), move |_, _| r.set(r.get() + 1))
        .expect("add_reader failed");
    assert!(el.remove_reader(sock.as_raw_fd()).expect("remove failed"));

    // Data arrives after removal; the fd must stay silent.
    peer.write_all(b"ping").expect("write failed");

    el.start();
    let fired = el
        .process(Some(Duration::from_millis(50)))
        .expect("process failed");
    assert_eq!(fired, 0);
    assert_eq!(reads.get(), 0);
}

#[test]
fn read_and_write_readiness_dispatch_each_handler_once() {
    let (sock, mut peer) = UnixStream::pair().expect("socketpair failed");
    let mut el = EventLoop::new().expect("no backend available");
    let fd = sock.as_raw_fd();

    let reads = Rc::new(Cell::new(0));
    let writes = Rc::new(Cell::new(0));

    let r = Rc::clone(&reads);
    el.add_reader(fd, move |_, _| r.set(r.get() + 1))
        .expect("add_reader failed");
    let w = Rc::clone(&writes);
    el.add_writer(fd, move |_, _| w.set(w.get() + 1))
        .expect("add_writer failed");

    // Readable from the peer's write; a fresh stream socket is writable.
    peer.write_all(b"ping").expect("write failed");

    el.start();
    let fired = el
        .process(Some(Duration::from_millis(500)))
        .expect("process failed");
    assert_eq!(fired, 2);
    assert_eq!(reads.get(), 1);
    assert_eq!(writes.get(), 1);
}

#[test]
fn one_shot_timer_fires_once_and_expires() {
    let mut el = EventLoop::new().expect("no backend available");
    let fires = Rc::new(Cell::new(0));
    let f = Rc::clone(&fires);
    el.add_timer(Duration::ZERO, 1, move |_, _| f.set(f.get() + 1))
        .expect("add_timer failed");

    el.start();
    pump(&mut el, Duration::from_millis(200), |el| el.timer_count() == 0);
    assert_eq!(fires.get(), 1);

    // Extra cycles stay quiet.
    let fired = el
        .process(Some(Duration::from_millis(10)))
        .expect("process failed");
    assert_eq!(fired, 0);
    assert_eq!(fires.get(), 1);
}

#[test]
fn counted_timer_fires_three_times_with_spacing() {
    const PERIOD: Duration = Duration::from_millis(50);

    let mut el = EventLoop::new().expect("no backend available");
    let stamps: Rc<RefCell<Vec<Instant>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&stamps);
    el.add_timer(PERIOD, 3, move |_, _| s.borrow_mut().push(Instant::now()))
        .expect("add_timer failed");

    el.start();
    let end = Instant::now() + Duration::from_secs(2);
    while el.timer_count() > 0 && Instant::now() < end {
        // Fine-grained cycles keep fire lateness well under the period.
        el.process(Some(Duration::from_millis(2)))
            .expect("process failed");
    }

    let stamps = stamps.borrow();
    assert_eq!(stamps.len(), 3);
    for pair in stamps.windows(2) {
        let gap = pair[1] - pair[0];
        // Modulo scheduler jitter; the loop must not fire early.
        assert!(
            gap >= PERIOD - Duration::from_millis(15),
            "inter-fire gap {:?} shorter than the period",
            gap
        );
    }
}

#[test]
fn forever_timer_runs_until_removed() {
    let mut el = EventLoop::new().expect("no backend available");
    let fires = Rc::new(Cell::new(0u32));
    let f = Rc::clone(&fires);
    let id = el
        .add_timer(Duration::from_millis(5), -1, move |_, _| f.set(f.get() + 1))
        .expect("add_timer failed");

    el.start();
    pump(&mut el, Duration::from_secs(1), |_| fires.get() >= 3);
    assert!(fires.get() >= 3);

    assert!(el.remove_timer(id));
    let seen = fires.get();
    pump(&mut el, Duration::from_millis(50), |_| false);
    assert_eq!(fires.get(), seen, "no fire after removal");
}

#[test]
fn timer_self_cancellation_is_safe() {
    let mut el = EventLoop::new().expect("no backend available");
    let fires = Rc::new(Cell::new(0));
    let f = Rc::clone(&fires);
    el.add_timer(Duration::from_millis(1), -1, move |el: &mut EventLoop, id: TimerId| {
        f.set(f.get() + 1);
        assert!(el.remove_timer(id));
    })
    .expect("add_timer failed");

    el.start();
    pump(&mut el, Duration::from_millis(100), |el| el.timer_count() == 0);
    // A few more cycles to catch a double-invocation.
    pump(&mut el, Duration::from_millis(30), |_| false);
    assert_eq!(fires.get(), 1);
}

#[test]
fn timers_fire_in_deadline_order() {
    let mut el = EventLoop::new().expect("no backend available");
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = Rc::clone(&order);
    el.add_timer(Duration::from_millis(100), 1, move |_, _| {
        o.borrow_mut().push(100u64)
    })
    .expect("add_timer failed");
    let o = Rc::clone(&order);
    el.add_timer(Duration::from_millis(50), 1, move |_, _| {
        o.borrow_mut().push(50u64)
    })
    .expect("add_timer failed");

    el.start();
    pump(&mut el, Duration::from_secs(2), |el| el.timer_count() == 0);
    assert_eq!(*order.borrow(), vec![50, 100]);
}

#[test]
fn fd_handlers_run_before_timer_handlers_in_a_cycle() {
    let (sock, mut peer) = UnixStream::pair().expect("socketpair failed");
    let mut el = EventLoop::new().expect("no backend available");
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = Rc::clone(&order);
    el.add_timer(Duration::ZERO, 1, move |_, _| o.borrow_mut().push("timer"))
        .expect("add_timer failed");
    let o = Rc::clone(&order);
    el.add_reader(sock.as_raw_fd(), move |_, _| o.borrow_mut().push("fd"))
        .expect("add_reader failed");

    peer.write_all(b"ping").expect("write failed");

    el.start();
    // Both the fd and the timer are due in this single cycle.
    let fired = el
        .process(Some(Duration::from_millis(500)))
        .expect("process failed");
    assert_eq!(fired, 2);
    assert_eq!(*order.borrow(), vec!["fd", "timer"]);
}

#[test]
fn stopped_loop_rejects_process() {
    let mut el = EventLoop::new().expect("no backend available");
    assert!(matches!(el.process(None), Err(Error::NotRunning)));

    el.start();
    el.stop();
    assert!(matches!(
        el.process(Some(Duration::ZERO)),
        Err(Error::NotRunning)
    ));

    // Stopped is terminal only until the next start.
    el.start();
    el.add_timer(Duration::ZERO, 1, |_, _| {}).expect("add_timer failed");
    let fired = el
        .process(Some(Duration::from_millis(50)))
        .expect("process failed");
    assert_eq!(fired, 1);
}

#[test]
fn handler_may_register_new_interest_mid_dispatch() {
    let (sock, mut peer) = UnixStream::pair().expect("socketpair failed");
    let mut el = EventLoop::new().expect("no backend available");
    let fd = sock.as_raw_fd();

    let writes = Rc::new(Cell::new(0));
    let w = Rc::clone(&writes);
    el.add_reader(fd, move |el, fd| {
        let w = Rc::clone(&w);
        el.add_writer(fd, move |el, fd| {
            w.set(w.get() + 1);
            el.remove_writer(fd).expect("remove_writer failed");
        })
        .expect("add_writer failed");
        el.remove_reader(fd).expect("remove_reader failed");
    })
    .expect("add_reader failed");

    peer.write_all(b"ping").expect("write failed");

    el.start();
    pump(&mut el, Duration::from_millis(500), |_| writes.get() > 0);
    assert_eq!(writes.get(), 1);
    assert_eq!(el.fd_count(), 0);
}
