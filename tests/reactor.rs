use strand::reactor::{Interest, Reactor, ReactorConfig};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Wake, Waker};
use std::time::{Duration, Instant};

#[derive(Default)]
struct CountingWaker {
    wakes: AtomicUsize,
}

impl Wake for CountingWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
    }
}

fn pair() -> (UnixStream, UnixStream) {
    let (a, b) = UnixStream::pair().expect("socket pair");
    a.set_nonblocking(true).expect("nonblocking");
    b.set_nonblocking(true).expect("nonblocking");
    (a, b)
}

/// Waits until `counter` reached `expected`, driving the reactor meanwhile.
fn drive_until(reactor: &Reactor, counter: &CountingWaker, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut ready = Vec::new();

    while counter.wakes.load(Ordering::SeqCst) < expected {
        assert!(Instant::now() < deadline, "reactor never fired");

        reactor
            .wait(Some(Duration::from_millis(20)), &mut ready)
            .expect("wait");
        for waker in ready.drain(..) {
            waker.wake();
        }
    }
}

#[test]
fn test_try_add_twice_modifies() {
    let reactor = Reactor::new().expect("reactor");
    let (a, mut b) = pair();

    let counter = Arc::new(CountingWaker::default());
    let waker = Waker::from(counter.clone());

    reactor
        .try_add(a.as_raw_fd(), Interest::READABLE, &waker)
        .expect("first registration");
    reactor
        .try_add(a.as_raw_fd(), Interest::READABLE, &waker)
        .expect("second registration is a modify");

    b.write_all(b"x").expect("write");
    drive_until(&reactor, &counter, 1);

    // One registration per direction, so exactly one wake.
    std::thread::sleep(Duration::from_millis(20));
    let mut ready = Vec::new();
    reactor
        .wait(Some(Duration::from_millis(10)), &mut ready)
        .expect("wait");
    ready.drain(..).for_each(Waker::wake);
    assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);

    reactor.remove(a.as_raw_fd()).expect("remove");
}

#[test]
fn test_read_and_write_directions_are_independent() {
    let reactor = Reactor::new().expect("reactor");
    let (a, _b) = pair();

    let reader = Arc::new(CountingWaker::default());
    let writer = Arc::new(CountingWaker::default());

    reactor
        .try_add(a.as_raw_fd(), Interest::READABLE, &Waker::from(reader.clone()))
        .expect("read registration");
    reactor
        .try_add(a.as_raw_fd(), Interest::WRITABLE, &Waker::from(writer.clone()))
        .expect("write registration");

    // An empty socket is writable but not readable.
    drive_until(&reactor, &writer, 1);
    assert_eq!(reader.wakes.load(Ordering::SeqCst), 0);

    // Removing wakes whoever is still registered.
    reactor.remove(a.as_raw_fd()).expect("remove");
    assert_eq!(reader.wakes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wait_timeout_reports_zero() {
    let reactor = Reactor::with_config(&ReactorConfig::default()).expect("reactor");
    let mut ready = Vec::new();

    let start = Instant::now();
    let count = reactor
        .wait(Some(Duration::from_millis(30)), &mut ready)
        .expect("timeout is not an error");

    assert_eq!(count, 0);
    assert!(ready.is_empty());
    assert!(start.elapsed() >= Duration::from_millis(25));
}

#[test]
fn test_zero_timeout_polls_once() {
    let reactor = Reactor::new().expect("reactor");
    let mut ready = Vec::new();

    let start = Instant::now();
    assert_eq!(reactor.wait(Some(Duration::ZERO), &mut ready).expect("wait"), 0);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_notify_interrupts_wait() {
    let reactor = Arc::new(Reactor::new().expect("reactor"));

    let notifier = reactor.clone();
    let thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        notifier.notify().expect("notify");
    });

    let start = Instant::now();
    let mut ready = Vec::new();
    reactor.wait(None, &mut ready).expect("wait");

    assert!(start.elapsed() < Duration::from_secs(5));
    thread.join().unwrap();
}

#[test]
fn test_repeated_notify_coalesces() {
    let reactor = Reactor::new().expect("reactor");

    for _ in 0..10 {
        reactor.notify().expect("notify");
    }

    let mut ready = Vec::new();
    assert_eq!(reactor.wait(Some(Duration::from_secs(1)), &mut ready).expect("wait"), 0);

    // The signal was consumed, so the next wait times out.
    let start = Instant::now();
    reactor
        .wait(Some(Duration::from_millis(20)), &mut ready)
        .expect("wait");
    assert!(start.elapsed() >= Duration::from_millis(15));
}
