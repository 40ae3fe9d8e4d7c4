use rstest::rstest;
use strand::sync::{AutoResetEvent, Event, Latch, Lock, Section, WaitGroup};
use strand::{Runtime, SyncError, Task, yield_now};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn latch_releases_blocked_threads() {
    let latch = Arc::new(Latch::new(4));
    let released = Arc::new(AtomicUsize::new(0));

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let latch = latch.clone();
            let released = released.clone();
            thread::spawn(move || {
                latch.wait();
                released.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for _ in 0..4 {
        assert_eq!(released.load(Ordering::SeqCst), 0);
        let latch = latch.clone();
        thread::spawn(move || latch.count_down(1).unwrap())
            .join()
            .unwrap();
    }

    for waiter in waiters {
        waiter.join().unwrap();
    }

    assert_eq!(released.load(Ordering::SeqCst), 3);
    assert!(latch.is_released());
}

#[rstest]
#[case(3, 4)]
#[case(1, 2)]
#[case(0, 1)]
fn latch_underflow_leaves_count_untouched(#[case] count: usize, #[case] requested: usize) {
    let latch = Latch::new(count);

    assert_eq!(
        latch.count_down(requested),
        Err(SyncError::Underflow {
            requested,
            remaining: count
        })
    );
    assert_eq!(latch.count(), count);
}

#[test]
fn latch_wait_timeout_expires() {
    let latch = Latch::new(1);
    assert!(!latch.wait_timeout(Duration::from_millis(20)));

    latch.count_down(1).unwrap();
    assert!(latch.wait_timeout(Duration::from_millis(20)));
}

#[test]
fn latch_releases_tasks() {
    let rt = Runtime::new().expect("runtime");
    let latch = Arc::new(Latch::new(3));

    rt.block_on(async {
        let waiting = {
            let latch = latch.clone();
            Task::spawn(async move { latch.released().await })
        };

        for _ in 0..3 {
            let latch = latch.clone();
            Task::spawn(async move {
                yield_now().await;
                latch.count_down(1).unwrap();
            });
        }

        waiting.await;
    });

    assert!(latch.is_released());
}

#[test]
fn wait_group_is_reusable() {
    let group = Arc::new(WaitGroup::new());

    for round in 1..=3 {
        group.add(round);

        let workers: Vec<_> = (0..round)
            .map(|_| {
                let group = group.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    group.done().unwrap();
                })
            })
            .collect();

        assert!(group.wait(Some(Duration::from_secs(5))), "round {round}");
        assert_eq!(group.count(), 0);

        for worker in workers {
            worker.join().unwrap();
        }
    }
}

#[test]
fn wait_group_timeout_is_not_an_error() {
    let group = WaitGroup::new();
    group.add(2);
    group.done().unwrap();

    assert!(!group.wait(Some(Duration::from_millis(20))));
    assert_eq!(group.done_n(2), Err(SyncError::Underflow { requested: 2, remaining: 1 }));

    group.done().unwrap();
    assert!(group.wait(Some(Duration::ZERO)));
}

#[test]
fn wait_group_joins_tasks() {
    let rt = Runtime::new().expect("runtime");
    let group = Arc::new(WaitGroup::new());
    let finished = Arc::new(AtomicUsize::new(0));

    rt.block_on(async {
        group.add(5);

        for _ in 0..5 {
            let group = group.clone();
            let finished = finished.clone();
            Task::spawn(async move {
                yield_now().await;
                finished.fetch_add(1, Ordering::SeqCst);
                group.done().unwrap();
            });
        }

        group.done_all().await;
        assert_eq!(finished.load(Ordering::SeqCst), 5);
    });
}

#[test]
fn event_set_releases_every_wait() {
    let rt = Runtime::new().expect("runtime");
    let event = Arc::new(Event::new());

    rt.block_on(async {
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let event = event.clone();
                Task::spawn(async move { event.wait().await })
            })
            .collect();

        yield_now().await;
        assert!(event.set());
        assert!(!event.set());

        for waiter in waiters {
            assert!(waiter.await);
        }

        // Past and future waits alike complete at once.
        assert!(event.wait().await);
        assert!(event.wait().await);
    });
}

#[test]
fn event_cancel_releases_pending_waits_with_false() {
    let rt = Runtime::new().expect("runtime");
    let event = Arc::new(Event::new());

    rt.block_on(async {
        let waiter = {
            let event = event.clone();
            Task::spawn(async move { event.wait().await })
        };

        yield_now().await;
        assert_eq!(event.cancel(), 1);
        assert!(!waiter.await);

        // Losing the race to cancel, a later set releases new waits normally.
        event.set();
        assert_eq!(event.cancel(), 0);
        assert!(event.wait().await);
    });
}

#[test]
fn event_wakes_blocked_thread() {
    let event = Arc::new(Event::new());

    let setter = {
        let event = event.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            event.set();
        })
    };

    assert!(event.wait_blocking(Some(Duration::from_secs(5))));
    setter.join().unwrap();
}

#[test]
fn auto_reset_event_releases_one_per_set() {
    let rt = Runtime::new().expect("runtime");
    let event = Arc::new(AutoResetEvent::new());
    let released = Arc::new(AtomicUsize::new(0));

    rt.block_on(async {
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let event = event.clone();
                let released = released.clone();
                Task::spawn(async move {
                    let outcome = event.wait().await;
                    released.fetch_add(1, Ordering::SeqCst);
                    outcome
                })
            })
            .collect();

        yield_now().await;

        for expected in 1..=3 {
            event.set();
            yield_now().await;
            yield_now().await;
            assert_eq!(released.load(Ordering::SeqCst), expected);
        }

        for waiter in waiters {
            assert!(waiter.await);
        }
        assert!(!event.is_ready());
    });
}

#[test]
fn auto_reset_event_stores_a_single_signal() {
    let event = AutoResetEvent::new();

    event.set();
    event.set();
    assert!(event.is_ready());

    assert!(event.wait_blocking(Some(Duration::ZERO)));
    assert!(!event.is_ready());
    assert!(!event.wait_blocking(Some(Duration::from_millis(10))));
}

#[test]
fn lock_section_guards_shared_counter() {
    let lock = Arc::new(Lock::default());
    let total = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let lock = lock.clone();
            let total = total.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let _guard = lock.enter();
                    let seen = total.load(Ordering::Relaxed);
                    total.store(seen + 1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(total.load(Ordering::SeqCst), 4000);
    assert!(!lock.is_locked());
}
