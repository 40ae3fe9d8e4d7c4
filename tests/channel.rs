use strand::sync::Bypass;
use strand::{Channel, Runtime, Task, yield_now};
use std::thread;

#[test]
fn write_then_read_round_trips() {
    let rt = Runtime::new().expect("runtime");

    rt.block_on(async {
        let channel = Channel::<String>::new();

        let writer = Task::spawn(channel.write("value".to_string()));
        yield_now().await;
        assert_eq!(channel.pending_writers(), 1);

        assert_eq!(channel.read().await.as_deref(), Some("value"));
        assert!(writer.await);
    });
}

#[test]
fn reads_pair_with_writes_in_issue_order() {
    let rt = Runtime::new().expect("runtime");

    let received = rt.block_on(async {
        let channel = Channel::<u32>::new();

        let readers: Vec<_> = (0..10).map(|_| Task::spawn(channel.read())).collect();
        yield_now().await;
        assert_eq!(channel.pending_readers(), 10);

        for value in 0..10 {
            assert!(channel.write(value).await);
        }

        let mut received = Vec::new();
        for reader in readers {
            received.push(reader.await.expect("value"));
        }
        received
    });

    assert_eq!(received, (0..10).collect::<Vec<_>>());
}

#[test]
fn dropping_last_handle_releases_pending_writers() {
    let rt = Runtime::new().expect("runtime");

    rt.block_on(async {
        let channel = Channel::<u32>::new();
        let writers: Vec<_> = (0..3).map(|i| Task::spawn(channel.write(i))).collect();

        yield_now().await;
        assert_eq!(channel.pending_writers(), 3);

        drop(channel);

        for writer in writers {
            assert!(!writer.await, "writer must see the channel closed");
        }
    });
}

#[test]
fn dropping_last_handle_releases_pending_readers() {
    let rt = Runtime::new().expect("runtime");

    rt.block_on(async {
        let channel = Channel::<u32>::new();
        let clone = channel.clone();
        let readers: Vec<_> = (0..4).map(|_| Task::spawn(channel.read())).collect();

        yield_now().await;
        drop(channel);
        assert!(!clone.is_closed(), "a clone keeps the channel open");
        assert_eq!(clone.pending_readers(), 4);

        drop(clone);

        for reader in readers {
            assert_eq!(reader.await, None);
        }
    });
}

#[test]
fn close_is_explicit_and_idempotent() {
    let rt = Runtime::new().expect("runtime");

    rt.block_on(async {
        let channel = Channel::<u32>::new();
        let reader = Task::spawn(channel.read());

        yield_now().await;
        assert!(channel.close());
        assert!(!channel.close());

        assert_eq!(reader.await, None);
        assert!(!channel.write(1).await);
        assert_eq!(channel.read().await, None);
    });
}

#[test]
fn bypass_channel_in_single_threaded_code() {
    let rt = Runtime::new().expect("runtime");

    rt.block_on(async {
        let channel = Channel::<u32, Bypass>::new();

        let (sent, received) = futures::join!(channel.write(7), channel.read());
        assert!(sent);
        assert_eq!(received, Some(7));

        let (first, second, a, b) = futures::join!(
            channel.read(),
            channel.read(),
            channel.write(1),
            channel.write(2)
        );
        assert_eq!((first, second), (Some(1), Some(2)));
        assert!(a && b);
    });
}

#[test]
fn producer_thread_feeds_runtime_consumer() {
    let rt = Runtime::new().expect("runtime");
    let channel = Channel::<usize>::new();

    let producer = {
        let channel = channel.clone();
        thread::spawn(move || {
            for value in 0..100 {
                assert!(futures::executor::block_on(channel.write(value)));
            }
        })
    };

    let received = rt.block_on(async {
        let mut received = Vec::new();
        while received.len() < 100 {
            received.push(channel.read().await.expect("open channel"));
        }
        received
    });

    producer.join().unwrap();
    assert_eq!(received, (0..100).collect::<Vec<_>>());
}
