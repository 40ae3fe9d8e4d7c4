#![cfg(feature = "completion")]

use strand::net::{TcpListener, TcpStream, UdpSocket};
use strand::reactor::Reactor;
use strand::sched::ThreadId;
use strand::{Error, Runtime, Task, yield_now};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream as StdTcpStream, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Runs `body` on its own thread and fails the test if it does not finish.
fn within<T, F>(limit: Duration, body: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (done, finished) = mpsc::channel();
    thread::spawn(move || {
        let _ = done.send(body());
    });

    finished.recv_timeout(limit).expect("timed out")
}

#[test]
fn completion_backend_is_selected() {
    assert_eq!(Reactor::BACKEND, "completion");
}

#[test]
fn udp_recv_from_completes_after_send_to() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (received, peer, sender_addr) = within(Duration::from_secs(5), || {
        let rt = Runtime::new().expect("runtime");

        rt.block_on(async {
            let receiver = UdpSocket::bind(localhost()).expect("bind receiver");
            let target = receiver.local_addr().expect("local addr");
            let sender = UdpSocket::bind(localhost()).expect("bind sender");
            let sender_addr = sender.local_addr().expect("local addr");

            let pending = Task::spawn(async move {
                let mut buf = [0u8; 64];
                let (len, peer) = receiver.recv_from(&mut buf).await?;
                Ok::<_, Error>((buf[..len].to_vec(), peer))
            });

            yield_now().await;
            assert!(!pending.is_finished());

            let sent = sender.send_to(b"hello reactor", target).await.expect("send_to");
            assert_eq!(sent, 13);

            let (received, peer) = pending.await.expect("recv_from");
            (received, peer, sender_addr)
        })
    });

    assert_eq!(received, b"hello reactor");
    assert_eq!(peer, sender_addr);
}

#[test]
fn tcp_echo_over_the_pool() {
    let reply = within(Duration::from_secs(5), || {
        let rt = Runtime::new().expect("runtime");

        rt.block_on(async {
            let listener = TcpListener::bind(localhost()).expect("bind listener");
            let addr = listener.local_addr().expect("local addr");

            let server = Task::spawn(async move {
                let (stream, _peer) = listener.accept().await.expect("accept");
                let mut buf = [0u8; 4];
                let n = stream.recv(&mut buf).await.expect("recv");
                stream.write_all(&buf[..n]).await.expect("write_all");
            });

            let client = thread::spawn(move || {
                let mut stream = StdTcpStream::connect(addr).expect("connect");
                stream.write_all(b"ping").expect("write");
                let mut buf = [0u8; 4];
                stream.read_exact(&mut buf).expect("read_exact");
                buf
            });

            server.await;
            client.join().unwrap()
        })
    });

    assert_eq!(&reply, b"ping");
}

#[test]
fn tcp_both_ends_on_the_pool() {
    let received = within(Duration::from_secs(5), || {
        let rt = Runtime::new().expect("runtime");

        rt.block_on(async {
            let listener = TcpListener::bind(localhost()).expect("bind listener");
            let addr = listener.local_addr().unwrap();

            let client = TcpStream::from_std(StdTcpStream::connect(addr).expect("connect"))
                .expect("adopt client");
            let (server, _peer) = listener.accept().await.expect("accept");

            let reader = Task::spawn(async move {
                let mut buf = [0u8; 5];
                let n = server.recv(&mut buf).await.expect("recv");
                buf[..n].to_vec()
            });

            client.send(b"hello").await.expect("send");
            reader.await
        })
    });

    assert_eq!(received, b"hello");
}

#[test]
fn idle_operations_do_not_occupy_the_pool() {
    let received = within(Duration::from_secs(5), || {
        let rt = Runtime::builder()
            .completion_workers(4)
            .build()
            .expect("runtime");

        rt.block_on(async {
            // One idle receive per pool worker.
            for _ in 0..4 {
                let idle = UdpSocket::bind(localhost()).expect("bind idle");
                let _ = Task::spawn(async move {
                    let mut buf = [0u8; 8];
                    let _ = idle.recv_from(&mut buf).await;
                });
            }
            yield_now().await;

            let socket = UdpSocket::bind(localhost()).expect("bind");
            let target = socket.local_addr().unwrap();

            let pending = Task::spawn(async move {
                let mut buf = [0u8; 8];
                let (len, _) = socket.recv_from(&mut buf).await.expect("recv_from");
                buf[..len].to_vec()
            });
            yield_now().await;

            let sender = StdUdpSocket::bind(localhost()).expect("std bind");
            sender.send_to(b"fifth", target).expect("std send_to");

            pending.await
        })
    });

    assert_eq!(received, b"fifth");
}

#[test]
fn removed_descriptor_is_not_read_after_reuse() {
    let received = within(Duration::from_secs(5), || {
        let rt = Runtime::new().expect("runtime");

        rt.block_on(async {
            let first = UdpSocket::bind(localhost()).expect("bind first");

            {
                let mut buf = [0u8; 8];
                let mut recv = first.recv_from(&mut buf);
                assert!(futures::poll!(&mut recv).is_pending());
            }
            drop(first);

            // Usually lands on the descriptor number `first` just released.
            let second = UdpSocket::bind(localhost()).expect("bind second");
            let target = second.local_addr().unwrap();

            let sender = StdUdpSocket::bind(localhost()).expect("std bind");
            sender.send_to(b"mine", target).expect("std send_to");

            let mut buf = [0u8; 8];
            let (len, _) = second.recv_from(&mut buf).await.expect("recv_from");
            buf[..len].to_vec()
        })
    });

    assert_eq!(received, b"mine");
}

#[test]
fn dropped_operation_leaves_the_datagram_queued() {
    let received = within(Duration::from_secs(5), || {
        let rt = Runtime::new().expect("runtime");

        rt.block_on(async {
            let socket = UdpSocket::bind(localhost()).expect("bind");
            let target = socket.local_addr().unwrap();

            {
                let mut buf = [0u8; 8];
                let mut recv = socket.recv_from(&mut buf);
                assert!(futures::poll!(&mut recv).is_pending());
            }

            let sender = StdUdpSocket::bind(localhost()).expect("std bind");
            sender.send_to(b"kept", target).expect("std send_to");

            // Give the poller time to see the datagram for the dropped call.
            thread::sleep(Duration::from_millis(50));

            let mut buf = [0u8; 8];
            let (len, _) = socket.recv_from(&mut buf).await.expect("recv_from");
            buf[..len].to_vec()
        })
    });

    assert_eq!(received, b"kept");
}

#[test]
fn pool_wake_ups_reach_a_full_worker_mailbox() {
    let (resumed, worker) = within(Duration::from_secs(5), || {
        let rt = Runtime::builder().mailbox_capacity(1).build().expect("runtime");
        let scheduler = rt.scheduler().clone();
        let worker = scheduler.spawn_worker("completion-narrow").expect("worker");
        let target = worker.id();

        let resumed = rt.block_on(async move {
            let sockets: Vec<_> = (0..2)
                .map(|_| UdpSocket::bind(localhost()).expect("bind"))
                .collect();
            let targets: Vec<_> = sockets.iter().map(|s| s.local_addr().unwrap()).collect();

            let parked = Arc::new(AtomicUsize::new(0));
            let waiters: Vec<_> = sockets
                .into_iter()
                .map(|socket| {
                    let scheduler = scheduler.clone();
                    let parked = parked.clone();

                    Task::spawn(async move {
                        while !scheduler.switch_to(target).await.expect("switch") {
                            yield_now().await;
                        }
                        let mut buf = [0u8; 8];
                        parked.fetch_add(1, Ordering::SeqCst);
                        socket.recv_from(&mut buf).await.expect("recv_from");
                        ThreadId::current()
                    })
                })
                .collect();

            while parked.load(Ordering::SeqCst) < 2 {
                yield_now().await;
            }
            thread::sleep(Duration::from_millis(20));

            let sender = StdUdpSocket::bind(localhost()).expect("std bind");
            for target in &targets {
                sender.send_to(b"wake", target).expect("std send_to");
            }

            let mut resumed = Vec::new();
            for waiter in waiters {
                resumed.push(waiter.await);
            }
            resumed
        });

        (resumed, target)
    });

    assert_eq!(resumed, vec![worker, worker]);
}
