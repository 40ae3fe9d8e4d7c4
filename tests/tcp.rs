use strand::net::{TcpListener, TcpStream};
use strand::{Runtime, Task};
use std::io::{Read, Write};
use std::net::TcpStream as StdTcpStream;

#[test]
fn tcp_accept_and_echo() {
    let rt = Runtime::new().expect("runtime");

    rt.block_on(async move {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();

        let handle = Task::spawn(async move {
            let (stream, _peer) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 4];
            let n = stream.recv(&mut buf).await.expect("recv");
            assert_eq!(&buf[..n], b"ping");
            stream.write_all(b"pong").await.expect("write_all");
        });

        let client_thread = std::thread::spawn(move || {
            let mut c = StdTcpStream::connect(("127.0.0.1", port)).expect("connect");
            c.write_all(b"ping").expect("write");
            let mut buf = [0u8; 4];
            c.read_exact(&mut buf).expect("read_exact");
            buf.to_vec()
        });

        handle.await;

        let result = client_thread.join().unwrap();
        assert_eq!(&result[..], b"pong");
    });
}

#[test]
fn tcp_write_all_large_payload() {
    let rt = Runtime::new().expect("runtime");

    let payload = vec![7u8; 1024 * 1024];
    let payload_len = payload.len();

    let received = rt.block_on(async move {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).expect("bind listener");
        let addr = listener.local_addr().expect("local addr");

        let handle = Task::spawn(async move {
            let (stream, _peer) = listener.accept().await.expect("accept");
            stream.write_all(&payload).await.expect("write_all");
        });

        let client_thread = std::thread::spawn(move || {
            let mut c = StdTcpStream::connect(addr).expect("connect");
            let mut data = Vec::new();
            c.read_to_end(&mut data).expect("read_to_end");
            data
        });

        handle.await;
        client_thread.join().unwrap()
    });

    assert_eq!(received.len(), payload_len);
    assert!(received.iter().all(|&b| b == 7));
}

#[test]
fn tcp_both_ends_on_the_runtime() {
    let rt = Runtime::new().expect("runtime");

    rt.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).expect("bind listener");
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::from_std(StdTcpStream::connect(addr).expect("connect"))
            .expect("adopt client");
        let (server, peer) = listener.accept().await.expect("accept");

        assert_eq!(peer, client.local_addr().unwrap());
        assert_eq!(server.peer_addr().unwrap(), client.local_addr().unwrap());

        let reader = Task::spawn(async move {
            let mut buf = [0u8; 5];
            let n = server.recv(&mut buf).await.expect("recv");
            buf[..n].to_vec()
        });

        client.send(b"hello").await.expect("send");
        assert_eq!(reader.await, b"hello");
    });
}

#[test]
fn tcp_recv_reports_eof_as_zero() {
    let rt = Runtime::new().expect("runtime");

    rt.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).expect("bind listener");
        let addr = listener.local_addr().unwrap();

        let client = StdTcpStream::connect(addr).expect("connect");
        let (server, _) = listener.accept().await.expect("accept");
        drop(client);

        let mut buf = [0u8; 8];
        assert_eq!(server.recv(&mut buf).await.expect("recv"), 0);
    });
}
