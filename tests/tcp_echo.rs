//! End-to-end loopback tests driving a real `TcpServer` through an actual
//! `epoll`-backed `EventLoop`, the way `mio`'s own `tests/tcp.rs` exercises
//! its `Poll`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tudou::{Address, Connection, EventLoop, EventLoopHandle, TcpServer};

/// `EventLoop` is `!Send`, so it must be constructed on the thread it runs
/// on; the spawned thread builds it, starts the server, and hands the
/// listening address + a `Send`-safe handle back over an `mpsc` channel
/// before blocking in `run()`.
fn start_echo_server() -> (Address, Arc<EventLoopHandle>, thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();

    let join = thread::spawn(move || {
        let base_loop = EventLoop::new().unwrap();
        let handle = base_loop.handle();

        let mut server = TcpServer::new(&base_loop, "echo-test", Address::new("127.0.0.1", 0), false).unwrap();
        server.set_connection_hook(|conn| {
            conn.borrow_mut().set_message_callback(|conn, buf| {
                let bytes = buf.read_all();
                Connection::send(conn, &bytes);
            });
        });
        server.start(1).unwrap();

        let addr = server.local_addr().unwrap();
        tx.send((addr, handle)).unwrap();

        base_loop.run();
    });

    let (addr, handle) = rx.recv().expect("server thread dropped its sender before publishing");
    (addr, handle, join)
}

#[test]
fn echoes_bytes_over_loopback() {
    let (addr, handle, join) = start_echo_server();

    let mut stream = TcpStream::connect(addr.to_socket_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.write_all(b"hello reactor").unwrap();

    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello reactor");

    drop(stream);
    handle.quit();
    join.join().unwrap();
}

#[test]
fn server_keeps_accepting_after_a_connection_closes() {
    let (addr, handle, join) = start_echo_server();

    for i in 0..3 {
        let mut stream = TcpStream::connect(addr.to_socket_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let msg = format!("round-{i}");
        stream.write_all(msg.as_bytes()).unwrap();

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], msg.as_bytes());
        // Dropping here forces the server to observe a close and clean up
        // before the next iteration's connection arrives.
    }

    handle.quit();
    join.join().unwrap();
}
