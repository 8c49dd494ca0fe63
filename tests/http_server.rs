//! End-to-end HTTP tests: real `HttpServer` over loopback, exercising
//! router dispatch (exact match, 405 with `Allow`, prefix fallback) and
//! the default 404.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tudou::http::{HttpServer, Router};
use tudou::{Address, EventLoop, EventLoopHandle};

fn start_http_server(router: Router) -> (Address, Arc<EventLoopHandle>, thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();

    let join = thread::spawn(move || {
        let base_loop = EventLoop::new().unwrap();
        let handle = base_loop.handle();

        let mut server = HttpServer::new(&base_loop, "http-test", Address::new("127.0.0.1", 0), false, router).unwrap();
        server.start(1).unwrap();

        let addr = server.local_addr().unwrap();
        tx.send((addr, handle)).unwrap();

        base_loop.run();
    });

    let (addr, handle) = rx.recv().expect("server thread dropped its sender before publishing");
    (addr, handle, join)
}

/// Sends a raw HTTP/1.1 request and collects everything the server writes
/// back within a short idle window (the server doesn't always close the
/// connection, so EOF can't be used as the read boundary).
fn send_request(addr: Address, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr.to_socket_addr()).unwrap();
    stream.write_all(request).unwrap();
    stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();

    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    out
}

fn status_line(response: &[u8]) -> String {
    let text = String::from_utf8_lossy(response);
    text.lines().next().unwrap_or("").to_string()
}

fn body_of(response: &[u8]) -> String {
    let text = String::from_utf8_lossy(response);
    match text.split_once("\r\n\r\n") {
        Some((_, body)) => body.to_string(),
        None => String::new(),
    }
}

#[test]
fn get_request_is_routed_to_its_handler() {
    let mut router = Router::new();
    router.get("/hello", |_, resp| {
        resp.set_status(200, "OK");
        resp.set_body(b"hi there".to_vec());
    });
    let (addr, handle, join) = start_http_server(router);

    let response = send_request(addr, b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert_eq!(body_of(&response), "hi there");

    handle.quit();
    join.join().unwrap();
}

#[test]
fn wrong_method_on_a_known_path_gets_405_with_allow_header() {
    let mut router = Router::new();
    router.get("/x", |_, _| {});
    let (addr, handle, join) = start_http_server(router);

    let response = send_request(addr, b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n");
    assert_eq!(status_line(&response), "HTTP/1.1 405 Method Not Allowed");
    let text = String::from_utf8_lossy(&response);
    assert!(text.contains("Allow: GET"));
    assert_eq!(body_of(&response), "Method Not Allowed");

    handle.quit();
    join.join().unwrap();
}

#[test]
fn prefix_routes_fall_back_in_registration_order() {
    let mut router = Router::new();
    router.add_prefix("/static/", |_, resp| {
        resp.set_status(200, "OK");
        resp.set_body(b"static-file".to_vec());
    });
    router.add_prefix("/", |_, resp| {
        resp.set_status(200, "OK");
        resp.set_body(b"root".to_vec());
    });
    let (addr, handle, join) = start_http_server(router);

    let response = send_request(addr, b"GET /static/a.css HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(body_of(&response), "static-file");

    let response = send_request(addr, b"GET /other HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(body_of(&response), "root");

    handle.quit();
    join.join().unwrap();
}

#[test]
fn unmatched_request_gets_default_404() {
    let router = Router::new();
    let (addr, handle, join) = start_http_server(router);

    let response = send_request(addr, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(status_line(&response), "HTTP/1.1 404 Not Found");
    assert_eq!(body_of(&response), "Not Found");
    assert!(String::from_utf8_lossy(&response).contains("Content-Length: 9"));

    handle.quit();
    join.join().unwrap();
}
