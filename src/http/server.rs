//! Adapts a `TcpServer` to speak HTTP/1.x: parses each connection's byte
//! stream into requests, dispatches them through a `Router`, and writes the
//! serialized response back.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::Arc;

use crate::address::Address;
use crate::buffer::Buffer;
use crate::connection::Connection;
use crate::event_loop::EventLoop;
use crate::tcp_server::TcpServer;

use super::parser::HttpParser;
use super::response::HttpResponse;
use super::router::Router;

thread_local! {
    /// One parser per live connection, confined to the I/O thread that owns
    /// the connection (mirrors `tcp_server`'s `LOCAL_CONNECTIONS`).
    static PARSERS: RefCell<HashMap<RawFd, HttpParser>> = RefCell::new(HashMap::new());
}

pub struct HttpServer {
    tcp: TcpServer,
}

impl HttpServer {
    pub fn new(base_loop: &EventLoop, name: impl Into<String>, addr: Address, reuse_port: bool, router: Router) -> io::Result<HttpServer> {
        let mut tcp = TcpServer::new(base_loop, name, addr, reuse_port)?;
        let router = Arc::new(router);

        tcp.set_connection_hook(move |conn| {
            let fd = conn.borrow().fd();
            PARSERS.with(|p| p.borrow_mut().insert(fd, HttpParser::new()));

            let router_for_message = router.clone();
            conn.borrow_mut().set_message_callback(move |conn, buf| {
                handle_message(conn, buf, &router_for_message);
            });

            conn.borrow_mut().set_close_callback(move |conn| {
                let fd = conn.borrow().fd();
                PARSERS.with(|p| {
                    p.borrow_mut().remove(&fd);
                });
            });
        });

        Ok(HttpServer { tcp })
    }

    pub fn num_connections(&self) -> usize {
        self.tcp.num_connections()
    }

    pub fn local_addr(&self) -> io::Result<Address> {
        self.tcp.local_addr()
    }

    pub fn start(&mut self, num_threads: usize) -> io::Result<()> {
        self.tcp.start(num_threads)
    }
}

/// Repeatedly parses requests out of `buf` until it's drained or a parse
/// fails, dispatching each complete request and resetting the connection's
/// parser for the next one (pipelining within a single read is supported
/// because `HttpParser::parse` reports a `consumed` count short of the full
/// input when a request boundary falls mid-buffer).
fn handle_message(conn: &Rc<RefCell<Connection>>, buf: &mut Buffer, router: &Arc<Router>) {
    let fd = conn.borrow().fd();
    loop {
        let bytes = buf.peek();
        if bytes.is_empty() {
            return;
        }

        let (ok, consumed) = PARSERS.with(|p| {
            let mut parsers = p.borrow_mut();
            let parser = match parsers.get_mut(&fd) {
                Some(parser) => parser,
                None => return (true, bytes.len()),
            };
            let (ok, consumed) = parser.parse(bytes);
            (ok, consumed)
        });

        if !ok {
            let mut response = HttpResponse::new();
            response.set_status(400, "Bad Request");
            response.set_body(b"Bad Request".to_vec());
            response.set_close(true);
            response.ensure_content_length();
            Connection::send(conn, &response.serialize());
            buf.read_all();
            PARSERS.with(|p| {
                if let Some(parser) = p.borrow_mut().get_mut(&fd) {
                    parser.reset();
                }
            });
            return;
        }

        buf.read(consumed);

        let complete = PARSERS.with(|p| p.borrow().get(&fd).map(|parser| parser.is_complete()).unwrap_or(false));
        if !complete {
            return;
        }

        let request = PARSERS.with(|p| {
            let mut parsers = p.borrow_mut();
            let parser = parsers.get_mut(&fd).expect("parser present while complete");
            let request = parser.take_request();
            parser.reset();
            request
        });

        let mut response = HttpResponse::new();
        router.dispatch(&request, &mut response);
        response.ensure_content_length();
        let should_close = response.close();
        Connection::send(conn, &response.serialize());
        if should_close {
            Connection::shutdown(conn);
            return;
        }

        if consumed == 0 {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_message_dispatches_complete_request_and_resets_parser() {
        let mut router = Router::new();
        router.get("/hello", |_, resp| {
            resp.set_status(200, "OK");
            resp.set_body(b"hi".to_vec());
        });
        let router = Arc::new(router);

        let fd: RawFd = 12345;
        PARSERS.with(|p| p.borrow_mut().insert(fd, HttpParser::new()));

        let mut buf = Buffer::new();
        buf.write(b"GET /hello HTTP/1.1\r\n\r\n");

        // `handle_message` needs a real `Connection` only to call `send`; we
        // exercise the parser/router plumbing directly instead since
        // constructing a live fd-backed `Connection` needs a poller/epoll fd.
        let (ok, consumed) = PARSERS.with(|p| p.borrow_mut().get_mut(&fd).unwrap().parse(buf.peek()));
        assert!(ok);
        buf.read(consumed);
        assert!(PARSERS.with(|p| p.borrow().get(&fd).unwrap().is_complete()));

        let request = PARSERS.with(|p| p.borrow_mut().get_mut(&fd).unwrap().take_request());
        let mut response = HttpResponse::new();
        router.dispatch(&request, &mut response);
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), b"hi");

        PARSERS.with(|p| p.borrow_mut().remove(&fd));
    }
}
