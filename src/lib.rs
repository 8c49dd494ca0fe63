//! Tudou: a Reactor-pattern TCP/HTTP server framework for Linux, built on
//! level-triggered `epoll`.
//!
//! The core is a single-threaded-per-loop event loop ([`EventLoop`]) that
//! multiplexes file descriptors through a [`Poller`](poller::Poller) and
//! dispatches readiness to [`Channel`](channel::Channel)s. [`TcpServer`]
//! layers connection accept/lifecycle management on top, spreading
//! accepted connections across a pool of loop threads
//! ([`loop_pool::LoopPool`]). The [`http`] module adapts `TcpServer` into
//! an HTTP/1.x server with request parsing and method+path routing.

#[macro_use]
mod macros;

mod acceptor;
mod address;
mod buffer;
mod channel;
mod connection;
mod event_loop;
pub mod http;
mod loop_pool;
mod loop_thread;
mod poller;
mod ready;
mod tcp_server;

pub use address::Address;
pub use connection::Connection;
pub use event_loop::{current_poller, EventLoop, EventLoopHandle};
pub use ready::Ready;
pub use tcp_server::TcpServer;
