//! Ties an `Acceptor` to a `LoopPool`: every accepted fd is handed to a
//! round-robin I/O loop, wrapped in a `Connection`, and tracked in a
//! mutex-guarded map keyed by fd so its size always equals the number of
//! live connections (`T1`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::acceptor::Acceptor;
use crate::address::Address;
use crate::connection::Connection;
use crate::event_loop::{current_poller, EventLoop, EventLoopHandle};
use crate::loop_pool::LoopPool;

thread_local! {
    /// Connections actually live here, confined to the thread of the I/O
    /// loop that accepted them; `TcpServer.connections` below only tracks
    /// *which* loop owns which fd, so it can be a plain `Send + Sync` map.
    static LOCAL_CONNECTIONS: RefCell<HashMap<RawFd, Rc<RefCell<Connection>>>> = RefCell::new(HashMap::new());
}

pub type ConnectionHook = Arc<dyn Fn(&Rc<RefCell<Connection>>) + Send + Sync>;

pub struct TcpServer {
    name: String,
    acceptor: Acceptor,
    loop_pool: Rc<RefCell<LoopPool>>,
    connections: Arc<Mutex<HashMap<RawFd, Arc<EventLoopHandle>>>>,
    connection_hook: Option<ConnectionHook>,
}

impl TcpServer {
    pub fn new(base_loop: &EventLoop, name: impl Into<String>, addr: Address, reuse_port: bool) -> io::Result<TcpServer> {
        let acceptor = Acceptor::new(base_loop.poller(), addr, reuse_port)?;
        let loop_pool = Rc::new(RefCell::new(LoopPool::new(base_loop.handle())));
        Ok(TcpServer {
            name: name.into(),
            acceptor,
            loop_pool,
            connections: Arc::new(Mutex::new(HashMap::new())),
            connection_hook: None,
        })
    }

    /// Called once per newly-established `Connection`, on the I/O loop
    /// thread that owns it, before reads are enabled. Used by `HttpServer`
    /// to install its own message/close handling.
    pub fn set_connection_hook(&mut self, hook: impl Fn(&Rc<RefCell<Connection>>) + Send + Sync + 'static) {
        self.connection_hook = Some(Arc::new(hook));
    }

    pub fn num_connections(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// The address the listening socket actually bound to -- useful when
    /// constructed with port `0` and the caller needs the OS-assigned port.
    pub fn local_addr(&self) -> io::Result<Address> {
        local_addr_of(self.acceptor.local_fd())
    }

    /// Spawns `num_threads` I/O loops and starts listening. Must be called
    /// before the base loop's `run()`.
    pub fn start(&mut self, num_threads: usize) -> io::Result<()> {
        self.loop_pool
            .borrow_mut()
            .start(num_threads, &format!("{}-io", self.name))?;

        let loop_pool = self.loop_pool.clone();
        let connections = self.connections.clone();
        let hook = self.connection_hook.clone();

        self.acceptor.set_new_connection_callback(move |fd, peer_addr| {
            let io_handle = loop_pool.borrow().next_loop();
            let local_addr = match local_addr_of(fd) {
                Ok(addr) => addr,
                Err(e) => {
                    log::warn!("TcpServer: getsockname failed: {e}");
                    let _ = syscall!(close(fd));
                    return;
                }
            };

            connections.lock().unwrap().insert(fd, io_handle.clone());
            let connections_for_close = connections.clone();
            let hook = hook.clone();

            io_handle.run_in_loop(move || {
                let poller = current_poller();
                let conn = Connection::new(poller, fd, local_addr, peer_addr);

                if let Some(hook) = hook.as_ref() {
                    hook(&conn);
                }

                let mut user_close_cb = conn.borrow_mut().take_close_callback();
                let connections_for_close = connections_for_close.clone();
                conn.borrow_mut().set_close_callback(move |c| {
                    if let Some(cb) = user_close_cb.as_mut() {
                        cb(c);
                    }
                    let fd = c.borrow().fd();
                    connections_for_close.lock().unwrap().remove(&fd);
                    LOCAL_CONNECTIONS.with(|m| {
                        m.borrow_mut().remove(&fd);
                    });
                });

                LOCAL_CONNECTIONS.with(|m| {
                    m.borrow_mut().insert(fd, conn.clone());
                });

                if let Err(e) = Connection::establish(&conn) {
                    log::error!("TcpServer: failed to establish connection: {e}");
                }
            });
        });

        self.acceptor.listen()
    }
}

fn local_addr_of(fd: RawFd) -> io::Result<Address> {
    let mut sockaddr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    syscall!(getsockname(fd, &mut sockaddr as *mut _ as *mut libc::sockaddr, &mut len))?;
    let ip = std::net::Ipv4Addr::from(sockaddr.sin_addr.s_addr.to_ne_bytes());
    let port = u16::from_be(sockaddr.sin_port);
    Ok(Address::from(std::net::SocketAddrV4::new(ip, port)))
}
