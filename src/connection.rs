//! A single accepted TCP session: one fd, one `Channel`, a read `Buffer`
//! and a write `Buffer`, and the five callbacks an owner can hook into.

use std::cell::RefCell;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

use crate::address::Address;
use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::poller::Poller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

pub type MessageCallback = Box<dyn FnMut(&Rc<RefCell<Connection>>, &mut Buffer)>;
pub type ConnCallback = Box<dyn FnMut(&Rc<RefCell<Connection>>)>;
pub type ConnErrorCallback = Box<dyn FnMut(&Rc<RefCell<Connection>>, io::Error)>;

pub struct Connection {
    fd: OwnedFd,
    channel: Rc<RefCell<Channel>>,
    read_buf: Buffer,
    write_buf: Buffer,
    local_addr: Address,
    peer_addr: Address,
    state: State,
    high_water_mark: usize,
    over_high_water: bool,

    message_cb: Option<MessageCallback>,
    close_cb: Option<ConnCallback>,
    write_complete_cb: Option<ConnCallback>,
    high_water_cb: Option<ConnCallback>,
    error_cb: Option<ConnErrorCallback>,

    self_weak: Weak<RefCell<Connection>>,
}

const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024 * 1024;

impl Connection {
    pub fn new(
        poller: Rc<RefCell<Poller>>,
        fd: RawFd,
        local_addr: Address,
        peer_addr: Address,
    ) -> Rc<RefCell<Connection>> {
        let channel = Channel::new(poller, fd);
        Rc::new_cyclic(|weak| {
            RefCell::new(Connection {
                // SAFETY: caller (TcpServer/Acceptor) hands us a freshly
                // `accept4`'d fd it does not otherwise retain.
                fd: unsafe { OwnedFd::from_raw_fd(fd) },
                channel,
                read_buf: Buffer::new(),
                write_buf: Buffer::new(),
                local_addr,
                peer_addr,
                state: State::Connecting,
                high_water_mark: DEFAULT_HIGH_WATER_MARK,
                over_high_water: false,
                message_cb: None,
                close_cb: None,
                write_complete_cb: None,
                high_water_cb: None,
                error_cb: None,
                self_weak: weak.clone(),
            })
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn local_addr(&self) -> Address {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Address {
        self.peer_addr
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    pub fn set_high_water_mark(&mut self, bytes: usize) {
        self.high_water_mark = bytes;
    }

    pub fn set_message_callback(&mut self, cb: impl FnMut(&Rc<RefCell<Connection>>, &mut Buffer) + 'static) {
        self.message_cb = Some(Box::new(cb));
    }

    pub fn set_close_callback(&mut self, cb: impl FnMut(&Rc<RefCell<Connection>>) + 'static) {
        self.close_cb = Some(Box::new(cb));
    }

    /// Lets `TcpServer` wrap whatever close callback an upper layer (e.g.
    /// `HttpServer`) installs with its own bookkeeping, instead of one
    /// silently overwriting the other.
    pub(crate) fn take_close_callback(&mut self) -> Option<ConnCallback> {
        self.close_cb.take()
    }

    pub fn set_write_complete_callback(&mut self, cb: impl FnMut(&Rc<RefCell<Connection>>) + 'static) {
        self.write_complete_cb = Some(Box::new(cb));
    }

    pub fn set_high_water_callback(&mut self, cb: impl FnMut(&Rc<RefCell<Connection>>) + 'static) {
        self.high_water_cb = Some(Box::new(cb));
    }

    pub fn set_error_callback(&mut self, cb: impl FnMut(&Rc<RefCell<Connection>>, io::Error) + 'static) {
        self.error_cb = Some(Box::new(cb));
    }

    /// Wires the `Channel` callbacks via a weak self-reference, then enables
    /// reading. Called exactly once, right after insertion into the owner's
    /// connection table.
    pub fn establish(self_rc: &Rc<RefCell<Connection>>) -> io::Result<()> {
        {
            let mut conn = self_rc.borrow_mut();
            assert_eq!(conn.state, State::Connecting);
            conn.state = State::Connected;
        }

        let channel = self_rc.borrow().channel.clone();
        let weak = self_rc.borrow().self_weak.clone();

        let w = weak.clone();
        channel.borrow_mut().set_read_callback(move || {
            if let Some(conn) = w.upgrade() {
                Connection::handle_read(&conn);
            }
        });
        let w = weak.clone();
        channel.borrow_mut().set_write_callback(move || {
            if let Some(conn) = w.upgrade() {
                Connection::handle_write(&conn);
            }
        });
        let w = weak.clone();
        channel.borrow_mut().set_close_callback(move || {
            if let Some(conn) = w.upgrade() {
                Connection::handle_close(&conn);
            }
        });
        channel.borrow_mut().set_error_callback(move || {
            if let Some(conn) = weak.upgrade() {
                Connection::handle_error(&conn);
            }
        });

        Channel::enable_reading(&channel)
    }

    fn handle_read(self_rc: &Rc<RefCell<Connection>>) {
        let fd = self_rc.borrow().fd();
        let result = self_rc.borrow_mut().read_buf.read_from_fd(fd);
        match result {
            Ok(0) => Connection::handle_close(self_rc),
            Ok(_) => {
                // Temporarily move the buffer out so `cb` can take a plain
                // `&mut Buffer` without also needing to borrow `Connection`.
                let mut buf = std::mem::take(&mut self_rc.borrow_mut().read_buf);
                let cb = self_rc.borrow_mut().message_cb.take();
                if let Some(mut cb) = cb {
                    cb(self_rc, &mut buf);
                    self_rc.borrow_mut().message_cb = Some(cb);
                }
                self_rc.borrow_mut().read_buf = buf;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => Connection::handle_error(self_rc),
        }
    }

    fn handle_write(self_rc: &Rc<RefCell<Connection>>) {
        let (fd, writing) = {
            let conn = self_rc.borrow();
            (conn.fd(), conn.channel.borrow().is_writing())
        };
        if !writing {
            return;
        }
        let result = self_rc.borrow_mut().write_buf.write_to_fd(fd);
        match result {
            Ok(_) => {
                let (empty, channel, state) = {
                    let conn = self_rc.borrow();
                    (conn.write_buf.readable_bytes() == 0, conn.channel.clone(), conn.state)
                };
                if empty {
                    let _ = Channel::disable_writing(&channel);
                    Connection::fire_conn_callback(self_rc, |conn| &mut conn.write_complete_cb);
                    if state == State::Disconnecting {
                        Connection::shutdown_write(self_rc);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => Connection::handle_error(self_rc),
        }
    }

    fn handle_close(self_rc: &Rc<RefCell<Connection>>) {
        {
            let mut conn = self_rc.borrow_mut();
            if conn.state == State::Disconnected {
                return;
            }
            conn.state = State::Disconnected;
        }
        let channel = self_rc.borrow().channel.clone();
        let _ = Channel::remove(&channel);
        Connection::fire_conn_callback(self_rc, |conn| &mut conn.close_cb);
    }

    fn handle_error(self_rc: &Rc<RefCell<Connection>>) {
        let err = io::Error::last_os_error();
        let cb = self_rc.borrow_mut().error_cb.take();
        if let Some(mut cb) = cb {
            cb(self_rc, err);
            self_rc.borrow_mut().error_cb = Some(cb);
        }
    }

    /// Takes a `ConnCallback` out of `self`, invokes it with no borrow of
    /// `Connection` held, and puts it back. Used for the three zero-argument
    /// callbacks (close/write-complete/high-water).
    fn fire_conn_callback(
        self_rc: &Rc<RefCell<Connection>>,
        field: impl FnOnce(&mut Connection) -> &mut Option<ConnCallback>,
    ) {
        let cb = field(&mut self_rc.borrow_mut()).take();
        if let Some(mut cb) = cb {
            cb(self_rc);
            *field(&mut self_rc.borrow_mut()) = Some(cb);
        }
    }

    /// Queues `data` for writing, writing directly to the fd first when the
    /// output buffer is already empty (the common case for request/response
    /// cycles with no backpressure).
    pub fn send(self_rc: &Rc<RefCell<Connection>>, data: &[u8]) {
        let (connected, already_writing, buffered) = {
            let conn = self_rc.borrow();
            (
                conn.state == State::Connected,
                conn.channel.borrow().is_writing(),
                conn.write_buf.readable_bytes(),
            )
        };
        if !connected {
            return;
        }

        let mut remaining = data;
        if !already_writing && buffered == 0 {
            let fd = self_rc.borrow().fd();
            match syscall!(write(fd, remaining.as_ptr() as *const libc::c_void, remaining.len())) {
                Ok(n) => {
                    let n = n as usize;
                    if n == remaining.len() {
                        Connection::fire_conn_callback(self_rc, |conn| &mut conn.write_complete_cb);
                        return;
                    }
                    remaining = &remaining[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => {
                    Connection::handle_error(self_rc);
                    return;
                }
            }
        }

        let (channel, new_len) = {
            let mut conn = self_rc.borrow_mut();
            conn.write_buf.write(remaining);
            (conn.channel.clone(), conn.write_buf.readable_bytes())
        };

        let crossed_mark = {
            let mut conn = self_rc.borrow_mut();
            let crossed = new_len >= conn.high_water_mark && !conn.over_high_water;
            conn.over_high_water = new_len >= conn.high_water_mark;
            crossed
        };
        if crossed_mark {
            Connection::fire_conn_callback(self_rc, |conn| &mut conn.high_water_cb);
        }

        if !channel.borrow().is_writing() {
            let _ = Channel::enable_writing(&channel);
        }
    }

    fn shutdown_write(self_rc: &Rc<RefCell<Connection>>) {
        let fd = self_rc.borrow().fd();
        let _ = syscall!(shutdown(fd, libc::SHUT_WR));
    }

    /// Half-closes the write side once any pending output has drained.
    pub fn shutdown(self_rc: &Rc<RefCell<Connection>>) {
        let writing = {
            let mut conn = self_rc.borrow_mut();
            if conn.state != State::Connected {
                return;
            }
            conn.state = State::Disconnecting;
            conn.channel.borrow().is_writing()
        };
        if !writing {
            Connection::shutdown_write(self_rc);
        }
    }

    pub fn force_close(self_rc: &Rc<RefCell<Connection>>) {
        let state = self_rc.borrow().state;
        if state == State::Connected || state == State::Disconnecting {
            Connection::handle_close(self_rc);
        }
    }
}
