//! Non-blocking IPv4 listening socket: accepts connections as they arrive
//! and hands the raw fd + peer address to a caller-supplied callback.

use std::cell::RefCell;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;

use crate::address::Address;
use crate::channel::Channel;
use crate::poller::Poller;

pub struct Acceptor {
    listen_fd: OwnedFd,
    channel: Rc<RefCell<Channel>>,
    // Reserved, already-open fd held back so an `accept4` that would
    // otherwise fail with `EMFILE` can still be drained: close the reserve,
    // accept (succeeds, freeing one descriptor slot), then immediately
    // close the accepted connection and reopen the reserve. Mirrors the
    // original's `idleFd_` trick.
    idle_fd: Rc<RefCell<Option<OwnedFd>>>,
    listening: bool,
}

impl Acceptor {
    pub fn new(poller: Rc<RefCell<Poller>>, addr: Address, reuse_port: bool) -> io::Result<Acceptor> {
        let fd = syscall!(socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        ))?;
        // SAFETY: `socket(2)` just handed us ownership of `fd`.
        let listen_fd = unsafe { OwnedFd::from_raw_fd(fd) };

        set_reuseaddr(listen_fd.as_raw_fd())?;
        if reuse_port {
            set_reuseport(listen_fd.as_raw_fd())?;
        }
        bind(listen_fd.as_raw_fd(), addr)?;

        let channel = Channel::new(poller, listen_fd.as_raw_fd());
        let idle_fd = Rc::new(RefCell::new(Some(open_idle_fd()?)));

        Ok(Acceptor {
            listen_fd,
            channel,
            idle_fd,
            listening: false,
        })
    }

    pub fn set_new_connection_callback(&self, mut cb: impl FnMut(RawFd, Address) + 'static) {
        let listen_fd = self.listen_fd.as_raw_fd();
        let idle_fd_cell = self.idle_fd.clone();
        self.channel.borrow_mut().set_read_callback(move || {
            loop {
                let mut peer: libc::sockaddr_in = unsafe { std::mem::zeroed() };
                let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
                match syscall!(accept4(
                    listen_fd,
                    &mut peer as *mut _ as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )) {
                    Ok(conn_fd) => {
                        let addr = Address::from(sockaddr_in_to_std(peer));
                        cb(conn_fd, addr);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.raw_os_error() == Some(libc::EMFILE) => {
                        log::warn!("Acceptor: out of file descriptors, dropping one connection");
                        drop(idle_fd_cell.borrow_mut().take());
                        let mut peer: libc::sockaddr_in = unsafe { std::mem::zeroed() };
                        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
                        let _ = syscall!(accept4(
                            listen_fd,
                            &mut peer as *mut _ as *mut libc::sockaddr,
                            &mut len,
                            libc::SOCK_CLOEXEC,
                        ));
                        if let Ok(reopened) = open_idle_fd() {
                            *idle_fd_cell.borrow_mut() = Some(reopened);
                        }
                        break;
                    }
                    Err(e) => {
                        log::error!("Acceptor: accept4 failed: {e}");
                        break;
                    }
                }
            }
        });
    }

    pub fn listen(&mut self) -> io::Result<()> {
        syscall!(listen(self.listen_fd.as_raw_fd(), libc::SOMAXCONN))?;
        self.listening = true;
        Channel::enable_reading(&self.channel)
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn local_fd(&self) -> RawFd {
        self.listen_fd.as_raw_fd()
    }
}

fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let on: libc::c_int = 1;
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEADDR,
        &on as *const _ as *const libc::c_void,
        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))?;
    Ok(())
}

fn set_reuseport(fd: RawFd) -> io::Result<()> {
    let on: libc::c_int = 1;
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEPORT,
        &on as *const _ as *const libc::c_void,
        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))?;
    Ok(())
}

fn bind(fd: RawFd, addr: Address) -> io::Result<()> {
    let sockaddr = std_to_sockaddr_in(addr);
    syscall!(bind(
        fd,
        &sockaddr as *const _ as *const libc::sockaddr,
        std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
    ))?;
    Ok(())
}

fn std_to_sockaddr_in(addr: Address) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

fn sockaddr_in_to_std(sockaddr: libc::sockaddr_in) -> std::net::SocketAddr {
    let ip = std::net::Ipv4Addr::from(sockaddr.sin_addr.s_addr.to_ne_bytes());
    let port = u16::from_be(sockaddr.sin_port);
    std::net::SocketAddr::V4(std::net::SocketAddrV4::new(ip, port))
}

fn open_idle_fd() -> io::Result<OwnedFd> {
    const DEV_NULL: &[u8] = b"/dev/null\0";
    let fd = syscall!(open(
        DEV_NULL.as_ptr() as *const libc::c_char,
        libc::O_RDONLY | libc::O_CLOEXEC,
    ))?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
