//! Thin `epoll` wrapper: a registry of `fd -> Channel` plus the raw kernel
//! handle. Kept level-triggered throughout, unlike `mio`'s default
//! edge-triggered selector, because the `Channel`/`Buffer` pairing above it
//! assumes a re-fired event whenever unread bytes remain.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::channel::Channel;
use crate::ready::Ready;

const INITIAL_EVENT_CAPACITY: usize = 16;
const GROW_FACTOR: f64 = 1.5;
const SHRINK_FACTOR: f64 = 0.5;
const GROW_THRESHOLD: f64 = 0.9;
const SHRINK_THRESHOLD: f64 = 0.25;

pub struct Poller {
    epoll_fd: OwnedFd,
    channels: HashMap<RawFd, Weak<RefCell<Channel>>>,
    events: Vec<libc::epoll_event>,
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Poller {
            // SAFETY: `epoll_create1` just handed us ownership of `fd`.
            epoll_fd: unsafe { OwnedFd::from_raw_fd(fd) },
            channels: HashMap::new(),
            events: vec![libc::epoll_event { events: 0, u64: 0 }; INITIAL_EVENT_CAPACITY],
        })
    }

    /// Registers or updates `channel`'s interest. `ADD` vs `MOD` is chosen by
    /// whether the fd is already tracked, matching the original
    /// `Poller::updateChannel`'s `index_` bookkeeping.
    pub fn update(&mut self, channel: &Rc<RefCell<Channel>>) -> io::Result<()> {
        let fd = channel.borrow().fd();
        let interest = channel.borrow().interest();
        let mut ev = libc::epoll_event {
            events: to_epoll_bits(interest),
            u64: fd as u64,
        };
        let op = if self.channels.contains_key(&fd) {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        syscall!(epoll_ctl(self.epoll_fd.as_raw_fd(), op, fd, &mut ev))?;
        self.channels.insert(fd, Rc::downgrade(channel));
        Ok(())
    }

    pub fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        if self.channels.remove(&fd).is_none() {
            return Ok(());
        }
        // Passing a non-null event pointer works around a documented Linux
        // bug present in kernels older than 2.6.9.
        let mut ev = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(self.epoll_fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, &mut ev))?;
        Ok(())
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.channels.contains_key(&fd)
    }

    /// Blocks for up to `timeout` (or forever if `None`), returning every
    /// channel whose `received` mask was just refreshed. Dead weak entries
    /// (owner already dropped) are pruned silently.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Rc<RefCell<Channel>>>> {
        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        let n = loop {
            match syscall!(epoll_wait(
                self.epoll_fd.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms,
            )) {
                Ok(n) => break n as usize,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        let mut ready = Vec::with_capacity(n);
        let mut stale = Vec::new();
        for ev in &self.events[..n] {
            let fd = ev.u64 as RawFd;
            match self.channels.get(&fd).and_then(Weak::upgrade) {
                Some(channel) => {
                    channel.borrow_mut().set_received(from_epoll_bits(ev.events));
                    ready.push(channel);
                }
                None => stale.push(fd),
            }
        }
        for fd in stale {
            self.channels.remove(&fd);
        }

        self.resize_events(n);
        Ok(ready)
    }

    fn resize_events(&mut self, returned: usize) {
        let cap = self.events.len();
        let fill = returned as f64 / cap as f64;
        if fill >= GROW_THRESHOLD {
            let new_cap = ((cap as f64) * GROW_FACTOR).ceil() as usize;
            self.events.resize(new_cap, libc::epoll_event { events: 0, u64: 0 });
        } else if fill <= SHRINK_THRESHOLD && cap > INITIAL_EVENT_CAPACITY {
            let new_cap = (((cap as f64) * SHRINK_FACTOR).ceil() as usize).max(INITIAL_EVENT_CAPACITY);
            self.events.truncate(new_cap);
        }
    }
}

fn to_epoll_bits(interest: Ready) -> u32 {
    let mut bits = 0u32;
    if interest.is_readable() {
        bits |= (libc::EPOLLIN | libc::EPOLLPRI) as u32;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

fn from_epoll_bits(bits: u32) -> Ready {
    let mut received = Ready::NONE;
    let bits = bits as i32;
    if bits & libc::EPOLLIN != 0 {
        received |= Ready::READABLE;
    }
    if bits & libc::EPOLLPRI != 0 {
        received |= Ready::PRIORITY;
    }
    if bits & libc::EPOLLOUT != 0 {
        received |= Ready::WRITABLE;
    }
    if bits & libc::EPOLLHUP != 0 {
        received |= Ready::HUP;
    }
    if bits & libc::EPOLLERR != 0 {
        received |= Ready::ERROR;
    }
    received
}
