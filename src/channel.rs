//! Binds one fd to an interest/received mask and up to four callbacks,
//! registered with a single owning `Poller`.
//!
//! Ownership runs owner -> `Rc<RefCell<Channel>>` -> (weakly) `Poller`'s
//! registry, so a `Channel` going out of scope on its owner's side is enough
//! to let the `Poller` forget about it on the next `poll`. The callbacks
//! themselves close back over a *weak* handle to their owner (see
//! `connection.rs`), which is this crate's translation of the original's
//! "tie" + "upgrade-before-dispatch" dance: instead of one upgrade gating
//! the whole dispatch, each callback performs its own upgrade-or-skip, which
//! is equivalent here because a `Channel` is only ever touched from its
//! owning loop's thread.

use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::thread::ThreadId;

use crate::poller::Poller;
use crate::ready::Ready;

pub type Callback = Box<dyn FnMut()>;

pub struct Channel {
    fd: RawFd,
    interest: Ready,
    received: Ready,
    read_cb: Option<Callback>,
    write_cb: Option<Callback>,
    close_cb: Option<Callback>,
    error_cb: Option<Callback>,
    poller: Rc<RefCell<Poller>>,
    owning_thread: ThreadId,
}

impl Channel {
    /// Creates a channel for `fd`, not yet registered with `poller` (no
    /// interest set). Call `enable_reading`/`enable_writing` to register it.
    pub fn new(poller: Rc<RefCell<Poller>>, fd: RawFd) -> Rc<RefCell<Channel>> {
        Rc::new(RefCell::new(Channel {
            fd,
            interest: Ready::NONE,
            received: Ready::NONE,
            read_cb: None,
            write_cb: None,
            close_cb: None,
            error_cb: None,
            poller,
            owning_thread: std::thread::current().id(),
        }))
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Ready {
        self.interest
    }

    pub fn set_received(&mut self, received: Ready) {
        self.received = received;
    }

    pub fn set_read_callback(&mut self, cb: impl FnMut() + 'static) {
        self.read_cb = Some(Box::new(cb));
    }

    pub fn set_write_callback(&mut self, cb: impl FnMut() + 'static) {
        self.write_cb = Some(Box::new(cb));
    }

    pub fn set_close_callback(&mut self, cb: impl FnMut() + 'static) {
        self.close_cb = Some(Box::new(cb));
    }

    pub fn set_error_callback(&mut self, cb: impl FnMut() + 'static) {
        self.error_cb = Some(Box::new(cb));
    }

    fn assert_in_loop_thread(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.owning_thread,
            "Channel touched from a thread other than its owning loop"
        );
    }

    fn update(self_rc: &Rc<RefCell<Channel>>) -> io::Result<()> {
        self_rc.borrow().assert_in_loop_thread();
        let poller = self_rc.borrow().poller.clone();
        poller.borrow_mut().update(self_rc)
    }

    pub fn enable_reading(self_rc: &Rc<RefCell<Channel>>) -> io::Result<()> {
        self_rc.borrow_mut().interest |= Ready::READABLE;
        Channel::update(self_rc)
    }

    pub fn enable_writing(self_rc: &Rc<RefCell<Channel>>) -> io::Result<()> {
        self_rc.borrow_mut().interest |= Ready::WRITABLE;
        Channel::update(self_rc)
    }

    pub fn disable_writing(self_rc: &Rc<RefCell<Channel>>) -> io::Result<()> {
        self_rc.borrow_mut().interest.remove(Ready::WRITABLE);
        Channel::update(self_rc)
    }

    pub fn is_writing(&self) -> bool {
        self.interest.is_writable()
    }

    pub fn remove(self_rc: &Rc<RefCell<Channel>>) -> io::Result<()> {
        self_rc.borrow().assert_in_loop_thread();
        let fd = self_rc.borrow().fd;
        let poller = self_rc.borrow().poller.clone();
        poller.borrow_mut().remove(fd)
    }

    /// Runs the callbacks implied by `received`, following the original's
    /// if/else-if/else dispatch order: a hangup without readable data closes
    /// the channel and returns; otherwise an error fires and returns (an
    /// error precludes read/write in the same dispatch); otherwise read and
    /// write each get a chance to fire.
    ///
    /// Takes `&Rc<RefCell<Channel>>` rather than `&mut self` so no callback
    /// runs while `self` is still borrowed -- a callback commonly re-enters
    /// this same `Channel` (e.g. `Connection::send` checking
    /// `channel.borrow().is_writing()` from inside a message callback), which
    /// would otherwise panic with a double mutable borrow.
    pub fn handle_events(self_rc: &Rc<RefCell<Channel>>) {
        let received = self_rc.borrow().received;

        if received.is_hup() && !received.is_readable() {
            Channel::fire_callback(self_rc, |ch| &mut ch.close_cb);
            return;
        }
        if received.is_error() {
            Channel::fire_callback(self_rc, |ch| &mut ch.error_cb);
            return;
        }
        if received.is_readable() || received.is_priority() {
            Channel::fire_callback(self_rc, |ch| &mut ch.read_cb);
        }
        if received.is_writable() {
            Channel::fire_callback(self_rc, |ch| &mut ch.write_cb);
        }
    }

    /// Takes a callback out of `self`, invokes it with no borrow of `self`
    /// held, and puts it back. Mirrors `Connection::fire_conn_callback`.
    fn fire_callback(self_rc: &Rc<RefCell<Channel>>, field: impl FnOnce(&mut Channel) -> &mut Option<Callback>) {
        let cb = field(&mut self_rc.borrow_mut()).take();
        if let Some(mut cb) = cb {
            cb();
            *field(&mut self_rc.borrow_mut()) = Some(cb);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.poller.borrow().contains(self.fd) {
            let _ = self.poller.borrow_mut().remove(self.fd);
        }
    }
}
