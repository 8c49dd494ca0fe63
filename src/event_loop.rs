//! The per-thread reactor: owns a `Poller`, dispatches ready channels, and
//! drains a cross-thread task queue each iteration.
//!
//! `EventLoop` itself is `!Send` (it owns `Rc`-based `Channel`s and must
//! never be touched from any thread but the one that created it). The bits
//! other threads legitimately need -- `run_in_loop`, `queue_in_loop`,
//! `quit`, `is_in_loop_thread` -- live on [`EventLoopHandle`], a small
//! `Send + Sync` struct that can be freely `Arc`'d out to callers such as
//! `TcpServer` and `LoopPool`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use crate::channel::Channel;
use crate::poller::Poller;

type Task = Box<dyn FnOnce() + Send>;

thread_local! {
    static HAS_LOOP: Cell<bool> = Cell::new(false);
    static CURRENT_POLLER: RefCell<Option<Rc<RefCell<Poller>>>> = RefCell::new(None);
}

/// Fetches the `Poller` belonging to the `EventLoop` running on this
/// thread. Lets code that only has an `EventLoopHandle` (e.g. a task posted
/// via `run_in_loop`) reach the `Poller` it needs to build a `Channel`,
/// without threading a `Rc` through the `Send` boundary.
///
/// # Panics
///
/// Panics if no `EventLoop` has been constructed on the calling thread.
pub fn current_poller() -> Rc<RefCell<Poller>> {
    CURRENT_POLLER.with(|p| {
        p.borrow()
            .clone()
            .expect("current_poller: no EventLoop running on this thread")
    })
}

/// Blocks indefinitely on `poll` when idle; the wakeup fd bounds real-world
/// latency for posted tasks to effectively zero, so there's no need for a
/// periodic timeout here.
const POLL_TIMEOUT: Option<Duration> = None;

/// The `Send + Sync` half of an `EventLoop`: everything a task poster on a
/// foreign thread is allowed to touch.
pub struct EventLoopHandle {
    wakeup_fd: RawFd,
    pending: Mutex<VecDeque<Task>>,
    draining: AtomicBool,
    quit: AtomicBool,
    thread_id: ThreadId,
}

// SAFETY: every field is itself Send + Sync; RawFd is a plain descriptor
// number, never dereferenced directly by this struct (the owning EventLoop
// does that, on its own thread, through the Channel it registered).
unsafe impl Send for EventLoopHandle {}
unsafe impl Sync for EventLoopHandle {}

impl EventLoopHandle {
    pub fn is_in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    pub fn assert_in_loop_thread(&self) {
        assert!(
            self.is_in_loop_thread(),
            "EventLoop used from a thread other than the one that created it"
        );
    }

    /// Runs `f` on this loop's thread: immediately if already there,
    /// otherwise posted via `queue_in_loop`.
    pub fn run_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_in_loop_thread() {
            f();
        } else {
            self.queue_in_loop(f);
        }
    }

    /// Always defers `f` to the next loop iteration, waking the loop if it
    /// may be blocked in `poll` -- either because we're posting from
    /// another thread, or because we're already inside
    /// `run_pending_tasks` and a naive implementation would leave `f`
    /// stranded until some *other* wakeup happened to arrive.
    pub fn queue_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut pending = self.pending.lock().unwrap();
            pending.push_back(Box::new(f));
        }
        if !self.is_in_loop_thread() || self.draining.load(Ordering::Acquire) {
            self.wakeup();
        }
    }

    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            self.wakeup();
        }
    }

    fn wakeup(&self) {
        let one: u64 = 1;
        if let Err(e) = syscall!(write(
            self.wakeup_fd,
            &one as *const u64 as *const libc::c_void,
            std::mem::size_of::<u64>()
        )) {
            log::warn!("EventLoop::wakeup failed: {e}");
        }
    }

    fn drain_pending(&self) -> Vec<Task> {
        let mut pending = self.pending.lock().unwrap();
        pending.drain(..).collect()
    }
}

pub struct EventLoop {
    handle: Arc<EventLoopHandle>,
    poller: Rc<RefCell<Poller>>,
    wakeup_channel: Rc<RefCell<Channel>>,
}

impl EventLoop {
    /// Creates a loop bound to the calling thread. Panics if this thread
    /// already hosts one, enforcing the one-loop-per-thread invariant.
    pub fn new() -> io::Result<EventLoop> {
        HAS_LOOP.with(|flag| {
            if flag.get() {
                panic!("EventLoop::new: this thread already owns an EventLoop");
            }
            flag.set(true);
        });

        let poller = Rc::new(RefCell::new(Poller::new()?));
        let wakeup_fd = syscall!(eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC))?;
        let wakeup_channel = Channel::new(poller.clone(), wakeup_fd);

        let handle = Arc::new(EventLoopHandle {
            wakeup_fd,
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            thread_id: std::thread::current().id(),
        });

        {
            let mut ch = wakeup_channel.borrow_mut();
            ch.set_read_callback(move || {
                let mut buf = [0u8; 8];
                // Best-effort: EAGAIN just means another wakeup already
                // drained the counter this tick.
                let _ = syscall!(read(wakeup_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()));
            });
        }
        Channel::enable_reading(&wakeup_channel)?;

        CURRENT_POLLER.with(|p| *p.borrow_mut() = Some(poller.clone()));

        Ok(EventLoop {
            handle,
            poller,
            wakeup_channel,
        })
    }

    /// Returns a cheaply-clonable, `Send + Sync` handle that other threads
    /// use to post work onto this loop.
    pub fn handle(&self) -> Arc<EventLoopHandle> {
        self.handle.clone()
    }

    pub fn is_in_loop_thread(&self) -> bool {
        self.handle.is_in_loop_thread()
    }

    pub fn assert_in_loop_thread(&self) {
        self.handle.assert_in_loop_thread();
    }

    pub fn poller(&self) -> Rc<RefCell<Poller>> {
        self.poller.clone()
    }

    /// Runs the reactor loop until `quit()` is called (from any thread, via
    /// the handle).
    pub fn run(&self) {
        self.assert_in_loop_thread();
        log::debug!("EventLoop starting on {:?}", self.handle.thread_id);
        while !self.handle.quit.load(Ordering::Acquire) {
            let ready = match self.poller.borrow_mut().poll(POLL_TIMEOUT) {
                Ok(ready) => ready,
                Err(e) => {
                    log::error!("EventLoop: poll failed: {e}");
                    continue;
                }
            };
            for channel in ready {
                Channel::handle_events(&channel);
            }
            self.run_pending_tasks();
        }
        log::debug!("EventLoop stopping on {:?}", self.handle.thread_id);
    }

    pub fn run_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.run_in_loop(f)
    }

    pub fn queue_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.queue_in_loop(f)
    }

    pub fn quit(&self) {
        self.handle.quit();
    }

    fn run_pending_tasks(&self) {
        let tasks = self.handle.drain_pending();
        if tasks.is_empty() {
            return;
        }
        self.handle.draining.store(true, Ordering::Release);
        for task in tasks {
            task();
        }
        self.handle.draining.store(false, Ordering::Release);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let _ = Channel::remove(&self.wakeup_channel);
        let _ = syscall!(close(self.handle.wakeup_fd));
        HAS_LOOP.with(|flag| flag.set(false));
        CURRENT_POLLER.with(|p| *p.borrow_mut() = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn run_in_loop_executes_immediately_on_owning_thread() {
        let lp = EventLoop::new().unwrap();
        let ran = Cell::new(false);
        lp.run_in_loop(|| {});
        lp.handle().run_in_loop(|| {});
        ran.set(true);
        assert!(ran.get());
    }

    #[test]
    fn cross_thread_task_runs_and_quits_loop() {
        let lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let counter = Arc::new(AtomicUsize::new(0));

        let poster_handle = handle.clone();
        let counter2 = counter.clone();
        let inner_handle = handle.clone();
        let poster = thread::spawn(move || {
            poster_handle.queue_in_loop(move || {
                // Runs on the loop thread: safe to quit from here without
                // racing `run`'s initial `while !quit` check.
                counter2.fetch_add(1, Ordering::SeqCst);
                inner_handle.quit();
            });
        });

        poster.join().unwrap();
        lp.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
