//! Spawns a dedicated OS thread that owns exactly one `EventLoop`, and
//! blocks the caller until that loop has been constructed and is ready to
//! accept posted work.

use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::event_loop::{EventLoop, EventLoopHandle};

pub struct LoopThread {
    handle: Arc<EventLoopHandle>,
    join_handle: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// Spawns the thread and blocks until its `EventLoop` is constructed.
    /// `name` is used only for the spawned thread's OS-visible name (useful
    /// in `top`/`ps`/panics).
    pub fn spawn(name: impl Into<String>) -> io::Result<LoopThread> {
        let (tx, rx) = mpsc::channel::<io::Result<Arc<EventLoopHandle>>>();

        let join_handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || match EventLoop::new() {
                Ok(event_loop) => {
                    let handle = event_loop.handle();
                    if tx.send(Ok(handle)).is_err() {
                        return;
                    }
                    event_loop.run();
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            })?;

        let handle = rx
            .recv()
            .expect("loop thread dropped its handle sender before publishing")?;

        Ok(LoopThread {
            handle,
            join_handle: Some(join_handle),
        })
    }

    pub fn handle(&self) -> Arc<EventLoopHandle> {
        self.handle.clone()
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.handle.quit();
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn spawned_loop_accepts_posted_work() {
        let lt = LoopThread::spawn("test-loop").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        lt.handle().queue_in_loop(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        // Dropping `lt` joins the thread only after `quit()`; give the
        // posted task a moment to land first by looping on the counter.
        for _ in 0..1000 {
            if counter.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::yield_now();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
