//! A base loop (the one `TcpServer` itself runs on) plus zero or more
//! dedicated I/O-loop threads, handed out round-robin to spread accepted
//! connections across cores.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::event_loop::EventLoopHandle;
use crate::loop_thread::LoopThread;

pub struct LoopPool {
    base_loop: Arc<EventLoopHandle>,
    io_loops: Vec<LoopThread>,
    next: AtomicUsize,
}

impl LoopPool {
    pub fn new(base_loop: Arc<EventLoopHandle>) -> LoopPool {
        LoopPool {
            base_loop,
            io_loops: Vec::new(),
            next: AtomicUsize::new(0),
        }
    }

    /// Spawns `num_threads` I/O-loop threads named `{name_prefix}-{i}`. With
    /// `num_threads == 0` every connection is handled on the base loop
    /// instead, matching the original's single-threaded fallback.
    pub fn start(&mut self, num_threads: usize, name_prefix: &str) -> io::Result<()> {
        for i in 0..num_threads {
            self.io_loops.push(LoopThread::spawn(format!("{name_prefix}-{i}"))?);
        }
        Ok(())
    }

    /// Round-robins across the I/O loops, or returns the base loop if none
    /// were started.
    pub fn next_loop(&self) -> Arc<EventLoopHandle> {
        if self.io_loops.is_empty() {
            return self.base_loop.clone();
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.io_loops.len();
        self.io_loops[i].handle()
    }

    pub fn num_loops(&self) -> usize {
        self.io_loops.len().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;

    #[test]
    fn empty_pool_always_returns_base_loop() {
        let base = EventLoop::new().unwrap();
        let base_handle = base.handle();
        let pool = LoopPool::new(base_handle.clone());
        for _ in 0..3 {
            assert!(Arc::ptr_eq(&pool.next_loop(), &base_handle));
        }
    }

    #[test]
    fn pool_round_robins_across_io_loops() {
        let base = EventLoop::new().unwrap();
        let mut pool = LoopPool::new(base.handle());
        pool.start(2, "io").unwrap();

        let first = pool.next_loop();
        let second = pool.next_loop();
        let third = pool.next_loop();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
    }
}
