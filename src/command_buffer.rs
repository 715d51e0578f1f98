// src/command_buffer.rs
//! Double-buffered deferred command queue.
//!
//! Producers (engine thread) bracket a frame with `begin_scene`/`end_scene`
//! and push value-captured commands into the front list. The consumer
//! (render thread) swaps front and back while no scene is open, then replays
//! the back list without holding any queue lock.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

// ============================================================================
// 1. METRICS
// ============================================================================

/// Per-queue counters for profiling.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub enqueued: AtomicU64,
    pub executed: AtomicU64,
    pub discarded: AtomicU64, // commands dropped while draining for shutdown
    pub flushes: AtomicU64,
}

/// Plain copy of [`QueueMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub enqueued: u64,
    pub executed: u64,
    pub discarded: u64,
    pub flushes: u64,
}

impl QueueMetrics {
    pub fn snapshot(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// 2. SCENE GATE
// ============================================================================

/// Scene lock that can be entered and left from separate calls.
/// A swap waits for the open scene to end and blocks new scenes while it runs.
#[derive(Default)]
struct SceneGate {
    open: Mutex<bool>,
    closed: Condvar,
}

impl SceneGate {
    fn enter(&self) {
        let mut open = self.open.lock();
        while *open {
            self.closed.wait(&mut open);
        }
        *open = true;
    }

    fn leave(&self) -> bool {
        let mut open = self.open.lock();
        if !*open {
            return false;
        }
        *open = false;
        self.closed.notify_all();
        true
    }

    fn is_open(&self) -> bool {
        *self.open.lock()
    }

    fn while_closed<T>(&self, f: impl FnOnce() -> T) -> T {
        let mut open = self.open.lock();
        while *open {
            self.closed.wait(&mut open);
        }
        f()
    }
}

// ============================================================================
// 3. THE QUEUE
// ============================================================================

pub struct DeferredQueue<C> {
    name: &'static str,
    gate: SceneGate,
    front: Mutex<Vec<C>>,
    back: Mutex<Vec<C>>,
    metrics: QueueMetrics,
}

impl<C> DeferredQueue<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            gate: SceneGate::default(),
            front: Mutex::new(Vec::new()),
            back: Mutex::new(Vec::new()),
            metrics: QueueMetrics::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Blocks while another scene is open or a swap is running.
    pub fn begin_scene(&self) {
        self.gate.enter();
    }

    /// Unmatched calls are logged and ignored.
    pub fn end_scene(&self) {
        if !self.gate.leave() {
            log::warn!("{}: end_scene without begin_scene", self.name);
        }
    }

    pub fn scene_open(&self) -> bool {
        self.gate.is_open()
    }

    /// Append to the front list. Never blocks on the render thread's replay.
    #[inline]
    pub fn push(&self, command: C) {
        self.front.lock().push(command);
        self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Move the front list to the back, dropping whatever the back still held.
    /// Returns the size of the new batch.
    pub fn swap(&self) -> usize {
        self.gate.while_closed(|| {
            let mut front = self.front.lock();
            let mut back = self.back.lock();
            back.clear();
            std::mem::swap(&mut *front, &mut *back);
            back.len()
        })
    }

    /// Run every back-list command in FIFO order. The back list is kept.
    pub fn replay<F>(&self, mut execute: F) -> usize
    where
        F: FnMut(&C),
    {
        let back = self.back.lock();
        for command in back.iter() {
            execute(command);
        }
        self.metrics.executed.fetch_add(back.len() as u64, Ordering::Relaxed);
        back.len()
    }

    /// Count the back list as discarded without running it.
    pub fn skip(&self) -> usize {
        let n = self.back.lock().len();
        self.metrics.discarded.fetch_add(n as u64, Ordering::Relaxed);
        n
    }

    pub fn clear_back(&self) {
        self.back.lock().clear();
    }

    pub fn front_len(&self) -> usize {
        self.front.lock().len()
    }

    pub fn back_len(&self) -> usize {
        self.back.lock().len()
    }

    pub(crate) fn record_flush(&self) {
        self.metrics.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> QueueStats {
        self.metrics.snapshot()
    }

    /// Drop both lists.
    pub fn clear(&self) {
        self.front.lock().clear();
        self.back.lock().clear();
    }
}
