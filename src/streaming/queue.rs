//! Work queues between the render thread and loader threads
//!
//! [`NeedQueue`] carries page requests to the loaders. Consumers block while
//! it is empty and wake on [`NeedQueue::stop`]. [`LoadQueue`] carries decoded
//! pages back; the render thread drains it whole once per frame.
//!
//! Each queue holds its lock only to add or remove entries. Decoding happens
//! outside any lock.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::streaming::page::PageKey;
use crate::streaming::pool::PixelBuffer;

/// Request to decode one page
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeedTask {
    pub key: PageKey,
    /// Higher values are served first
    pub priority: i32,
}

/// Result of a decode
#[derive(Debug)]
pub enum LoadOutcome {
    Decoded(PixelBuffer),
    /// The page could not be produced; carries the reason
    Failed(String),
}

/// A finished decode on its way to the render thread
#[derive(Debug)]
pub struct LoadedTask {
    pub key: PageKey,
    pub outcome: LoadOutcome,
}

impl LoadedTask {
    pub fn decoded(key: PageKey, pixels: PixelBuffer) -> Self {
        Self { key, outcome: LoadOutcome::Decoded(pixels) }
    }

    pub fn failed(key: PageKey, reason: impl Into<String>) -> Self {
        Self { key, outcome: LoadOutcome::Failed(reason.into()) }
    }
}

/// Heap entry: priority first, then arrival order
struct Queued {
    task: NeedTask,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct NeedState {
    heap: BinaryHeap<Queued>,
    queued: HashSet<PageKey>,
    next_seq: u64,
    stopped: bool,
}

/// Blocking multi-consumer queue of page requests
#[derive(Default)]
pub struct NeedQueue {
    state: Mutex<NeedState>,
    ready: Condvar,
}

impl NeedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a request. Returns false if the page is already queued or the
    /// queue has been stopped.
    pub fn push(&self, task: NeedTask) -> bool {
        let mut state = self.lock();
        if state.stopped || !state.queued.insert(task.key) {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Queued { task, seq });
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Take the highest-priority request, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is stopped.
    pub fn pop(&self) -> Option<NeedTask> {
        let mut state = self.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(Queued { task, .. }) = state.heap.pop() {
                state.queued.remove(&task.key);
                return Some(task);
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Take a request without waiting
    pub fn try_pop(&self) -> Option<NeedTask> {
        let mut state = self.lock();
        if state.stopped {
            return None;
        }
        let Queued { task, .. } = state.heap.pop()?;
        state.queued.remove(&task.key);
        Some(task)
    }

    /// Discard queued requests and wake every waiting consumer for good.
    /// Returns the number of discarded requests.
    pub fn stop(&self) -> usize {
        let mut state = self.lock();
        state.stopped = true;
        let discarded = state.heap.len();
        state.heap.clear();
        state.queued.clear();
        drop(state);
        self.ready.notify_all();
        discarded
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Discard queued requests, keeping the queue open
    pub fn clear(&self) -> Vec<NeedTask> {
        let mut state = self.lock();
        state.queued.clear();
        let mut tasks: Vec<Queued> = state.heap.drain().collect();
        tasks.sort_by(|a, b| b.cmp(a));
        tasks.into_iter().map(|q| q.task).collect()
    }

    pub fn contains(&self, key: PageKey) -> bool {
        self.lock().queued.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}

/// Finished decodes awaiting upload
#[derive(Default)]
pub struct LoadQueue {
    tasks: Mutex<Vec<LoadedTask>>,
}

impl LoadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LoadedTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, task: LoadedTask) {
        self.lock().push(task);
    }

    /// Take every finished task in completion order. Never blocks on work.
    pub fn drain(&self) -> Vec<LoadedTask> {
        std::mem::take(&mut *self.lock())
    }

    pub fn contains(&self, key: PageKey) -> bool {
        self.lock().iter().any(|task| task.key == key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::streaming::page::PageId;
    use crate::streaming::pool::PixelFormat;

    fn key(n: u32) -> PageKey {
        PageKey::new(1, PageId::new(3, n, 0))
    }

    fn need(n: u32, priority: i32) -> NeedTask {
        NeedTask { key: key(n), priority }
    }

    #[test]
    fn test_push_rejects_duplicates() {
        let queue = NeedQueue::new();
        assert!(queue.push(need(1, 0)));
        assert!(!queue.push(need(1, 5)));
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(key(1)));

        assert_eq!(queue.pop(), Some(need(1, 0)));
        assert!(!queue.contains(key(1)));
        // Once taken, the key may be queued again
        assert!(queue.push(need(1, 0)));
    }

    #[test]
    fn test_priority_then_fifo() {
        let queue = NeedQueue::new();
        queue.push(need(1, -3));
        queue.push(need(2, -1));
        queue.push(need(3, -3));
        queue.push(need(4, -1));

        let order: Vec<u32> = std::iter::from_fn(|| queue.try_pop()).map(|t| t.key.page.row).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_stop_wakes_blocked_consumers() {
        let queue = Arc::new(NeedQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        queue.stop();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), None);
        }
        assert!(!queue.push(need(1, 0)));
    }

    #[test]
    fn test_stop_discards_queued() {
        let queue = NeedQueue::new();
        for n in 0..3 {
            queue.push(need(n, 0));
        }
        assert_eq!(queue.stop(), 3);
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_multiple_consumers_take_each_task_once() {
        let queue = Arc::new(NeedQueue::new());
        for n in 0..200 {
            queue.push(need(n, 0));
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(task) = queue.try_pop() {
                        taken.push(task.key);
                    }
                    taken
                })
            })
            .collect();

        let mut all: Vec<PageKey> = consumers.into_iter().flat_map(|c| c.join().unwrap()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 200);
    }

    #[test]
    fn test_clear_keeps_queue_open() {
        let queue = NeedQueue::new();
        queue.push(need(1, 0));
        queue.push(need(2, 4));
        let cleared = queue.clear();
        assert_eq!(cleared, vec![need(2, 4), need(1, 0)]);
        assert!(queue.is_empty());
        assert!(queue.push(need(1, 0)));
    }

    #[test]
    fn test_load_queue_drains_everything() {
        let queue = LoadQueue::new();
        let pixels = PixelBuffer::new(2, 2, PixelFormat::RGBA8);
        queue.push(LoadedTask::decoded(key(1), pixels));
        queue.push(LoadedTask::failed(key(2), "missing"));
        assert!(queue.contains(key(2)));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0].outcome, LoadOutcome::Decoded(_)));
        assert!(matches!(drained[1].outcome, LoadOutcome::Failed(ref r) if r == "missing"));
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }
}
