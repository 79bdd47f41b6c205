//! Shared queue of Pending tasks awaiting a worker.
//!
//! Holds task keys only; the ack tracker stays the authority on state, so a
//! key popped for a task that was cancelled or claimed elsewhere is simply
//! dropped by the worker's claim. Each key is queued at most once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::model::TaskKey;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Scheduled {
    ready_at: Instant,
    /// FIFO among equal deadlines.
    order: u64,
    key: TaskKey,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<Scheduled>>,
    queued: HashSet<TaskKey>,
    next_order: u64,
    closed: bool,
}

/// Delay-aware queue of task keys with a configured depth limit.
///
/// The limit does not block pushes (fan-out for an already accepted event
/// must not be lost); it drives back-pressure on submission instead.
pub struct PendingQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a key for immediate delivery. Returns `false` if already queued.
    pub async fn push(&self, key: TaskKey) -> bool {
        self.push_at(key, Instant::now()).await
    }

    /// Queue a key that becomes eligible after `delay`.
    pub async fn push_after(&self, key: TaskKey, delay: Duration) -> bool {
        self.push_at(key, Instant::now() + delay).await
    }

    pub async fn push_at(&self, key: TaskKey, ready_at: Instant) -> bool {
        let mut state = self.state.lock().await;
        if state.closed || !state.queued.insert(key.clone()) {
            return false;
        }
        let order = state.next_order;
        state.next_order += 1;
        state.heap.push(Reverse(Scheduled {
            ready_at,
            order,
            key,
        }));
        drop(state);
        self.notify.notify_waiters();
        true
    }

    /// Drop a queued key, e.g. after an operator cancel.
    pub async fn remove(&self, key: &TaskKey) -> bool {
        // The heap entry is skipped lazily once it reaches the top.
        self.state.lock().await.queued.remove(key)
    }

    /// Wait for the next eligible key. Returns `None` once closed.
    pub async fn pop(&self) -> Option<TaskKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                loop {
                    let Some(Reverse(top)) = state.heap.peek() else {
                        break None;
                    };
                    if !state.queued.contains(&top.key) {
                        state.heap.pop();
                        continue;
                    }
                    if top.ready_at <= Instant::now() {
                        let Some(Reverse(next)) = state.heap.pop() else {
                            break None;
                        };
                        state.queued.remove(&next.key);
                        return Some(next.key);
                    }
                    break Some(top.ready_at);
                }
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Tasks queued, including ones waiting out a retry delay.
    pub async fn depth(&self) -> usize {
        self.state.lock().await.queued.len()
    }

    /// Whether the depth limit has been reached.
    pub async fn is_saturated(&self) -> bool {
        self.depth().await >= self.capacity
    }

    /// Stop handing out work and wake every waiting worker.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_dedups_keys() {
        let queue = PendingQueue::new(10);
        assert!(queue.push(TaskKey::new(1, "a")).await);
        assert!(!queue.push(TaskKey::new(1, "a")).await);
        assert_eq!(queue.depth().await, 1);
    }

    #[tokio::test]
    async fn test_pop_is_fifo_for_ready_keys() {
        let queue = PendingQueue::new(10);
        queue.push(TaskKey::new(1, "a")).await;
        queue.push(TaskKey::new(2, "a")).await;
        queue.push(TaskKey::new(1, "b")).await;

        assert_eq!(queue.pop().await, Some(TaskKey::new(1, "a")));
        assert_eq!(queue.pop().await, Some(TaskKey::new(2, "a")));
        assert_eq!(queue.pop().await, Some(TaskKey::new(1, "b")));
        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_key_waits() {
        let queue = PendingQueue::new(10);
        queue
            .push_after(TaskKey::new(1, "late"), Duration::from_secs(5))
            .await;
        queue.push(TaskKey::new(2, "now")).await;

        assert_eq!(queue.pop().await, Some(TaskKey::new(2, "now")));

        let started = Instant::now();
        assert_eq!(queue.pop().await, Some(TaskKey::new(1, "late")));
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(PendingQueue::new(10));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;

        queue.push(TaskKey::new(7, "p")).await;
        assert_eq!(waiter.await.unwrap(), Some(TaskKey::new(7, "p")));
    }

    #[tokio::test]
    async fn test_removed_key_is_skipped() {
        let queue = PendingQueue::new(10);
        queue.push(TaskKey::new(1, "a")).await;
        queue.push(TaskKey::new(2, "a")).await;
        assert!(queue.remove(&TaskKey::new(1, "a")).await);

        assert_eq!(queue.depth().await, 1);
        assert_eq!(queue.pop().await, Some(TaskKey::new(2, "a")));
    }

    #[tokio::test]
    async fn test_saturation_and_close() {
        let queue = PendingQueue::new(2);
        queue.push(TaskKey::new(1, "a")).await;
        assert!(!queue.is_saturated().await);
        queue.push(TaskKey::new(2, "a")).await;
        assert!(queue.is_saturated().await);

        queue.close().await;
        assert_eq!(queue.pop().await, None);
        assert!(!queue.push(TaskKey::new(3, "a")).await);
    }
}
