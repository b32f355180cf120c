//! Blocking priority work queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::{Priority, TaskId};

/// A task waiting to be dequeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub task_id: TaskId,
    pub priority: Priority,
    sequence: u64,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // BinaryHeap pops the greatest entry: lowest priority value first, then
    // lowest sequence number. Task ids never take part in ordering.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A retry waiting out its backoff delay.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledEntry {
    due: Instant,
    order: u64,
    task_id: TaskId,
    priority: Priority,
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    // Earliest due first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.order.cmp(&self.order))
    }
}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<QueueEntry>,
    scheduled: BinaryHeap<ScheduledEntry>,
    next_sequence: u64,
    closed: bool,
}

impl QueueState {
    fn push_ready(&mut self, task_id: TaskId, priority: Priority) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.ready.push(QueueEntry {
            task_id,
            priority,
            sequence,
        });
    }

    /// Move due retries to the ready heap. They get a fresh sequence number,
    /// so they line up behind everything of equal priority already waiting.
    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.due > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.push_ready(entry.task_id, entry.priority);
            }
        }
    }
}

/// Thread-safe priority queue with blocking dequeue.
///
/// Ordering: priority first (High before Normal before Low), FIFO by
/// enqueue sequence within a priority. Callers never lock anything.
#[derive(Default)]
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task behind all queued tasks of the same priority.
    /// Returns false when the queue is closed.
    pub async fn enqueue(&self, task_id: TaskId, priority: Priority) -> bool {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return false;
            }
            state.push_ready(task_id, priority);
        }
        self.notify.notify_one();
        true
    }

    /// Enqueue once `delay` has elapsed. The task keeps its priority and is
    /// sequenced at the moment it becomes due.
    pub async fn enqueue_after(&self, task_id: TaskId, priority: Priority, delay: Duration) -> bool {
        if delay.is_zero() {
            return self.enqueue(task_id, priority).await;
        }
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return false;
            }
            let order = state.next_sequence;
            state.next_sequence += 1;
            state.scheduled.push(ScheduledEntry {
                due: Instant::now() + delay,
                order,
                task_id,
                priority,
            });
        }
        // A sleeping worker has to recompute its wake-up time.
        self.notify.notify_one();
        true
    }

    /// Wait for the next task. Returns `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<QueueEntry> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent enqueue cannot
            // slip in between the check and the wait.
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(entry) = state.ready.pop() {
                    let more = !state.ready.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(entry);
                }
                state.scheduled.peek().map(|entry| entry.due)
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(due) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Stop handing out tasks and wake every waiting worker.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Tasks waiting for a worker, including retries still in backoff.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.scheduled.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn drain(queue: &PriorityQueue, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..n {
            let entry = tokio::time::timeout(Duration::from_millis(100), queue.dequeue())
                .await
                .unwrap()
                .unwrap();
            out.push(entry.task_id.to_string());
        }
        out
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let queue = PriorityQueue::new();
        queue.enqueue(TaskId::new("a"), Priority::Normal).await;
        queue.enqueue(TaskId::new("b"), Priority::High).await;
        queue.enqueue(TaskId::new("c"), Priority::Normal).await;
        queue.enqueue(TaskId::new("d"), Priority::Low).await;

        assert_eq!(drain(&queue, 4).await, vec!["b", "a", "c", "d"]);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo_regardless_of_id_order() {
        let queue = PriorityQueue::new();
        for id in ["zeta", "alpha", "mu"] {
            queue.enqueue(TaskId::new(id), Priority::Low).await;
        }
        assert_eq!(drain(&queue, 3).await, vec!["zeta", "alpha", "mu"]);
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let queue = Arc::new(PriorityQueue::new());
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        queue.enqueue(TaskId::new("late"), Priority::Normal).await;

        let entry = waiter.await.unwrap().unwrap();
        assert_eq!(entry.task_id.as_str(), "late");
    }

    #[tokio::test]
    async fn concurrent_enqueues_wake_every_waiter() {
        let queue = Arc::new(PriorityQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for id in ["x", "y", "z"] {
            queue.enqueue(TaskId::new(id), Priority::Normal).await;
        }
        for waiter in waiters {
            let got = tokio::time::timeout(Duration::from_millis(200), waiter)
                .await
                .unwrap()
                .unwrap();
            assert!(got.is_some());
        }
    }

    #[tokio::test]
    async fn close_releases_waiters_and_rejects_enqueue() {
        let queue = Arc::new(PriorityQueue::new());
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close().await;
        assert!(waiter.await.unwrap().is_none());
        assert!(!queue.enqueue(TaskId::new("x"), Priority::High).await);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn delayed_entry_lines_up_behind_waiting_peers() {
        let queue = PriorityQueue::new();
        queue
            .enqueue_after(TaskId::new("retry"), Priority::Normal, Duration::from_millis(30))
            .await;
        queue.enqueue(TaskId::new("fresh"), Priority::Normal).await;
        assert_eq!(queue.len().await, 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        queue.enqueue(TaskId::new("later"), Priority::Normal).await;

        // "retry" became due before "later" was enqueued, but it is only
        // sequenced when promoted, which happens on the next dequeue.
        assert_eq!(drain(&queue, 3).await, vec!["fresh", "later", "retry"]);
    }

    #[tokio::test]
    async fn dequeue_wakes_when_delayed_entry_becomes_due() {
        let queue = PriorityQueue::new();
        queue
            .enqueue_after(TaskId::new("retry"), Priority::High, Duration::from_millis(30))
            .await;

        let start = Instant::now();
        let entry = tokio::time::timeout(Duration::from_millis(500), queue.dequeue())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.task_id.as_str(), "retry");
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
