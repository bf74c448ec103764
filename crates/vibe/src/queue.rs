//! Per-element run-queue
//!
//! A FIFO of deferred tasks drained one at a time:
//!
//! ```text
//!   push ──→ [t1][t2][t3] ──run()──→ idle? ── yes ──→ running = true, pop t1, t1(done)
//!                                      │                                    │
//!                                      no: t_current drains next  ←── done() / drop
//! ```
//!
//! A task receives a [`Completion`]. Calling [`Completion::done`], or simply
//! dropping it, clears the running flag and drains the next entry. Tasks that
//! finish synchronously are drained in a loop, not by recursion.
//!
//! Tasks pushed as one batch (the iterations of a single `delay` call) can be
//! killed together: pending entries of the batch are spliced out. Only when
//! the running task belongs to that batch is the queue forced idle and moved
//! on; other batches keep their place and timing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A queued unit of work. It owns the completion token.
pub type Task = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Identifies the entries pushed by one multi-iteration call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(u64);

struct Entry {
    batch: Option<BatchId>,
    task: Task,
}

#[derive(Default)]
struct QueueInner {
    entries: VecDeque<Entry>,
    running: bool,
    /// Batch of the running task, if it was pushed as part of one
    running_batch: Option<BatchId>,
    /// Some caller is inside the drain loop
    draining: bool,
    /// Bumped for every started task and every kill; stale completions are ignored
    ticket: u64,
    next_batch: u64,
}

/// Cheaply cloneable handle to one element's queue
#[derive(Clone, Default)]
pub struct RunQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl std::fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let q = self.lock();
        f.debug_struct("RunQueue")
            .field("pending", &q.entries.len())
            .field("running", &q.running)
            .finish()
    }
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task and kick the runner
    pub fn push(&self, task: Task) {
        self.lock().entries.push_back(Entry { batch: None, task });
        self.run();
    }

    /// Reserve a batch id for a group of tasks
    pub fn new_batch(&self) -> BatchId {
        let mut q = self.lock();
        q.next_batch += 1;
        BatchId(q.next_batch)
    }

    /// Append all tasks of a batch up front, then kick the runner once
    pub fn push_in_batch(&self, batch: BatchId, tasks: Vec<Task>) {
        {
            let mut q = self.lock();
            q.entries.extend(tasks.into_iter().map(|task| Entry {
                batch: Some(batch),
                task,
            }));
        }
        self.run();
    }

    /// Start the head task unless one is already running
    pub fn run(&self) {
        {
            let mut q = self.lock();
            if q.draining {
                return;
            }
            q.draining = true;
        }

        loop {
            let next = {
                let mut q = self.lock();
                if q.running || q.entries.is_empty() {
                    q.draining = false;
                    None
                } else {
                    q.running = true;
                    q.ticket += 1;
                    let ticket = q.ticket;
                    let entry = q.entries.pop_front();
                    q.running_batch = entry.as_ref().and_then(|entry| entry.batch);
                    entry.map(|entry| (entry.task, ticket))
                }
            };

            match next {
                Some((task, ticket)) => task(Completion {
                    queue: self.clone(),
                    ticket,
                    finished: false,
                }),
                None => break,
            }
        }
    }

    /// Remove every pending entry of `batch`.
    ///
    /// If the running task belongs to `batch`, its completion becomes stale
    /// and the queue moves on to the next entry. A task from any other batch
    /// keeps running undisturbed. Returns the number of entries removed.
    pub fn kill(&self, batch: BatchId) -> usize {
        let (removed, was_running) = {
            let mut q = self.lock();
            let before = q.entries.len();
            q.entries.retain(|entry| entry.batch != Some(batch));
            let was_running = q.running && q.running_batch == Some(batch);
            if was_running {
                q.running = false;
                q.running_batch = None;
                q.ticket += 1;
            }
            (before - q.entries.len(), was_running)
        };
        tracing::debug!(
            "run-queue batch {:?} killed, {} pending entries removed, running: {}",
            batch,
            removed,
            was_running
        );
        if was_running {
            self.run();
        }
        removed
    }

    /// Drop all pending entries without touching the running task
    pub fn clear(&self) -> usize {
        let mut q = self.lock();
        let removed = q.entries.len();
        q.entries.clear();
        removed
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Number of entries not yet started
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn finish(&self, ticket: u64) {
        {
            let mut q = self.lock();
            if q.ticket != ticket || !q.running {
                return;
            }
            q.running = false;
            q.running_batch = None;
        }
        self.run();
    }
}

/// Completion token for the running task
#[must_use = "dropping a Completion immediately finishes the task"]
pub struct Completion {
    queue: RunQueue,
    ticket: u64,
    finished: bool,
}

impl Completion {
    /// Mark the task finished and drain the next entry
    pub fn done(mut self) {
        self.finished = true;
        self.queue.finish(self.ticket);
    }

    /// Whether a kill has overtaken this task
    pub fn is_stale(&self) -> bool {
        self.queue.lock().ticket != self.ticket
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.finished {
            self.queue.finish(self.ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn logger() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Task) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |name: &str| -> Task {
            let sink = sink.clone();
            let name = name.to_string();
            Box::new(move |done: Completion| {
                sink.lock().unwrap().push(name);
                done.done();
            })
        };
        (log, make)
    }

    #[test]
    fn test_sync_tasks_drain_in_order() {
        let (log, task) = logger();
        let queue = RunQueue::new();
        for name in ["a", "b", "c"] {
            queue.push(task(name));
        }
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(!queue.is_running());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_held_completion_blocks_queue() {
        let (log, task) = logger();
        let queue = RunQueue::new();
        let held = Arc::new(StdMutex::new(None));

        let slot = held.clone();
        queue.push(Box::new(move |done| {
            *slot.lock().unwrap() = Some(done);
        }));
        queue.push(task("after"));

        assert!(queue.is_running());
        assert_eq!(queue.len(), 1);
        assert!(log.lock().unwrap().is_empty());

        // calling run again while busy is a no-op
        queue.run();
        assert!(log.lock().unwrap().is_empty());

        let done = held.lock().unwrap().take().unwrap();
        done.done();
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn test_dropped_completion_does_not_stall() {
        let (log, task) = logger();
        let queue = RunQueue::new();
        queue.push(Box::new(|_done| {}));
        queue.push(task("next"));
        assert_eq!(*log.lock().unwrap(), vec!["next"]);
    }

    #[test]
    fn test_kill_removes_only_its_batch() {
        let (log, task) = logger();
        let queue = RunQueue::new();
        let held = Arc::new(StdMutex::new(None));

        // a batch of 4 whose first entry holds the queue
        let batch = queue.new_batch();
        let slot = held.clone();
        let mut tasks: Vec<Task> = vec![Box::new(move |done| {
            *slot.lock().unwrap() = Some(done);
        })];
        tasks.extend(["a2", "a3", "a4"].map(|n| task(n)));
        queue.push_in_batch(batch, tasks);
        queue.push(task("b1"));
        queue.push(task("b2"));
        assert_eq!(queue.len(), 5);

        assert_eq!(queue.kill(batch), 3);
        assert_eq!(*log.lock().unwrap(), vec!["b1", "b2"]);

        // the killed task finishing late must not disturb anything
        let stale = held.lock().unwrap().take().unwrap();
        assert!(stale.is_stale());
        stale.done();
        assert!(!queue.is_running());
    }

    #[test]
    fn test_stale_completion_cannot_release_successor() {
        let queue = RunQueue::new();
        let first = Arc::new(StdMutex::new(None));
        let second = Arc::new(StdMutex::new(None));

        let batch = queue.new_batch();
        let slot = first.clone();
        queue.push_in_batch(
            batch,
            vec![Box::new(move |done| {
                *slot.lock().unwrap() = Some(done);
            })],
        );
        let slot = second.clone();
        queue.push(Box::new(move |done| {
            *slot.lock().unwrap() = Some(done);
        }));

        queue.kill(batch);
        assert!(second.lock().unwrap().is_some());
        assert!(queue.is_running());

        drop(first.lock().unwrap().take());
        assert!(queue.is_running(), "stale completion released the successor");
    }

    #[test]
    fn test_kill_pending_batch_leaves_running_task_alone() {
        let (log, task) = logger();
        let queue = RunQueue::new();
        let held = Arc::new(StdMutex::new(None));

        let running = queue.new_batch();
        let slot = held.clone();
        let mut tasks: Vec<Task> = vec![Box::new(move |done| {
            *slot.lock().unwrap() = Some(done);
        })];
        tasks.push(task("a2"));
        queue.push_in_batch(running, tasks);

        let pending = queue.new_batch();
        queue.push_in_batch(pending, vec![task("b1"), task("b2")]);
        queue.push(task("c"));
        assert_eq!(queue.len(), 4);

        assert_eq!(queue.kill(pending), 2);
        assert!(queue.is_running());
        assert!(log.lock().unwrap().is_empty());

        let done = held.lock().unwrap().take().unwrap();
        assert!(!done.is_stale());
        done.done();
        assert_eq!(*log.lock().unwrap(), vec!["a2", "c"]);
        assert!(!queue.is_running());
    }

    #[test]
    fn test_kill_finished_batch_is_noop() {
        let (log, task) = logger();
        let queue = RunQueue::new();
        let held = Arc::new(StdMutex::new(None));

        let finished = queue.new_batch();
        queue.push_in_batch(finished, vec![task("a1")]);

        let slot = held.clone();
        queue.push(Box::new(move |done| {
            *slot.lock().unwrap() = Some(done);
        }));
        queue.push(task("c"));

        assert_eq!(queue.kill(finished), 0);
        assert!(queue.is_running());
        assert_eq!(*log.lock().unwrap(), vec!["a1"]);

        let done = held.lock().unwrap().take().unwrap();
        assert!(!done.is_stale());
        done.done();
        assert_eq!(*log.lock().unwrap(), vec!["a1", "c"]);
    }
}
