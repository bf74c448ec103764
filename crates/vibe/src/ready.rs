//! Ready gate
//!
//! One-shot: callbacks registered before the gate opens are kept in a FIFO
//! list and run exactly once when it opens. While that list drains, new
//! registrations (from any thread, or from a pending callback itself) join
//! its tail. Once drained, callbacks run immediately on the caller's stack.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct GateState {
    open: bool,
    /// `open()` is still working through `pending`
    draining: bool,
    pending: VecDeque<ReadyCallback>,
}

pub struct ReadyGate {
    state: Mutex<GateState>,
    signal: watch::Sender<bool>,
}

impl ReadyGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            signal: watch::Sender::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` once the gate is open
    pub fn when_ready(&self, f: ReadyCallback) {
        {
            let mut state = self.lock();
            if !state.open || state.draining {
                state.pending.push_back(f);
                return;
            }
        }
        f();
    }

    /// Open the gate. Returns false if it was already open.
    pub fn open(&self) -> bool {
        {
            let mut state = self.lock();
            if state.open {
                return false;
            }
            state.open = true;
            state.draining = true;
            tracing::debug!("ready gate open, running {} pending callbacks", state.pending.len());
        }

        self.signal.send_replace(true);
        loop {
            let next = {
                let mut state = self.lock();
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };
            match next {
                Some(f) => f(),
                None => break,
            }
        }
        true
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Resolves once the gate is open
    pub async fn wait(&self) {
        let mut rx = self.signal.subscribe();
        // the sender lives in self, so this cannot fail while we are borrowed
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_pending_callbacks_run_once_in_order() {
        let gate = ReadyGate::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            gate.when_ready(Box::new(move || log.lock().unwrap().push(i)));
        }
        assert_eq!(gate.pending(), 3);
        assert!(log.lock().unwrap().is_empty());

        assert!(gate.open());
        assert!(!gate.open());
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);

        let late = log.clone();
        gate.when_ready(Box::new(move || late.lock().unwrap().push(9)));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 9]);
    }

    #[test]
    fn test_wait_resolves_on_open() {
        let gate = ReadyGate::new();
        let mut wait = task::spawn(gate.wait());
        assert_pending!(wait.poll());

        gate.open();
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_callback_may_register_another() {
        let gate = Arc::new(ReadyGate::new());
        let hits = Arc::new(StdMutex::new(0));

        let inner_gate = gate.clone();
        let inner_hits = hits.clone();
        gate.when_ready(Box::new(move || {
            let hits = inner_hits.clone();
            inner_gate.when_ready(Box::new(move || *hits.lock().unwrap() += 1));
        }));
        gate.open();
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_registration_during_drain_keeps_fifo() {
        let gate = Arc::new(ReadyGate::new());
        let log = Arc::new(StdMutex::new(Vec::new()));

        let inner_gate = gate.clone();
        let inner_log = log.clone();
        gate.when_ready(Box::new(move || {
            inner_log.lock().unwrap().push("first");
            let late = inner_log.clone();
            inner_gate.when_ready(Box::new(move || late.lock().unwrap().push("late")));
        }));
        for name in ["second", "third"] {
            let log = log.clone();
            gate.when_ready(Box::new(move || log.lock().unwrap().push(name)));
        }

        gate.open();
        assert_eq!(*log.lock().unwrap(), ["first", "second", "third", "late"]);
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn test_registration_from_other_thread_during_drain() {
        let gate = Arc::new(ReadyGate::new());
        let log = Arc::new(StdMutex::new(Vec::new()));

        let other = gate.clone();
        let other_log = log.clone();
        let first_log = log.clone();
        gate.when_ready(Box::new(move || {
            first_log.lock().unwrap().push("first");
            std::thread::spawn(move || {
                let log = other_log.clone();
                other.when_ready(Box::new(move || log.lock().unwrap().push("other")));
            })
            .join()
            .unwrap();
        }));
        let second_log = log.clone();
        gate.when_ready(Box::new(move || second_log.lock().unwrap().push("second")));

        gate.open();
        assert_eq!(*log.lock().unwrap(), ["first", "second", "other"]);
    }
}
