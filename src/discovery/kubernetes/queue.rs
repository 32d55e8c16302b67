use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    // keys waiting to be processed, queued or not
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

/// A FIFO work queue of object keys which coalesces repeated additions.
///
/// A key added while it is already queued is dropped. A key added while it
/// is being processed is queued again once `done` is called for it, so one
/// key is never processed by two workers at the same time.
#[derive(Default)]
pub struct Queue {
    state: Mutex<State>,
    notify: Notify,
}

impl Queue {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();

        {
            let mut state = self.state();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }

            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                return;
            }

            state.queue.push_back(key);
        }

        self.notify.notify_waiters();
    }

    /// Waits for the next key, `None` once the queue is shut down. Queued keys
    /// are abandoned on shutdown.
    pub async fn get(&self) -> Option<String> {
        loop {
            // registered before checking, so a concurrent `add` is not missed
            let notified = self.notify.notified();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }

                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Marks `key` as processed.
    pub fn done(&self, key: &str) {
        {
            let mut state = self.state();
            state.processing.remove(key);

            if !state.dirty.contains(key) {
                return;
            }

            state.queue.push_back(key.to_string());
        }

        self.notify.notify_waiters();
    }

    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().queue.is_empty()
    }
}
