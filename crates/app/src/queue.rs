//! Per-adapter serializing queue.
//!
//! Bounds how many operations run concurrently against one physical
//! device (default one), so overlapping requests never race on the same
//! resource. Items carry an optional coalescing id: adding an item whose
//! id matches a queued (not yet running) item replaces it in place,
//! superseding stale requests such as repeated pulls.
//!
//! Completion is signaled through an owned, single-use
//! [`CompletionToken`]; the running action must complete it exactly once
//! to free its slot. A token dropped without completing logs a warning
//! and still frees the slot so the queue cannot stall.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Queue length above which [`SerialQueue::add`] logs a warning.
const LONG_QUEUE_WARNING: usize = 10;

type RunFn = Box<dyn FnOnce(CompletionToken) + Send + 'static>;

/// One deferred adapter operation.
pub struct QueueItem {
    id: Option<String>,
    run: RunFn,
}

impl QueueItem {
    /// Item without a coalescing id; always appended.
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(CompletionToken) + Send + 'static,
    {
        Self {
            id: None,
            run: Box::new(run),
        }
    }

    /// Item with a coalescing id; replaces a queued item with the same
    /// id instead of appending.
    pub fn keyed<F>(id: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(CompletionToken) + Send + 'static,
    {
        Self {
            id: Some(id.into()),
            run: Box::new(run),
        }
    }
}

impl std::fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItem").field("id", &self.id).finish()
    }
}

/// Single-use completion signal for a running queue item.
///
/// Consuming [`complete`](Self::complete) guarantees the exactly-once
/// contract by move semantics.
pub struct CompletionToken {
    inner: Arc<QueueInner>,
    qid: u64,
    completed: bool,
}

impl CompletionToken {
    /// Mark the item finished, freeing its slot and starting the next
    /// eligible item.
    pub fn complete(mut self) {
        self.completed = true;
        finish(&self.inner, self.qid);
    }
}

impl Drop for CompletionToken {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(
                queue = %self.inner.name,
                qid = self.qid,
                "completion token dropped without complete; freeing slot"
            );
            finish(&self.inner, self.qid);
        }
    }
}

impl std::fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionToken")
            .field("queue", &self.inner.name)
            .field("qid", &self.qid)
            .finish()
    }
}

struct PendingItem {
    qid: u64,
    id: Option<String>,
    run: RunFn,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingItem>,
    running: Vec<u64>,
    next_qid: u64,
    paused: bool,
}

struct QueueInner {
    name: String,
    width: usize,
    state: Mutex<QueueState>,
}

/// FIFO executor bounding concurrent in-flight operations per adapter.
///
/// Cheap to clone; all clones share the same queue.
#[derive(Clone)]
pub struct SerialQueue {
    inner: Arc<QueueInner>,
}

impl SerialQueue {
    /// Create a queue allowing `width` concurrent operations.
    #[must_use]
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                width: width.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Create a queue with the default width of one.
    #[must_use]
    pub fn with_default_width(name: impl Into<String>) -> Self {
        Self::new(name, 1)
    }

    /// Queue name, used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Append an item, or replace a queued item with the same id.
    ///
    /// Items run in arrival order except for replacement; replacement
    /// keeps the superseded item's position.
    pub fn add(&self, item: QueueItem) {
        let (pending_len, paused) = {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            let qid = state.next_qid;
            state.next_qid += 1;

            let replaced = item.id.as_ref().and_then(|id| {
                state
                    .pending
                    .iter()
                    .position(|queued| queued.id.as_deref() == Some(id))
            });
            let pending = PendingItem {
                qid,
                id: item.id,
                run: item.run,
            };
            match replaced {
                Some(index) => {
                    state.pending[index] = pending;
                }
                None => state.pending.push_back(pending),
            }
            (state.pending.len(), state.paused)
        };

        if pending_len > LONG_QUEUE_WARNING {
            tracing::warn!(
                queue = %self.inner.name,
                pending = pending_len,
                "long queue"
            );
        }

        if !paused {
            dispatch(&self.inner);
        }
    }

    /// Stop starting new items. Queued items are kept.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock().expect("queue lock poisoned");
        state.paused = true;
    }

    /// Resume automatic execution.
    pub fn resume(&self) {
        let was_paused = {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            let was = state.paused;
            state.paused = false;
            was
        };
        if was_paused {
            dispatch(&self.inner);
        }
    }

    /// Number of queued (not yet running) items.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("queue lock poisoned")
            .pending
            .len()
    }

    /// Number of items currently in flight.
    #[must_use]
    pub fn running_len(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("queue lock poisoned")
            .running
            .len()
    }

    /// Whether automatic execution is gated.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().expect("queue lock poisoned").paused
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.inner.name)
            .field("width", &self.inner.width)
            .finish()
    }
}

/// Start eligible items until the width bound or the queue is drained.
/// Actions are invoked outside the state lock.
fn dispatch(inner: &Arc<QueueInner>) {
    loop {
        let next = {
            let mut state = inner.state.lock().expect("queue lock poisoned");
            if state.paused || state.running.len() >= inner.width {
                return;
            }
            let Some(item) = state.pending.pop_front() else {
                return;
            };
            state.running.push(item.qid);
            item
        };

        let token = CompletionToken {
            inner: Arc::clone(inner),
            qid: next.qid,
            completed: false,
        };
        (next.run)(token);
    }
}

fn finish(inner: &Arc<QueueInner>, qid: u64) {
    let paused = {
        let mut state = inner.state.lock().expect("queue lock poisoned");
        match state.running.iter().position(|running| *running == qid) {
            Some(index) => {
                state.running.remove(index);
            }
            None => {
                tracing::warn!(
                    queue = %inner.name,
                    qid,
                    "finished called for an item that is not running"
                );
            }
        }
        state.paused
    };

    if !paused {
        dispatch(inner);
    }
}
