//! Readiness gate.
//!
//! Tracks named setup phases with a counter each; the gate is ready when
//! every counter is back to zero. The daemon brackets registration work
//! with `delta(key, 1)` / `delta(key, -1)` and holds auto-discovery
//! until [`ReadyGate::wait_ready`] resolves.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::watch;

/// Counter-based readiness barrier.
pub struct ReadyGate {
    counts: Mutex<BTreeMap<String, i64>>,
    tx: watch::Sender<bool>,
}

impl ReadyGate {
    /// A gate with no pending phases (ready).
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self {
            counts: Mutex::new(BTreeMap::new()),
            tx,
        }
    }

    /// Adjust the counter for a phase.
    ///
    /// # Panics
    ///
    /// A counter going negative means lifecycle bookkeeping is broken;
    /// that is fatal.
    pub fn delta(&self, key: &str, delta: i64) {
        let ready = {
            let mut counts = self.counts.lock().expect("ready gate lock poisoned");
            let count = counts.entry(key.to_string()).or_insert(0);
            *count += delta;
            assert!(
                *count >= 0,
                "ready accounting underflow for phase {key}"
            );
            counts.values().all(|count| *count == 0)
        };
        self.tx.send_replace(ready);
    }

    /// Whether every phase is complete.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.counts
            .lock()
            .expect("ready gate lock poisoned")
            .values()
            .all(|count| *count == 0)
    }

    /// Wait until every phase is complete.
    pub async fn wait_ready(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() && self.is_ready() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReadyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyGate")
            .field("ready", &self.is_ready())
            .finish()
    }
}
