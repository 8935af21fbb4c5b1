//! FIFO-with-priority async mutex.
//!
//! All mutating credit sections serialize through one of these. Waiters are
//! released highest priority first; within a priority class, strictly in
//! arrival order. Dropping a waiting future forfeits its slot.

use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

struct Waiter {
    priority: u8,
    seq: u64,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct State {
    locked: bool,
    next_seq: u64,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

/// Index of the waiter to release next: highest priority, then lowest seq.
fn best_waiter(waiters: &[Waiter]) -> Option<usize> {
    waiters
        .iter()
        .enumerate()
        .max_by_key(|(_, w)| (w.priority, u64::MAX - w.seq))
        .map(|(i, _)| i)
}

#[derive(Clone, Default)]
pub struct PriorityLock {
    inner: Arc<Inner>,
}

impl PriorityLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock at `priority`. Resolves once every higher-priority
    /// waiter (and every earlier waiter of the same priority) has held and
    /// released it.
    pub async fn acquire(&self, priority: u8) -> PriorityGuard {
        let rx = {
            let mut state = self.inner.state.lock().unwrap();
            if !state.locked {
                state.locked = true;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiters.push(Waiter { priority, seq, tx });
                Some(rx)
            }
        };
        if let Some(rx) = rx {
            // The sender is never dropped without a send, so this only
            // resolves when a departing guard hands the lock over.
            let _ = rx.await;
        }
        PriorityGuard { inner: Arc::clone(&self.inner) }
    }

    /// Number of queued waiters (diagnostics).
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().unwrap().waiters.len()
    }
}

pub struct PriorityGuard {
    inner: Arc<Inner>,
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap();
        // Hand the lock to the best live waiter; a failed send means that
        // waiter's future was dropped, so try the next one.
        loop {
            match best_waiter(&state.waiters) {
                Some(i) => {
                    let w = state.waiters.swap_remove(i);
                    if w.tx.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    state.locked = false;
                    return;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
