//! Registry owning the per-auction background timers.
//!
//! At most one timer is live per auction id: arming while one exists
//! replaces it. Handles never leave the registry; callers cancel through
//! it. A cancelled timer's task is aborted, and because every fire callback
//! re-checks persisted state before acting, a callback that already started
//! when the cancel arrived degrades to an idempotent no-op.

use {
    dashmap::{DashMap, mapref::entry::Entry},
    model::auction::AuctionId,
    std::{
        future::Future,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    },
    tokio::task::JoinHandle,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerKind {
    Inactivity,
    Countdown,
}

struct Handle {
    kind: TimerKind,
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct TimerRegistry {
    timers: Arc<DashMap<AuctionId, Handle>>,
    generation: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a timer that runs `on_fire` after `delay`. An existing timer
    /// for the same auction is cancelled first. The delay is expected to be
    /// derived from persisted state at call time, so re-arming after a
    /// restart resumes with the correct remaining time.
    pub fn arm(
        &self,
        id: AuctionId,
        kind: TimerKind,
        delay: Duration,
        on_fire: impl Future<Output = ()> + Send + 'static,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        // Holding the entry across the spawn keeps a zero-delay task from
        // deregistering itself before it was registered.
        let entry = self.timers.entry(id);
        let task = tokio::spawn({
            let timers = Arc::clone(&self.timers);
            async move {
                tokio::time::sleep(delay).await;
                // Deregister before running the callback so the callback can
                // arm a successor without racing this handle's removal.
                timers.remove_if(&id, |_, handle| handle.generation == generation);
                on_fire.await;
            }
        });
        let handle = Handle {
            kind,
            generation,
            task,
        };
        let previous = match entry {
            Entry::Occupied(mut occupied) => Some(occupied.insert(handle)),
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
                None
            }
        };
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    /// Atomic cancel + arm. Same as [`TimerRegistry::arm`]; spelled out at
    /// call sites that know a timer is being swapped.
    pub fn replace(
        &self,
        id: AuctionId,
        kind: TimerKind,
        delay: Duration,
        on_fire: impl Future<Output = ()> + Send + 'static,
    ) {
        self.arm(id, kind, delay, on_fire)
    }

    /// Cancels the auction's timer. A no-op for ids without one.
    pub fn cancel(&self, id: &AuctionId) {
        if let Some((_, handle)) = self.timers.remove(id) {
            handle.task.abort();
        }
    }

    /// The kind of the currently live timer, if any.
    pub fn armed_kind(&self, id: &AuctionId) -> Option<TimerKind> {
        self.timers.get(id).map(|handle| handle.kind)
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().task.abort();
        }
    }
}
