// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task-group handles.
//!
//! Modeled the way the design notes ask for: a
//! shared, interior-mutable coordinator with an atomic outstanding counter
//! and a join primitive — here, a `tokio::sync::Notify` rather than a
//! condvar, since everything else in this crate is already `tokio`-async.
//! This is the Rust-native reading of the original HPX mapping's
//! `task_group`, which collects a `Vec<hpx::future<void>>` and `when_all`s
//! them at `wait()`; tracking a bare counter plus a notify is the
//! equivalent idea without needing to hold every task's future alive.

use shad_wire::{ErrorAggregate, Locality, RuntimeError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// The id of the handle whose task body is currently running on *this*
    /// OS thread, if any. Set by the executor immediately before invoking an
    /// async-task body that was registered under a handle, cleared
    /// immediately after. Used only to catch the fatal reentrancy case of a
    /// task calling `waitForCompletion` on the very handle it runs under.
    pub(crate) static CURRENT_HANDLE: RefCell<Option<u64>> = RefCell::new(None);
}

/// Lifecycle states a handle moves through from creation to completion.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum HandleState {
    Empty,
    Armed,
    Waiting,
    Completed,
}

#[derive(Clone, Debug)]
pub struct HandleEvent {
    pub remote: bool,
    pub ok: bool,
}

struct Inner {
    id: u64,
    owner: Locality,
    state: Mutex<HandleState>,
    local_outstanding: AtomicI64,
    remote_outstanding: AtomicI64,
    errors: Mutex<ErrorAggregate>,
    notify: Notify,
    /// Bounded history of recent sub-task outcomes: a small overwrite-oldest
    /// record useful for diagnostics that hosted logging (`tracing`) doesn't
    /// replace, because it's queryable after the fact rather than only
    /// streamed.
    recent_events: Mutex<VecDeque<HandleEvent>>,
}

const RECENT_EVENTS_CAPACITY: usize = 32;

/// A reference-shared task-group coordinator.
///
/// Cloning a `Handle` shares the same underlying coordinator — equality
/// falls out of comparing the `Arc`'s pointee id.
#[derive(Clone)]
pub struct Handle(Arc<Inner>);

impl Handle {
    /// Creates a fresh, `Empty` handle owned by `owner`. Dispatcher
    /// operations that take a handle call this on first use if the caller
    /// passed `None`.
    pub fn new(owner: Locality) -> Self {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        Self(Arc::new(Inner {
            id,
            owner,
            state: Mutex::new(HandleState::Empty),
            local_outstanding: AtomicI64::new(0),
            remote_outstanding: AtomicI64::new(0),
            errors: Mutex::new(ErrorAggregate::default()),
            notify: Notify::new(),
            recent_events: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAPACITY)),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn owner(&self) -> Locality {
        self.0.owner
    }

    pub fn state(&self) -> HandleState {
        *self.0.state.lock().unwrap()
    }

    fn arm(&self) {
        let mut state = self.0.state.lock().unwrap();
        if *state == HandleState::Empty {
            *state = HandleState::Armed;
        }
    }

    /// Registers a locally-queued sub-task. Must be paired with exactly one
    /// `complete_local` call.
    pub fn register_local(&self) {
        self.arm();
        self.0.local_outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one locally-queued sub-task done, wakes any waiter if this was
    /// the last outstanding task.
    pub fn complete_local(&self, result: Result<(), RuntimeError>) {
        self.record_outcome(false, &result);
        let prev = self.0.local_outstanding.fetch_sub(1, Ordering::SeqCst);
        assert!(
            prev > 0,
            "handle {} local outstanding counter underflowed",
            self.0.id
        );
        self.0.notify.notify_waiters();
    }

    /// Registers a sub-task shipped to a remote peer under this handle,
    /// incrementing a separate remote counter from `register_local`'s.
    pub fn register_remote(&self) {
        self.arm();
        self.0.remote_outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Applies an inbound "task completed" notification from a remote peer.
    pub fn complete_remote(&self, result: Result<(), RuntimeError>) {
        self.record_outcome(true, &result);
        let prev = self.0.remote_outstanding.fetch_sub(1, Ordering::SeqCst);
        assert!(
            prev > 0,
            "handle {} remote outstanding counter underflowed",
            self.0.id
        );
        self.0.notify.notify_waiters();
    }

    fn record_outcome(&self, remote: bool, result: &Result<(), RuntimeError>) {
        let ok = match result {
            Ok(()) => true,
            Err(e) => {
                self.0.errors.lock().unwrap().push(e.clone());
                false
            }
        };
        let mut events = self.0.recent_events.lock().unwrap();
        if events.len() == RECENT_EVENTS_CAPACITY {
            events.pop_front();
        }
        events.push_back(HandleEvent { remote, ok });
    }

    fn outstanding(&self) -> i64 {
        self.0.local_outstanding.load(Ordering::SeqCst)
            + self.0.remote_outstanding.load(Ordering::SeqCst)
    }

    /// Blocks (asynchronously) until every task registered under this
    /// handle — local and transitively remote — has completed.
    ///
    /// Panics if called from a task that is itself registered under this
    /// same handle — the runtime has no way to make progress in that case,
    /// so this is a caller error that aborts rather than returning a
    /// `Result`.
    pub async fn wait_for_completion(&self) -> Result<(), ErrorAggregate> {
        let reentrant = CURRENT_HANDLE.with(|c| *c.borrow() == Some(self.0.id));
        assert!(
            !reentrant,
            "waitForCompletion({}) called from a task registered under its own handle",
            self.0.id
        );

        {
            let mut state = self.0.state.lock().unwrap();
            if *state == HandleState::Empty {
                // Nothing was ever queued; trivially complete.
                *state = HandleState::Completed;
                return Ok(());
            }
            *state = HandleState::Waiting;
        }

        loop {
            // Register as a waiter *before* checking the counter: `Notify`
            // stores no permit, so a completion that lands between the
            // counter check and the `.await` below would otherwise wake a
            // waiter that isn't listening yet and hang this loop forever.
            // `notified()` snapshots the notify sequence at creation time,
            // so pinning it first and awaiting it last still observes a
            // `notify_waiters()` that happened in between.
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            if self.outstanding() == 0 {
                break;
            }
            notified.await;
        }

        *self.0.state.lock().unwrap() = HandleState::Completed;
        self.0.errors.lock().unwrap().clone().into_result()
    }

    /// Resets a `Completed` handle back to `Empty` so it may be reused. A
    /// completed handle is re-usable only if explicitly reset by the
    /// caller.
    pub fn reset(&self) {
        let mut state = self.0.state.lock().unwrap();
        assert!(
            *state == HandleState::Completed,
            "only a Completed handle may be reset, found {state:?}"
        );
        *state = HandleState::Empty;
        *self.0.errors.lock().unwrap() = ErrorAggregate::default();
    }

    pub fn recent_events(&self) -> Vec<HandleEvent> {
        self.0.recent_events.lock().unwrap().iter().cloned().collect()
    }
}

impl Eq for Handle {}
impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.0.id)
            .field("state", &self.state())
            .field("local_outstanding", &self.0.local_outstanding.load(Ordering::Relaxed))
            .field("remote_outstanding", &self.0.remote_outstanding.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let outstanding = self.local_outstanding.load(Ordering::Relaxed)
            + self.remote_outstanding.load(Ordering::Relaxed);
        if outstanding != 0 {
            tracing::warn!(
                handle = self.id,
                outstanding,
                "handle dropped with outstanding tasks; a synchronous destructor can't \
                 block to join them, so this only warns instead of waiting"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn empty_handle_completes_immediately() {
        let h = Handle::new(Locality::new(0));
        assert!(h.wait_for_completion().await.is_ok());
        assert_eq!(h.state(), HandleState::Completed);
    }

    #[tokio::test]
    async fn waits_for_local_tasks() {
        let h = Handle::new(Locality::new(0));
        h.register_local();
        h.register_local();

        let h2 = h.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            h2.complete_local(Ok(()));
            h2.complete_local(Ok(()));
        });

        assert!(h.wait_for_completion().await.is_ok());
    }

    #[tokio::test]
    async fn aggregates_errors_from_local_and_remote() {
        let h = Handle::new(Locality::new(0));
        h.register_local();
        h.register_remote();
        h.complete_local(Err(RuntimeError::UserActionFailure(vec![1])));
        h.complete_remote(Err(RuntimeError::UserActionFailure(vec![2])));

        let result = h.wait_for_completion().await;
        let agg = result.unwrap_err();
        assert_eq!(agg.len(), 2);
    }

    #[tokio::test]
    async fn reset_allows_reuse() {
        let h = Handle::new(Locality::new(0));
        h.wait_for_completion().await.unwrap();
        h.reset();
        assert_eq!(h.state(), HandleState::Empty);
        h.register_local();
        h.complete_local(Ok(()));
        assert!(h.wait_for_completion().await.is_ok());
    }

    #[test]
    #[should_panic(expected = "underflowed")]
    fn underflow_is_fatal() {
        let h = Handle::new(Locality::new(0));
        h.complete_local(Ok(()));
    }

    proptest! {
        /// However local and remote registrations/completions interleave,
        /// the outstanding counter always reaches exactly zero once every
        /// registered sub-task has been completed, and `waitForCompletion`
        /// reports success when none of them failed.
        #[test]
        fn outstanding_count_reaches_zero_for_any_interleaving(
            n_local in 0usize..50,
            n_remote in 0usize..50,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let h = Handle::new(Locality::new(0));
                for _ in 0..n_local {
                    h.register_local();
                }
                for _ in 0..n_remote {
                    h.register_remote();
                }
                for _ in 0..n_local {
                    h.complete_local(Ok(()));
                }
                for _ in 0..n_remote {
                    h.complete_remote(Ok(()));
                }
                prop_assert_eq!(h.outstanding(), 0);
                prop_assert!(h.wait_for_completion().await.is_ok());
                Ok(())
            })?;
        }
    }
}
