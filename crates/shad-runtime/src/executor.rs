// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use shad_wire::ErrorAggregate;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs action bodies and `forEach` iterations on each locality. Exposes a
/// stable `concurrency()` — a positive integer, fixed for the lifetime of
/// the locality — that `forEach*` uses to shape partitioning.
///
/// Action bodies are plain synchronous closures — user code, with no
/// expectation that they cooperate with an async runtime. They run on
/// `tokio`'s blocking thread pool, gated by a
/// semaphore sized to `concurrency`, so that the number of *simultaneously
/// executing* bodies matches a per-process worker pool of `concurrency()`
/// threads, independent of however many OS threads
/// `tokio` itself keeps around for async I/O.
pub struct LocalExecutor {
    concurrency: usize,
    semaphore: Arc<Semaphore>,
}

impl LocalExecutor {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `f` to completion, counted against the executor's concurrency
    /// budget. Used for single-shot `executeAt`/`executeAtWithRet*` calls.
    pub async fn run<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("local executor semaphore never closes");
        tokio::task::spawn_blocking(f)
            .await
            .expect("action body panicked")
    }

    /// Runs `body(i)` for every `i` in `[0, n)`, independently and
    /// concurrently up to `concurrency()` at a time; all iterations complete
    /// before this returns. Errors from individual iterations are
    /// aggregated rather than short-circuiting the rest — `forEach*` treats
    /// each iteration as an independent task.
    pub async fn for_each<F>(&self, n: u64, body: F) -> ErrorAggregate
    where
        F: Fn(u64) -> Result<(), shad_wire::RuntimeError> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let mut joins = tokio::task::JoinSet::new();
        for i in 0..n {
            let sem = self.semaphore.clone();
            let body = Arc::clone(&body);
            joins.spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .expect("local executor semaphore never closes");
                tokio::task::spawn_blocking(move || body(i))
                    .await
                    .expect("forEach iteration panicked")
            });
        }

        let mut errors = ErrorAggregate::default();
        while let Some(res) = joins.join_next().await {
            if let Err(e) = res.expect("forEach join task panicked") {
                errors.push(e);
            }
        }
        errors
    }
}
