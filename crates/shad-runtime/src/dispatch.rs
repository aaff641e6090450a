// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The dispatcher: the public surface every higher layer —
//! distributed containers, the STL-style algorithms, or a plain binary
//! built on `shad-cli` — actually calls.
//!
//! Mirrors a userspace IPC dispatch loop's "decode a request, look the
//! target up, run it, reply" shape, repeated for every one of the
//! operations below, with the wrinkle that a target may be this process
//! (invoke inline) or a peer (go through `Transport`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use shad_wire::{
    ActionKey, ActionKind, ErrorAggregate, Frame, HandleCorrelation, Locality, PayloadMode,
    ResponseKind, RuntimeError, TaskDoneNotice,
};

use crate::catalog::ActionCatalog;
use crate::dma::DmaRegistry;
use crate::executor::LocalExecutor;
use crate::handle::{Handle, CURRENT_HANDLE};
use crate::locality_registry::LocalityRegistry;
use crate::transport::{correlation_for, RemoteAddr, Transport};

/// Ties the locality registry, action catalog, handle bookkeeping, local
/// executor, transport, and DMA registry together into the one object a
/// caller holds for the life of a run.
///
/// Constructed once per process between `initialize()` and `finalize()`
///; cloning is cheap (every field is an `Arc` or `Copy`) so a
/// binary may freely hand clones to worker tasks.
#[derive(Clone)]
pub struct Dispatcher {
    localities: LocalityRegistry,
    catalog: Arc<ActionCatalog>,
    executor: Arc<LocalExecutor>,
    transport: Arc<dyn Transport>,
    dma: Arc<DmaRegistry>,
    /// Handles that have been shipped off-locality at least once, keyed by
    /// id, so an inbound [`TaskDoneNotice`] can find the coordinator a
    /// remote continuation belongs to. Entries are never evicted — handles
    /// are expected to be long-lived and reused via `reset()` rather than
    /// created per task, the same way a statically-sized task table is
    /// sized once at build time rather than grown and shrunk at runtime.
    handles: Arc<Mutex<HashMap<u64, Handle>>>,
}

impl Dispatcher {
    pub fn new(
        localities: LocalityRegistry,
        catalog: ActionCatalog,
        executor: LocalExecutor,
        transport: Arc<dyn Transport>,
    ) -> Self {
        assert_eq!(
            localities.this_locality(),
            transport.this_locality(),
            "locality registry and transport disagree about this process's locality"
        );
        Self {
            localities,
            catalog: Arc::new(catalog),
            executor: Arc::new(executor),
            transport,
            dma: Arc::new(DmaRegistry::new()),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn this_locality(&self) -> Locality {
        self.localities.this_locality()
    }

    pub fn num_localities(&self) -> u32 {
        self.localities.num_localities()
    }

    pub fn all_localities(&self) -> impl Iterator<Item = Locality> + Clone {
        self.localities.all_localities()
    }

    pub fn dma_registry(&self) -> &Arc<DmaRegistry> {
        &self.dma
    }

    /// `checksum()` of the locally-registered catalog, exchanged at
    /// `initialize()` time to catch a memory-layout mismatch between peers
    /// before any action actually runs.
    pub fn catalog_checksum(&self) -> u64 {
        self.catalog.checksum()
    }

    /// Tears down the transport backing this dispatcher. Called by
    /// `finalize()`; a dispatcher is not safe to dispatch through afterward.
    pub async fn shutdown_transport(&self) -> Result<(), RuntimeError> {
        self.transport.shutdown().await
    }

    fn check(&self, loc: Locality) -> Result<(), RuntimeError> {
        self.localities.check(loc)
    }

    fn frame(
        kind: ActionKind,
        action: ActionKey,
        payload: Vec<u8>,
        response_kind: ResponseKind,
        handle: Option<HandleCorrelation>,
        iterations: Option<u64>,
    ) -> Frame {
        Frame {
            kind,
            action,
            payload,
            payload_mode: PayloadMode::Copy,
            response_kind,
            handle,
            iterations,
        }
    }

    /// `executeAt`/`executeAtWithRet`/`executeAtWithRetBuff`:
    /// blocks until `action` has run to completion at `loc` and returns its
    /// result bytes, if any.
    #[tracing::instrument(skip(self, payload), fields(locality = ?loc, action = ?action))]
    pub async fn execute_at(
        &self,
        loc: Locality,
        kind: ActionKind,
        action: ActionKey,
        payload: Vec<u8>,
        response_kind: ResponseKind,
    ) -> Result<Vec<u8>, RuntimeError> {
        self.check(loc)?;
        let frame = Self::frame(kind, action, payload, response_kind, None, None);
        let response = self.transport.send(loc, frame).await?;
        let bytes = response.status?;
        Self::check_capacity(response_kind, bytes.len())?;
        Ok(bytes)
    }

    fn check_capacity(kind: ResponseKind, written: usize) -> Result<(), RuntimeError> {
        if let ResponseKind::Variable(capacity) = kind {
            if written > capacity {
                return Err(RuntimeError::ResultBufferTooSmall { capacity, written });
            }
        }
        Ok(())
    }

    /// `executeOnAll`: fires on every locality including the
    /// caller, returns after all complete, aggregating errors rather than
    /// failing fast on the first.
    #[tracing::instrument(skip(self, payload), fields(action = ?action))]
    pub async fn execute_on_all(
        &self,
        kind: ActionKind,
        action: ActionKey,
        payload: Vec<u8>,
    ) -> Result<(), ErrorAggregate> {
        let mut errors = ErrorAggregate::default();
        let mut pending = Vec::new();
        for loc in self.all_localities() {
            let frame = Self::frame(kind, action, payload.clone(), ResponseKind::None, None, None);
            pending.push((loc, self.transport.send(loc, frame)));
        }
        for (loc, fut) in pending {
            match fut.await.and_then(|r| r.status) {
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(locality = ?loc, error = %e, "executeOnAll peer failed");
                    errors.push(e);
                }
            }
        }
        errors.into_result()
    }

    /// `forEachAt`: at `loc`, invokes `action(A, i)` for
    /// every `i` in `[0, n)`. Invoked inline via the local executor when
    /// `loc == thisLocality()`; otherwise shipped as a single `Frame` with
    /// `iterations = Some(n)` so the callee runs the fan-out itself, rather
    /// than this locality issuing `n` separate round-trips.
    #[tracing::instrument(skip(self, payload), fields(locality = ?loc, action = ?action, n))]
    pub async fn for_each_at(
        &self,
        loc: Locality,
        action: ActionKey,
        payload: Vec<u8>,
        n: u64,
    ) -> Result<(), ErrorAggregate> {
        self.check(loc).map_err(|e| {
            let mut agg = ErrorAggregate::default();
            agg.push(e);
            agg
        })?;

        if loc == self.this_locality() {
            let body = self.catalog.lookup_for_each(action).map_err(|e| {
                let mut agg = ErrorAggregate::default();
                agg.push(e);
                agg
            })?;
            return Ok(self
                .executor
                .for_each(n, move |i| body(&payload, i))
                .await
                .into_result()?);
        }

        let frame = Self::frame(
            ActionKind::Typed,
            action,
            payload,
            ResponseKind::None,
            None,
            Some(n),
        );
        let response = self.transport.send(loc, frame).await;
        match response.and_then(|r| r.status) {
            Ok(_) => Ok(()),
            Err(e) => {
                let mut agg = ErrorAggregate::default();
                agg.push(e);
                Err(agg)
            }
        }
    }

    /// Partitioning rule: the first `K-1` localities get
    /// `floor(n_total/K)` each, the last gets the remainder. Returns
    /// `(locality, chunk_len)` pairs in locality order.
    fn partition(&self, n_total: u64) -> Vec<(Locality, u64)> {
        let k = u64::from(self.num_localities());
        let chunk = n_total / k;
        let remainder = n_total - chunk * (k - 1);
        self.all_localities()
            .enumerate()
            .map(|(idx, loc)| {
                let len = if idx as u64 == k - 1 { remainder } else { chunk };
                (loc, len)
            })
            .collect()
    }

    /// `forEachOnAll`: splits `n_total`
    /// iterations across every locality using [`Self::partition`], each
    /// target seeing its own locality-local `[0, chunk)` index space rather
    /// than a single global range sliced across localities.
    #[tracing::instrument(skip(self, payload), fields(action = ?action, n_total))]
    pub async fn for_each_on_all(
        &self,
        action: ActionKey,
        payload: Vec<u8>,
        n_total: u64,
    ) -> Result<(), ErrorAggregate> {
        let mut errors = ErrorAggregate::default();
        let mut pending = Vec::new();
        for (loc, len) in self.partition(n_total) {
            pending.push(self.for_each_at(loc, action, payload.clone(), len));
        }
        for fut in pending {
            if let Err(agg) = fut.await {
                for e in agg.errors() {
                    errors.push(e.clone());
                }
            }
        }
        errors.into_result()
    }

    /// `asyncExecuteAt`: queues the task under `handle`
    /// rather than blocking the caller. Runs the task body on this
    /// locality's executor and registers it with the handle either as a
    /// local sub-task (`loc == thisLocality()`) or, for a remote target, as
    /// a remote sub-task whose completion is reported back via
    /// [`Transport::notify_task_done`].
    #[tracing::instrument(skip(self, payload, handle), fields(locality = ?loc, action = ?action, handle = handle.id()))]
    pub fn async_execute_at(
        &self,
        handle: &Handle,
        loc: Locality,
        kind: ActionKind,
        action: ActionKey,
        payload: Vec<u8>,
    ) {
        if let Err(e) = self.check(loc) {
            handle.register_local();
            handle.complete_local(Err(e));
            return;
        }

        if loc == self.this_locality() {
            handle.register_local();
            let catalog = Arc::clone(&self.catalog);
            let executor = Arc::clone(&self.executor);
            let handle = handle.clone();
            tokio::spawn(async move {
                let outcome = run_local_under_handle(&catalog, &executor, &handle, kind, action, payload).await;
                handle.complete_local(outcome);
            });
            return;
        }

        handle.register_remote();
        self.handles.lock().unwrap().insert(handle.id(), handle.clone());
        let correlation = correlation_for(handle);
        let frame = Self::frame(kind, action, payload, ResponseKind::None, Some(correlation), None);
        let transport = Arc::clone(&self.transport);
        let handle = handle.clone();
        tokio::spawn(async move {
            // The callee's `handle_inbound` reports completion back via a
            // separate `TaskDoneNotice` (see `deliver_task_done`), which is
            // what actually decrements `remote_outstanding`. A `send` that
            // comes back `Ok` here only means the frame was delivered and
            // the callee took over — it says nothing about whether the task
            // itself has finished yet, so this must not also complete the
            // handle. Only a failure to deliver the frame at all (the
            // notice can then never arrive) is resolved here.
            if let Err(e) = transport.send(loc, frame).await.and_then(|r| r.status) {
                handle.complete_remote(Err(e));
            }
        });
    }

    /// `asyncExecuteOnAll`: one `async_execute_at` per locality,
    /// all sharing `handle`.
    pub fn async_execute_on_all(&self, handle: &Handle, kind: ActionKind, action: ActionKey, payload: Vec<u8>) {
        for loc in self.all_localities() {
            self.async_execute_at(handle, loc, kind, action, payload.clone());
        }
    }

    /// `asyncForEachAt`: queues a `forEachAt` under `handle`
    /// instead of blocking.
    pub fn async_for_each_at(&self, handle: &Handle, loc: Locality, action: ActionKey, payload: Vec<u8>, n: u64) {
        if n == 0 {
            return;
        }
        if let Err(e) = self.check(loc) {
            handle.register_local();
            handle.complete_local(Err(e));
            return;
        }
        handle.register_local();
        let dispatcher = self.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let outcome = dispatcher
                .for_each_at(loc, action, payload, n)
                .await
                .map_err(|agg| agg.first().cloned().expect("non-empty aggregate"));
            handle.complete_local(outcome);
        });
    }

    /// `asyncForEachOnAll`.
    pub fn async_for_each_on_all(&self, handle: &Handle, action: ActionKey, payload: Vec<u8>, n_total: u64) {
        for (loc, len) in self.partition(n_total) {
            self.async_for_each_at(handle, loc, action, payload.clone(), len);
        }
    }

    /// `waitForCompletion`: delegates to [`Handle`], which
    /// owns the reentrancy check and the aggregate-error surface.
    pub async fn wait_for_completion(&self, handle: &Handle) -> Result<(), ErrorAggregate> {
        handle.wait_for_completion().await
    }

    /// `dma` *put*: after return, `n` bytes at `remote_addr` on
    /// `dest` equal `bytes`.
    #[tracing::instrument(skip(self, bytes), fields(dest = ?dest))]
    pub async fn dma_put(
        &self,
        dest: Locality,
        remote_addr: RemoteAddr,
        offset: usize,
        bytes: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        self.check(dest)?;
        if dest == self.this_locality() {
            return self.dma.write(remote_addr, offset, &bytes);
        }
        self.transport.dma_put(dest, remote_addr, offset, bytes).await
    }

    /// `dma` *get*: returns `len` bytes read from `remote_addr`
    /// on `source`.
    #[tracing::instrument(skip(self), fields(source = ?source))]
    pub async fn dma_get(
        &self,
        source: Locality,
        remote_addr: RemoteAddr,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, RuntimeError> {
        self.check(source)?;
        if source == self.this_locality() {
            return self.dma.read(remote_addr, offset, len);
        }
        self.transport.dma_get(source, remote_addr, offset, len).await
    }

    /// `asyncDma` put variant: queues the transfer under
    /// `handle` instead of blocking.
    pub fn async_dma_put(&self, handle: &Handle, dest: Locality, remote_addr: RemoteAddr, offset: usize, bytes: Vec<u8>) {
        handle.register_local();
        let dispatcher = self.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.dma_put(dest, remote_addr, offset, bytes).await;
            handle.complete_local(outcome);
        });
    }

    /// `asyncDma` get variant. The read bytes are delivered by
    /// calling `on_complete` rather than returned, since the handle's join
    /// surface is `Result<(), _>` — callers that need the bytes should use
    /// the synchronous [`Self::dma_get`] inside their own task instead, the
    /// same way a distributed-container client typically issues one
    /// `executeAtWithRet` (to get a `RemoteAddr`) and then a direct `dma`
    /// rather than an async one for a value it needs immediately.
    pub fn async_dma_get<F>(&self, handle: &Handle, source: Locality, remote_addr: RemoteAddr, offset: usize, len: usize, on_complete: F)
    where
        F: FnOnce(Result<Vec<u8>, RuntimeError>) + Send + 'static,
    {
        handle.register_local();
        let dispatcher = self.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let result = dispatcher.dma_get(source, remote_addr, offset, len).await;
            let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
            on_complete(result);
            handle.complete_local(outcome);
        });
    }

    /// Callee-side entry point: a `Transport` implementation calls this
    /// when it receives a `Frame` addressed to this locality, whether that
    /// frame arrived inline (same-process `send`) or off the wire: decode,
    /// look up, run, build a response.
    #[tracing::instrument(skip(self, frame), fields(action = ?frame.action, handle = frame.handle.map(|h| h.id)))]
    pub async fn handle_inbound(&self, frame: Frame) -> Result<Vec<u8>, RuntimeError> {
        if let Some(n) = frame.iterations {
            let body = self.catalog.lookup_for_each(frame.action)?;
            let payload = frame.payload;
            self.executor
                .for_each(n, move |i| body(&payload, i))
                .await
                .into_result()
                .map_err(|agg| agg.first().cloned().expect("non-empty aggregate"))?;
            return Ok(Vec::new());
        }

        let body = self.catalog.lookup_call(frame.action)?;
        let payload = frame.payload;
        let result = self.executor.run(move || body(&payload)).await;

        if let Some(correlation) = frame.handle {
            // Remote continuation: wrap in a fresh handle, run it to
            // completion, then notify the owner.
            let sub_handle = Handle::new(self.this_locality());
            sub_handle.register_local();
            sub_handle.complete_local(result.as_ref().map(|_| ()).map_err(Clone::clone));
            let outcome = self
                .wait_for_completion(&sub_handle)
                .await
                .map_err(|agg| agg.first().cloned().expect("non-empty aggregate"));
            let notice = TaskDoneNotice {
                handle: correlation,
                outcome,
            };
            if let Err(e) = self.transport.notify_task_done(notice).await {
                tracing::warn!(error = %e, "failed to notify handle owner of remote task completion");
            }
            return Ok(Vec::new());
        }

        result
    }

    /// Callee-side entry point for an inbound [`TaskDoneNotice`]: looks up
    /// the locally-owned handle named by the notice's
    /// correlation id and applies the completion to it. A `Transport`
    /// implementation calls this once it has routed a notification back to
    /// the process that owns the handle.
    pub fn deliver_task_done(&self, notice: TaskDoneNotice) {
        let handle = self.handles.lock().unwrap().get(&notice.handle.id).cloned();
        match handle {
            Some(handle) => handle.complete_remote(notice.outcome),
            None => tracing::warn!(
                handle = notice.handle.id,
                "task-done notification for an unknown or already-dropped handle"
            ),
        }
    }
}

/// Runs an action body on the local executor with `CURRENT_HANDLE` set for
/// the duration, so a reentrant `waitForCompletion` call from inside the
/// body is caught.
async fn run_local_under_handle(
    catalog: &Arc<ActionCatalog>,
    executor: &Arc<LocalExecutor>,
    handle: &Handle,
    _kind: ActionKind,
    action: ActionKey,
    payload: Vec<u8>,
) -> Result<(), RuntimeError> {
    let body = catalog.lookup_call(action)?;
    let handle_id = handle.id();
    executor
        .run(move || {
            CURRENT_HANDLE.with(|c| *c.borrow_mut() = Some(handle_id));
            let result = body(&payload).map(|_| ());
            CURRENT_HANDLE.with(|c| *c.borrow_mut() = None);
            result
        })
        .await
}
