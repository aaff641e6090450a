// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A [`Transport`] that keeps every locality's [`Dispatcher`] as a plain
//! value in one process, routing `send` by direct async call rather than
//! any real IPC.
//!
//! Grounded on the way several supervised tasks can share one kernel image
//! in a single build: multiple independent units of work, addressed by a
//! stable id, reachable without anything resembling a network. This is the
//! multi-process analog collapsed into a single process — useful for
//! integration tests and for a single-binary demo that wants several
//! localities without standing up real sockets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shad_runtime::{Dispatcher, RemoteAddr, Transport};
use shad_wire::{Frame, FrameResponse, Locality, RuntimeError, TaskDoneNotice};

/// Shared routing table for one in-process "cluster" of localities.
///
/// Build one `InprocCluster`, hand each locality a
/// [`InprocCluster::transport`] *before* constructing its `Dispatcher`
/// (the transport only needs to know its own locality up front), then call
/// [`InprocCluster::register`] once each `Dispatcher` exists so peers can
/// find it.
#[derive(Clone, Default)]
pub struct InprocCluster {
    routes: Arc<Mutex<HashMap<u32, Dispatcher>>>,
}

impl InprocCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self, this: Locality) -> Arc<InprocTransport> {
        Arc::new(InprocTransport {
            this,
            routes: Arc::clone(&self.routes),
        })
    }

    pub fn register(&self, dispatcher: Dispatcher) {
        let id = dispatcher.this_locality().id();
        tracing::debug!(locality = id, "registering locality with in-process cluster");
        self.routes.lock().unwrap().insert(id, dispatcher);
    }
}

pub struct InprocTransport {
    this: Locality,
    routes: Arc<Mutex<HashMap<u32, Dispatcher>>>,
}

impl InprocTransport {
    fn route(&self, loc: Locality) -> Result<Dispatcher, RuntimeError> {
        self.routes
            .lock()
            .unwrap()
            .get(&loc.id())
            .cloned()
            .ok_or(RuntimeError::InvalidLocality(loc))
    }
}

#[async_trait]
impl Transport for InprocTransport {
    fn this_locality(&self) -> Locality {
        self.this
    }

    async fn send(&self, target: Locality, frame: Frame) -> Result<FrameResponse, RuntimeError> {
        let dispatcher = self.route(target)?;
        let status = dispatcher.handle_inbound(frame).await;
        Ok(FrameResponse { status })
    }

    async fn notify_task_done(&self, notice: TaskDoneNotice) -> Result<(), RuntimeError> {
        let owner = self.route(notice.handle.owner)?;
        owner.deliver_task_done(notice);
        Ok(())
    }

    async fn dma_put(
        &self,
        target: Locality,
        remote_addr: RemoteAddr,
        offset: usize,
        bytes: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        self.route(target)?.dma_registry().write(remote_addr, offset, &bytes)
    }

    async fn dma_get(
        &self,
        source: Locality,
        remote_addr: RemoteAddr,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, RuntimeError> {
        self.route(source)?.dma_registry().read(remote_addr, offset, len)
    }

    async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.routes.lock().unwrap().remove(&self.this.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shad_runtime::{ActionCatalog, ActionKind, LocalExecutor, LocalityRegistry};
    use shad_wire::{ActionKey, ResponseKind};
    use std::sync::atomic::{AtomicI64, Ordering};

    fn build_cluster(n: u32) -> (InprocCluster, Arc<AtomicI64>) {
        let counter = Arc::new(AtomicI64::new(0));
        let cluster = InprocCluster::new();
        for id in 0..n {
            let loc = Locality::new(id);
            let counter = Arc::clone(&counter);
            let mut catalog = ActionCatalog::new();
            catalog.register_typed_void::<i64>("inc_counter", move |delta| {
                counter.fetch_add(*delta, Ordering::SeqCst);
            });
            let transport = cluster.transport(loc);
            let dispatcher = Dispatcher::new(
                LocalityRegistry::new(loc, n),
                catalog,
                LocalExecutor::new(2),
                transport,
            );
            cluster.register(dispatcher);
        }
        (cluster, counter)
    }

    #[tokio::test]
    async fn execute_on_all_reaches_every_registered_locality() {
        let (cluster, counter) = build_cluster(4);
        let dispatcher = cluster.routes.lock().unwrap().get(&0).cloned().unwrap();
        dispatcher
            .execute_on_all(ActionKind::Typed, ActionKey::of("inc_counter"), shad_wire::encode(&3i64))
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn remote_execute_at_reaches_peer() {
        let (cluster, counter) = build_cluster(2);
        let caller = cluster.routes.lock().unwrap().get(&0).cloned().unwrap();
        caller
            .execute_at(
                Locality::new(1),
                ActionKind::Typed,
                ActionKey::of("inc_counter"),
                shad_wire::encode(&5i64),
                ResponseKind::None,
            )
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
