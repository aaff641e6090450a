// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The transport seam.
//!
//! A kernel-style IPC layer puts exactly one seam between "how tasks talk"
//! and "what they say": `sys_send`/`sys_recv`/`sys_reply` are the kernel's
//! fixed wire-level primitives, and everything built on top (the dispatch
//! loop, generated call stubs) is expressed in terms of them without caring
//! whether a given peer happens to live in the same address space.
//! `Transport` is that same seam, placed with an object-safe async trait so
//! a `Dispatcher` can hold an `Arc<dyn Transport>` and not know or care
//! whether the peer is a `tokio` task in the same process
//! (`shad-transport-inproc`) or a TCP connection
//! (`shad-transport-tcp`).

use async_trait::async_trait;
use shad_wire::{Frame, FrameResponse, HandleCorrelation, Locality, RuntimeError, TaskDoneNotice};

#[async_trait]
pub trait Transport: Send + Sync {
    /// This process's own locality, for the "invoke inline, no serialisation
    /// trip" rule.
    fn this_locality(&self) -> Locality;

    /// Delivers `frame` to `target` and returns its response. Must invoke
    /// inline when `target == this_locality()` — in practice
    /// every implementation delegates that case to the same local-dispatch
    /// path a remote frame would eventually reach, so "inline" just means
    /// "skip the network/channel hop", not "skip the catalog".
    async fn send(&self, target: Locality, frame: Frame) -> Result<FrameResponse, RuntimeError>;

    /// Sends a "task completed" notification back to the locality that owns
    /// `notice.handle`.
    async fn notify_task_done(
        &self,
        notice: TaskDoneNotice,
    ) -> Result<(), RuntimeError>;

    /// One-sided put: writes `bytes` into the memory region named by
    /// `remote_addr` at `target`, starting at `offset`.
    async fn dma_put(
        &self,
        target: Locality,
        remote_addr: RemoteAddr,
        offset: usize,
        bytes: Vec<u8>,
    ) -> Result<(), RuntimeError>;

    /// One-sided get: reads `len` bytes starting at `offset` from the
    /// memory region named by `remote_addr` at `source`.
    async fn dma_get(
        &self,
        source: Locality,
        remote_addr: RemoteAddr,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, RuntimeError>;

    /// Tears down whatever this transport holds open: listeners, dialed
    /// connections, background tasks. Called once by `finalize()` after the
    /// dispatcher has stopped accepting new work. The default is a no-op for
    /// transports with nothing durable to release.
    async fn shutdown(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Names a region of a locality's address space that has been registered
/// for one-sided access. Clients typically obtain it by a prior
/// `executeAtWithRet` that runs on
/// the target and returns the address of a container's local storage").
///
/// There is no literal shared address space between OS processes, so this
/// crate's "remote address" is a capability token into the target
/// locality's `DmaRegistry` rather than a raw pointer — the caller still
/// gets it the same way (by calling `executeAtWithRet` against an action
/// that registered a region and returned its token), it
/// just isn't a number you could misuse as a pointer.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, serde::Serialize, serde::Deserialize)]
pub struct RemoteAddr(pub u64);

pub(crate) fn correlation_for(handle: &crate::Handle) -> HandleCorrelation {
    HandleCorrelation {
        owner: handle.owner(),
        id: handle.id(),
    }
}
