// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{ActionKey, ActionKind, Locality, RuntimeError};
use serde::{Deserialize, Serialize};

/// Delivery mode for a payload.
///
/// `Reference` only has teeth for the in-process transport, which can
/// literally borrow the caller's `Vec<u8>` for the duration of the call,
/// the same way a zero-copy lease borrows caller memory without copying.
/// Any transport that actually crosses a process boundary has no
/// choice but to copy onto the wire; `shad-transport-tcp` honors the
/// caller's request for `Reference` by *not* copying again once the bytes
/// are back off the wire, but the network hop itself is unavoidably a copy.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum PayloadMode {
    Reference,
    Copy,
}

/// What the callee is expected to produce, if anything.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum ResponseKind {
    None,
    /// Callee must write exactly `size` bytes (`Ret<R>`).
    Fixed(usize),
    /// Callee may write up to `capacity` bytes and reports how many
    /// (`RetBuff(cap)`).
    Variable(usize),
}

/// Identifies the task group a queued task belongs to, so a remote
/// continuation can report completion back to the locality that owns the
/// handle.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct HandleCorrelation {
    pub owner: Locality,
    pub id: u64,
}

/// A dispatch request as it crosses the transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    pub kind: ActionKind,
    pub action: ActionKey,
    pub payload: Vec<u8>,
    pub payload_mode: PayloadMode,
    pub response_kind: ResponseKind,
    pub handle: Option<HandleCorrelation>,
    /// `Some(n)` turns this into a `forEachAt` dispatch: the callee invokes
    /// the action `n` times, once per `i` in `[0, n)`, instead of once.
    /// `None` is an ordinary single dispatch.
    pub iterations: Option<u64>,
}

/// A dispatch response as it crosses the transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameResponse {
    pub status: Result<Vec<u8>, RuntimeError>,
}

/// The separate "task-done" notification sent back to the owner of a
/// handle once a remotely-spawned continuation (and everything it
/// transitively spawned) has completed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDoneNotice {
    pub handle: HandleCorrelation,
    pub outcome: Result<(), RuntimeError>,
}
