// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The dispatch runtime: everything above the wire format
//! (`shad_wire`) and below a concrete `Transport`.
//!
//! A process wires these pieces together into a [`Dispatcher`] once, during
//! `initialize()`, and uses it for the life of the run. Nothing in this
//! crate knows how frames actually cross a process boundary — that is
//! supplied by a `Transport` impl from `shad-transport-inproc` or
//! `shad-transport-tcp` and handed in at construction time, the same way a
//! userspace IPC dispatch loop doesn't know or care whether its caller is
//! local or remote.

mod catalog;
mod dispatch;
mod dma;
mod executor;
mod handle;
mod locality_registry;
mod runtime;
mod transport;

pub use catalog::{ActionCatalog, CallFn, ForEachFn};
pub use dispatch::Dispatcher;
pub use dma::DmaRegistry;
pub use executor::LocalExecutor;
pub use handle::{Handle, HandleEvent, HandleState};
pub use locality_registry::LocalityRegistry;
pub use runtime::Runtime;
pub use transport::{RemoteAddr, Transport};

pub use shad_wire::{
    ActionKey, ActionKind, ActionRecord, ErrorAggregate, Frame, FrameResponse, HandleCorrelation,
    Locality, PayloadMode, ResponseKind, RuntimeError, TaskDoneNotice,
};
