// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-level types shared between every locality in a run: locality
//! identity, action keys, the request/response frame shapes, and the
//! runtime's error kinds.
//!
//! Nothing in this crate knows how a frame actually travels between
//! processes — that's `shad-transport-*`. This crate only fixes what bytes
//! mean.

mod action;
mod error;
mod frame;
mod locality;
mod record;

pub use action::{ActionKey, ActionKind};
pub use error::{ErrorAggregate, RuntimeError};
pub use frame::{Frame, FrameResponse, HandleCorrelation, PayloadMode, ResponseKind, TaskDoneNotice};
pub use locality::Locality;
pub use record::{decode, encode, ActionRecord};
