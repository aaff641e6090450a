// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Locality;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kinds surfaced across the dispatcher boundary.
///
/// A kernel-style IPC layer typically splits faults into a recoverable
/// response code versus an unrecoverable fault that kills the offending
/// task outright. This enum keeps that split but expresses it as a
/// `thiserror` enum (idiomatic in a hosted crate, where nothing forces
/// `no_std`) — every variant here is recoverable, because it is always
/// reported to the caller or accumulated on a handle. The genuinely
/// unrecoverable conditions — reentrant `waitForCompletion`, an outstanding
/// counter underflow — have no value here: they are not something a caller
/// can act on, so the runtime panics instead of returning them (see
/// `shad_runtime::handle`).
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
pub enum RuntimeError {
    #[error("locality {0:?} is not in [0, N)")]
    InvalidLocality(Locality),

    #[error("action key {0:?} is not registered at the callee")]
    ActionUnknown(crate::ActionKey),

    #[error("callee wrote a result larger than the caller's advertised capacity ({written} > {capacity})")]
    ResultBufferTooSmall { capacity: usize, written: usize },

    #[error("transport failed to deliver the frame: {0}")]
    TransportFailure(String),

    #[error("user action reported failure: {0:?}")]
    UserActionFailure(Vec<u8>),
}

/// Aggregate of errors collected from many independent tasks: `executeOnAll`,
/// `forEach*`, and handle join all report an aggregate rather than failing
/// fast on the first error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorAggregate {
    errors: Vec<RuntimeError>,
}

impl ErrorAggregate {
    pub fn push(&mut self, err: RuntimeError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[RuntimeError] {
        &self.errors
    }

    /// Surfaces the aggregate as either the first error or the combined
    /// list; we keep the full list and let callers decide which they want.
    pub fn first(&self) -> Option<&RuntimeError> {
        self.errors.first()
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ErrorAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} task(s) failed: ", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorAggregate {}
