// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Runtime`: the thin owner of a process's one [`Dispatcher`] across its
//! whole life, from `initialize()` through `finalize()`.
//!
//! The transport-specific half of startup (binding a listener, dialing
//! peers) happens on the concrete transport before `initialize()` is ever
//! called, the same two-phase-construction shape `shad-transport-inproc`
//! and `shad-transport-tcp` both already need for a `Transport` impl to
//! know its own locality before the `Dispatcher` it serves exists. `Runtime`
//! itself only has to know how to stop things, not start them — `finalize()`
//! is the one half of that pair every transport can implement the same way,
//! through `Transport::shutdown`.

use std::sync::Arc;

use shad_wire::RuntimeError;

use crate::catalog::ActionCatalog;
use crate::dispatch::Dispatcher;
use crate::executor::LocalExecutor;
use crate::locality_registry::LocalityRegistry;
use crate::transport::Transport;

/// Owns one locality's [`Dispatcher`] for the life of a run.
pub struct Runtime {
    dispatcher: Dispatcher,
}

impl Runtime {
    /// Assembles the dispatcher for this locality. Any transport-specific
    /// binding or rendezvous (`TcpTransport::bind`/`rendezvous`) happens on
    /// the caller's own handle to the concrete transport, before or after
    /// this call — `Runtime` only needs the `Arc<dyn Transport>` the
    /// dispatcher dispatches through.
    pub fn initialize(
        localities: LocalityRegistry,
        catalog: ActionCatalog,
        executor: LocalExecutor,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(localities, catalog, executor, transport),
        }
    }

    /// The dispatcher this runtime owns, for the caller to drive requests
    /// through and to finish transport-specific setup against (e.g.
    /// `TcpTransport::bind(runtime.dispatcher().clone())`).
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Drains and tears down: stops accepting new transport traffic and
    /// releases whatever the backing transport holds open. The dispatcher
    /// must not be used to originate or answer further requests afterward.
    pub async fn finalize(self) -> Result<(), RuntimeError> {
        self.dispatcher.shutdown_transport().await
    }
}
