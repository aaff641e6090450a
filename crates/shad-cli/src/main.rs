// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process entry point: loads a locality's config, runs `initialize()`
//! (build the catalog, bind the transport, rendezvous with every peer),
//! then idles until interrupted and runs `finalize()`.
//!
//! This binary carries no actions of its own — an application wanting
//! concrete typed or buffer actions registers them against the
//! `ActionCatalog` before it's handed to `Runtime::initialize`. Shipping
//! with an empty catalog here is enough to prove the rendezvous and
//! transport wiring stand on their own.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use shad_runtime::{ActionCatalog, LocalExecutor, LocalityRegistry, Runtime};
use shad_transport_tcp::TcpTransport;
use shad_wire::Locality;
use tracing_subscriber::EnvFilter;

mod config;

use config::RuntimeConfig;

#[derive(Debug, Parser)]
#[clap(about = "Runs one locality of a SHAD process group")]
struct Args {
    /// Path to this run's `shad.toml`.
    #[clap(long, default_value = "shad.toml")]
    config: PathBuf,

    /// Overrides `locality_id` from the config file, for spawning several
    /// localities from one shared config during local testing.
    #[clap(long)]
    locality: Option<u32>,

    /// `tracing_subscriber::EnvFilter` directive, e.g. `shad=debug,info`.
    /// Falls back to `RUST_LOG`, then `info`.
    #[clap(long, env = "RUST_LOG")]
    log_filter: Option<String>,

    /// Number of action bodies/`forEach` iterations to run at once.
    #[clap(long, default_value_t = default_concurrency())]
    concurrency: usize,
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_filter.as_deref());

    let mut config = RuntimeConfig::load(&args.config)?;
    if let Some(locality) = args.locality {
        config.locality_id = locality;
    }

    let this = Locality::new(config.locality_id);
    tracing::info!(locality = ?this, listen = %config.listen_addr, "initializing");

    let localities = LocalityRegistry::new(this, config.num_localities());
    let catalog = ActionCatalog::new();
    let executor = LocalExecutor::new(args.concurrency);
    let transport = TcpTransport::new(this, config.listen_addr, config.peers.clone());

    let runtime = Runtime::initialize(localities, catalog, executor, transport.clone());
    transport
        .bind(runtime.dispatcher().clone())
        .await
        .context("binding listen socket")?;
    transport
        .rendezvous(runtime.dispatcher().catalog_checksum())
        .await
        .context("rendezvous with peer localities")?;

    tracing::info!("rendezvous complete, serving");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;

    tracing::info!("finalizing");
    runtime.finalize().await.context("tearing down transport")?;
    Ok(())
}

fn init_tracing(log_filter: Option<&str>) {
    let filter = log_filter
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
