// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end scenarios driving several localities over
//! `shad-transport-inproc`, rather than one `Dispatcher` calling into
//! itself through a loopback stub. Each test stands up its own small
//! `InprocCluster` and catalog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use shad_runtime::{
    ActionCatalog, ActionKey, ActionKind, Dispatcher, Handle, LocalExecutor, LocalityRegistry,
    ResponseKind, RuntimeError,
};
use shad_transport_inproc::InprocCluster;
use shad_wire::Locality;

/// Builds an `N`-locality cluster, letting the caller register each
/// locality's own catalog before the dispatchers are wired together.
fn build_cluster<F>(n: u32, concurrency: usize, mut build_catalog: F) -> (InprocCluster, Vec<Dispatcher>)
where
    F: FnMut(u32, &mut ActionCatalog),
{
    let cluster = InprocCluster::new();
    let mut dispatchers = Vec::new();
    for id in 0..n {
        let loc = Locality::new(id);
        let mut catalog = ActionCatalog::new();
        build_catalog(id, &mut catalog);
        let transport = cluster.transport(loc);
        let dispatcher = Dispatcher::new(
            LocalityRegistry::new(loc, n),
            catalog,
            LocalExecutor::new(concurrency),
            transport,
        );
        cluster.register(dispatcher.clone());
        dispatchers.push(dispatcher);
    }
    (cluster, dispatchers)
}

/// S1: `executeOnAll` touches every locality, including the caller.
#[tokio::test]
async fn counter_on_every_locality() {
    let counters: Arc<Mutex<HashMap<u32, Arc<AtomicI64>>>> = Arc::new(Mutex::new(HashMap::new()));
    let (_cluster, dispatchers) = build_cluster(4, 2, |id, catalog| {
        let counter = Arc::new(AtomicI64::new(0));
        counters.lock().unwrap().insert(id, Arc::clone(&counter));
        catalog.register_typed_void::<i64>("bump", move |delta| {
            counter.fetch_add(*delta, Ordering::SeqCst);
        });
    });

    dispatchers[0]
        .execute_on_all(ActionKind::Typed, ActionKey::of("bump"), shad_wire::encode(&7i64))
        .await
        .unwrap();

    let counters = counters.lock().unwrap();
    for id in 0..4 {
        assert_eq!(counters[&id].load(Ordering::SeqCst), 7);
    }
}

/// S2: many `asyncExecuteAt` calls under one handle, each targeting a
/// different locality, all joined by a single `waitForCompletion`.
#[tokio::test]
async fn async_accumulation_under_one_handle() {
    const ITERATIONS: i64 = 200;

    let totals: Arc<Mutex<HashMap<u32, Arc<AtomicI64>>>> = Arc::new(Mutex::new(HashMap::new()));
    let (_cluster, dispatchers) = build_cluster(3, 4, |id, catalog| {
        let total = Arc::new(AtomicI64::new(0));
        totals.lock().unwrap().insert(id, Arc::clone(&total));
        catalog.register_typed_void::<i64>("accumulate", move |delta| {
            total.fetch_add(*delta, Ordering::SeqCst);
        });
    });

    let caller = &dispatchers[0];
    let handle = Handle::new(caller.this_locality());
    for loc in caller.all_localities() {
        let delta = 3 + loc.id() as i64;
        for _ in 0..ITERATIONS {
            caller.async_execute_at(
                &handle,
                loc,
                ActionKind::Typed,
                ActionKey::of("accumulate"),
                shad_wire::encode(&delta),
            );
        }
    }
    caller.wait_for_completion(&handle).await.unwrap();

    let totals = totals.lock().unwrap();
    for loc in 0..3u32 {
        let expected = (3 + loc as i64) * ITERATIONS;
        assert_eq!(totals[&loc].load(Ordering::SeqCst), expected);
    }
}

/// S3: `forEachOnAll` covers every index exactly once, across every
/// locality, with no two localities reporting the same `(locality, i)` pair.
#[tokio::test]
async fn for_each_on_all_covers_every_index_without_duplicates() {
    let seen: Arc<Mutex<Vec<(u32, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let (_cluster, dispatchers) = build_cluster(3, 4, |id, catalog| {
        let seen = Arc::clone(&seen);
        catalog.register_for_each::<i64>("touch", move |_arg, i| {
            seen.lock().unwrap().push((id, i));
        });
    });

    let concurrency = 4u64;
    let n_total = 3 * concurrency * 5;
    dispatchers[0]
        .for_each_on_all(ActionKey::of("touch"), shad_wire::encode(&0i64), n_total)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), n_total as usize);
    let unique: std::collections::HashSet<_> = seen.iter().cloned().collect();
    assert_eq!(unique.len(), seen.len(), "no (locality, index) pair repeats");
}

/// S4: a DMA put, a remote sum computed with `executeAtWithRet`, and a DMA
/// get round-trip byte-exactly through the registry they touch.
#[tokio::test]
async fn dma_put_compute_get_round_trips() {
    let (_cluster, dispatchers) = build_cluster(2, 2, |_id, catalog| {
        catalog.register_buffer("sum", |bytes| {
            let total: i64 = bytes.iter().map(|&b| i64::from(b)).sum();
            Ok(shad_wire::encode(&total))
        });
    });

    let caller = &dispatchers[0];
    let target = Locality::new(1);

    let remote_addr = dispatchers[1].dma_registry().register(vec![0u8; 4]);
    let source = vec![10u8, 20, 30, 40];
    caller.dma_put(target, remote_addr, 0, source.clone()).await.unwrap();

    let sum_bytes = caller
        .execute_at(
            target,
            ActionKind::Buffer,
            ActionKey::of("sum"),
            source.clone(),
            ResponseKind::Fixed(8),
        )
        .await
        .unwrap();
    let sum: i64 = shad_wire::decode(&sum_bytes).unwrap();
    assert_eq!(sum, 100);

    let back = caller.dma_get(target, remote_addr, 0, 4).await.unwrap();
    assert_eq!(back, source);
}

/// S5: a buffer action that echoes back more bytes than the caller's
/// advertised capacity fails with `ResultBufferTooSmall`; the same call
/// with enough capacity succeeds, run across the same two-locality cluster.
#[tokio::test]
async fn execute_at_with_ret_buff_respects_remote_capacity() {
    let (_cluster, dispatchers) = build_cluster(2, 2, |_id, catalog| {
        catalog.register_buffer("echo16", |bytes| Ok(bytes.to_vec()));
    });

    let caller = &dispatchers[0];
    let target = Locality::new(1);
    let payload = vec![9u8; 16];

    let ok = caller
        .execute_at(
            target,
            ActionKind::Buffer,
            ActionKey::of("echo16"),
            payload.clone(),
            ResponseKind::Variable(16),
        )
        .await;
    assert_eq!(ok.unwrap(), payload);

    let too_small = caller
        .execute_at(
            target,
            ActionKind::Buffer,
            ActionKey::of("echo16"),
            payload,
            ResponseKind::Variable(8),
        )
        .await;
    assert!(matches!(
        too_small,
        Err(RuntimeError::ResultBufferTooSmall { capacity: 8, written: 16 })
    ));
}

/// S6: dispatching to a locality id outside `[0, N)` fails with
/// `InvalidLocality` and never reaches any registered action body.
#[tokio::test]
async fn execute_at_out_of_range_locality_has_no_side_effects() {
    let touched = Arc::new(AtomicI64::new(0));
    let (_cluster, dispatchers) = build_cluster(2, 2, |_id, catalog| {
        let touched = Arc::clone(&touched);
        catalog.register_typed_void::<i64>("touch", move |_| {
            touched.fetch_add(1, Ordering::SeqCst);
        });
    });

    let err = dispatchers[0]
        .execute_at(
            Locality::new(2),
            ActionKind::Typed,
            ActionKey::of("touch"),
            shad_wire::encode(&1i64),
            ResponseKind::None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidLocality(loc) if loc.id() == 2));
    assert_eq!(touched.load(Ordering::SeqCst), 0);
}
