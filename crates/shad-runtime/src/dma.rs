// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-locality registry of memory regions reachable by one-sided DMA.
//!
//! This is the callee-side counterpart of `RemoteAddr`
//! (`shad_runtime::transport::RemoteAddr`): every locality keeps one of
//! these, and a `Transport` implementation's `dma_put`/`dma_get` ends up
//! calling `write`/`read` against the *target*'s registry, wherever that
//! registry actually lives (directly, in-process, for
//! `shad-transport-inproc`; over the wire for `shad-transport-tcp`).
//! Grounded on a kernel-side `safe_copy` primitive: the thing that
//! physically moves bytes between two
//! tasks' address spaces during a lease-backed `SEND`/`RECV`/`REPLY` — the
//! same "copy raw bytes between two named regions" operation, minus the
//! MPU region-table bookkeeping that only makes sense with real hardware
//! address spaces.

use shad_wire::RuntimeError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::transport::RemoteAddr;

#[derive(Default)]
pub struct DmaRegistry {
    regions: Mutex<HashMap<u64, Arc<Mutex<Vec<u8>>>>>,
    next_id: AtomicU64,
}

impl DmaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a region and returns the token a remote caller can later
    /// pass to `dma`. This is what an `executeAtWithRet` callee returns
    /// under the remote-address discipline that `dma` expects.
    pub fn register(&self, initial: Vec<u8>) -> RemoteAddr {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.regions
            .lock()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(initial)));
        RemoteAddr(id)
    }

    pub fn write(&self, addr: RemoteAddr, offset: usize, bytes: &[u8]) -> Result<(), RuntimeError> {
        let region = self.region(addr)?;
        let mut region = region.lock().unwrap();
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| RuntimeError::TransportFailure("dma write out of range".into()))?;
        if end > region.len() {
            region.resize(end, 0);
        }
        region[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&self, addr: RemoteAddr, offset: usize, len: usize) -> Result<Vec<u8>, RuntimeError> {
        let region = self.region(addr)?;
        let region = region.lock().unwrap();
        let end = offset
            .checked_add(len)
            .ok_or_else(|| RuntimeError::TransportFailure("dma read out of range".into()))?;
        if end > region.len() {
            return Err(RuntimeError::TransportFailure(
                "dma read past end of region".into(),
            ));
        }
        Ok(region[offset..end].to_vec())
    }

    fn region(&self, addr: RemoteAddr) -> Result<Arc<Mutex<Vec<u8>>>, RuntimeError> {
        self.regions
            .lock()
            .unwrap()
            .get(&addr.0)
            .cloned()
            .ok_or_else(|| RuntimeError::TransportFailure(format!("unknown dma region {addr:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let reg = DmaRegistry::new();
        let addr = reg.register(vec![0u8; 16]);
        reg.write(addr, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(reg.read(addr, 0, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn write_grows_region() {
        let reg = DmaRegistry::new();
        let addr = reg.register(Vec::new());
        reg.write(addr, 4, &[9, 9]).unwrap();
        assert_eq!(reg.read(addr, 0, 6).unwrap(), vec![0, 0, 0, 0, 9, 9]);
    }

    #[test]
    fn read_past_end_fails() {
        let reg = DmaRegistry::new();
        let addr = reg.register(vec![0u8; 4]);
        assert!(reg.read(addr, 0, 8).is_err());
    }
}
