// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use shad_wire::{ActionKey, ActionRecord, RuntimeError};
use std::collections::HashMap;
use std::sync::Arc;

/// A registered callee: takes the raw argument bytes, returns the raw
/// result bytes (empty if the action is void). Both typed and buffer
/// actions end up here — the only difference between them is how the bytes
/// were produced on the caller side and how they get reinterpreted on the
/// callee side, which the `register_*` wrappers below handle. This
/// byte-in/byte-out shape mirrors an IPC layer where a raw send/recv call
/// only ever moves bytes and a typed message is a thin cast on top, without
/// pretending Rust has a function-pointer-as-key trick available across
/// independently compiled binaries.
pub type CallFn = dyn Fn(&[u8]) -> Result<Vec<u8>, RuntimeError> + Send + Sync;

/// A registered `forEach` body: takes the decoded argument bytes and one
/// iteration index.
pub type ForEachFn = dyn Fn(&[u8], u64) -> Result<(), RuntimeError> + Send + Sync;

/// Maps stable action keys to local function entry points.
///
/// Every locality in a run constructs its catalog by calling the same
/// sequence of `register_*` calls (typically from one `build(&mut
/// ActionCatalog)` function shared by the whole binary), so `ActionKey::of`
/// resolves to the same entry everywhere without needing symmetric-binary
/// address equality — the portable alternative to resolving a callee by raw
/// function address.
#[derive(Default)]
pub struct ActionCatalog {
    calls: HashMap<ActionKey, Arc<CallFn>>,
    for_each: HashMap<ActionKey, Arc<ForEachFn>>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed action with a result (`Ret<R>`).
    pub fn register_typed<A, R>(
        &mut self,
        name: &str,
        f: impl Fn(&A) -> R + Send + Sync + 'static,
    ) -> ActionKey
    where
        A: ActionRecord,
        R: ActionRecord,
    {
        let key = ActionKey::of(name);
        let call: Arc<CallFn> = Arc::new(move |bytes: &[u8]| {
            let arg: A = shad_wire::decode(bytes)
                .ok_or_else(|| RuntimeError::TransportFailure("argument size mismatch".into()))?;
            let result = f(&arg);
            Ok(shad_wire::encode(&result))
        });
        self.calls.insert(key, call);
        key
    }

    /// Registers a typed action with no result (`executeAt`).
    pub fn register_typed_void<A>(
        &mut self,
        name: &str,
        f: impl Fn(&A) + Send + Sync + 'static,
    ) -> ActionKey
    where
        A: ActionRecord,
    {
        let key = ActionKey::of(name);
        let call: Arc<CallFn> = Arc::new(move |bytes: &[u8]| {
            let arg: A = shad_wire::decode(bytes)
                .ok_or_else(|| RuntimeError::TransportFailure("argument size mismatch".into()))?;
            f(&arg);
            Ok(Vec::new())
        });
        self.calls.insert(key, call);
        key
    }

    /// Registers a buffer action: callee receives a read-only
    /// span and returns the bytes it wants to write back, if any. The
    /// dispatcher (not the callee) is responsible for checking the result
    /// against the caller's advertised capacity (`ResultBufferTooSmall`) —
    /// the callee here just reports what it produced.
    pub fn register_buffer(
        &mut self,
        name: &str,
        f: impl Fn(&[u8]) -> Result<Vec<u8>, RuntimeError> + Send + Sync + 'static,
    ) -> ActionKey {
        let key = ActionKey::of(name);
        let call: Arc<CallFn> = Arc::new(f);
        self.calls.insert(key, call);
        key
    }

    /// Registers the body of a `forEach*` action.
    pub fn register_for_each<A>(
        &mut self,
        name: &str,
        f: impl Fn(&A, u64) + Send + Sync + 'static,
    ) -> ActionKey
    where
        A: ActionRecord,
    {
        let key = ActionKey::of(name);
        let body: Arc<ForEachFn> = Arc::new(move |bytes: &[u8], i: u64| {
            let arg: A = shad_wire::decode(bytes)
                .ok_or_else(|| RuntimeError::TransportFailure("argument size mismatch".into()))?;
            f(&arg, i);
            Ok(())
        });
        self.for_each.insert(key, body);
        key
    }

    pub fn lookup_call(&self, key: ActionKey) -> Result<Arc<CallFn>, RuntimeError> {
        self.calls
            .get(&key)
            .cloned()
            .ok_or(RuntimeError::ActionUnknown(key))
    }

    pub fn lookup_for_each(&self, key: ActionKey) -> Result<Arc<ForEachFn>, RuntimeError> {
        self.for_each
            .get(&key)
            .cloned()
            .ok_or(RuntimeError::ActionUnknown(key))
    }

    /// Number of registered actions, used as a cheap consistency checksum at
    /// handshake time to detect a memory-layout mismatch between localities
    /// for a typed action before any action actually runs.
    pub fn checksum(&self) -> u64 {
        let mut keys: Vec<u64> = self
            .calls
            .keys()
            .chain(self.for_each.keys())
            .map(|k| k.raw())
            .collect();
        keys.sort_unstable();
        keys.into_iter().fold(0xcbf29ce484222325u64, |acc, k| {
            (acc ^ k).wrapping_mul(0x100000001b3)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip() {
        let mut cat = ActionCatalog::new();
        let key = cat.register_typed::<i64, i64>("double", |a| a * 2);
        let f = cat.lookup_call(key).unwrap();
        let out = f(&shad_wire::encode(&21i64)).unwrap();
        let result: i64 = shad_wire::decode(&out).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn unknown_key_errors() {
        let cat = ActionCatalog::new();
        assert!(cat.lookup_call(shad_wire::ActionKey::of("nope")).is_err());
    }

    #[test]
    fn checksum_is_order_independent() {
        let mut a = ActionCatalog::new();
        a.register_typed_void::<i64>("x", |_| {});
        a.register_typed_void::<i64>("y", |_| {});

        let mut b = ActionCatalog::new();
        b.register_typed_void::<i64>("y", |_| {});
        b.register_typed_void::<i64>("x", |_| {});

        assert_eq!(a.checksum(), b.checksum());
    }
}
