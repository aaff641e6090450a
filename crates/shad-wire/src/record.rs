// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Marker for a type usable as a typed action's argument or result: a
/// plain-data record (no owning pointers) with a stable in-memory layout on
/// every locality.
///
/// Mirrors the bounds a fixed-size IPC message type places on itself (`M:
/// FromBytes`, `R: AsBytes`): an `ActionRecord` is marshalled by copying its
/// raw bytes with no field reordering and no endian conversion,
/// which is only sound for types with a fixed, `repr(C)`-or-equivalent
/// layout and no padding that could leak uninitialized memory across the
/// wire — `IntoBytes` and `FromBytes` (from `zerocopy`) are exactly the
/// compiler-checked versions of those two properties.
pub trait ActionRecord: IntoBytes + FromBytes + Immutable + Copy + Send + Sync + 'static {}

impl<T> ActionRecord for T where T: IntoBytes + FromBytes + Immutable + Copy + Send + Sync + 'static {}

/// Reinterprets `value` as its raw bytes: the typed-argument marshalling
/// step that serializes an argument as the exact bytes of record `A`.
pub fn encode<T: ActionRecord>(value: &T) -> Vec<u8> {
    value.as_bytes().to_vec()
}

/// Reinterprets `bytes` as a `T` by value, the callee-side counterpart of
/// `encode`. Returns `None` if `bytes` isn't exactly `size_of::<T>()` long,
/// the same size check a fixed-size IPC message performs before casting.
pub fn decode<T: ActionRecord>(bytes: &[u8]) -> Option<T> {
    T::read_from_bytes(bytes).ok()
}
