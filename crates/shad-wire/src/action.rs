// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for an action, resolvable to the same callee on every
/// locality.
///
/// Resolving a callee by raw function address only works in a
/// symmetric-binary deployment, so this instead registers actions under a
/// stable name at startup. `ActionKey::of` hashes the registered name with a
/// fixed, process- and platform-independent algorithm (FNV-1a) so that two
/// processes running the same binary — and therefore performing the same
/// sequence of `ActionCatalog::register_*` calls — agree on every key
/// without any handshake beyond the catalog-checksum exchange done at
/// `initialize()`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ActionKey(u64);

impl ActionKey {
    pub fn of(name: &str) -> Self {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;
        let mut hash = FNV_OFFSET;
        for byte in name.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        Self(hash)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionKey({:#018x})", self.0)
    }
}

/// The two dispatch flavours an action key may resolve to.
///
/// Carried alongside a `Frame` purely so a callee-side catalog mismatch
/// (dispatcher called `executeAt` against a buffer action, say) fails with
/// `ActionUnknown` instead of silently reinterpreting bytes.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize, Hash)]
pub enum ActionKind {
    /// Callee accepts one immutable `A` by value, optionally returns `R`.
    Typed,
    /// Callee accepts a read-only byte span, optionally writes a byte span.
    Buffer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_key() {
        assert_eq!(ActionKey::of("inc_counter"), ActionKey::of("inc_counter"));
    }

    #[test]
    fn different_names_almost_certainly_differ() {
        assert_ne!(ActionKey::of("inc_counter"), ActionKey::of("dec_counter"));
    }
}
