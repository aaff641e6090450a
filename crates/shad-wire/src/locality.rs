// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one peer process ("locality") participating in a run.
///
/// A `Locality` is a dense index in `[0, N)`, total-ordered by that index,
/// plus a distinguished [`Locality::NULL`] sentinel that never compares
/// equal to a valid locality. Mirrors the index half of a task id built from
/// an index plus a generation counter, minus the generation-number half:
/// this runtime has no task-restart story, so there is nothing for a
/// generation counter to protect against.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Locality(u32);

impl Locality {
    /// Sentinel locality that is never a member of `[0, N)`.
    pub const NULL: Self = Self(u32::MAX);

    /// Builds a locality id without checking it against the live set.
    ///
    /// Use this for ids that are about to be validated with
    /// `LocalityRegistry::check`; prefer that
    /// path over trusting a raw integer from outside the dispatcher.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Fallible form used at the dispatcher boundary (`checkLocality`):
    /// `None` for `NULL` or an id that cannot name a valid locality on its
    /// own terms (out of `u32` range is impossible by construction; this
    /// only rejects `NULL`). Range-checking against the live set of `N`
    /// localities is `LocalityRegistry::check`'s job, not this
    /// constructor's — this just rejects the sentinel.
    pub const fn try_new(id: u32) -> Option<Self> {
        if id == Self::NULL.0 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }
}

impl fmt::Debug for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Locality(null)")
        } else {
            write!(f, "Locality({})", self.0)
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_distinct_from_every_valid_id() {
        for id in 0..8 {
            assert_ne!(Locality::new(id), Locality::NULL);
        }
    }

    #[test]
    fn try_new_rejects_only_the_null_sentinel() {
        assert_eq!(Locality::try_new(0), Some(Locality::new(0)));
        assert_eq!(Locality::try_new(u32::MAX), None);
    }

    #[test]
    fn total_order_by_integer() {
        let mut locs = vec![Locality::new(3), Locality::new(1), Locality::new(2)];
        locs.sort();
        assert_eq!(
            locs,
            vec![Locality::new(1), Locality::new(2), Locality::new(3)]
        );
    }
}
