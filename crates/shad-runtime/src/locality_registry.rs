// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use shad_wire::{Locality, RuntimeError};

/// The fixed set of localities agreed during `initialize()`.
///
/// Created once per process and never mutated afterward: the process-wide
/// set of live localities is fixed between `initialize()` and `finalize()`,
/// so unlike a restartable task table (which can respawn a faulted task in
/// place) there is no generation
/// counter here to bump.
#[derive(Clone, Copy, Debug)]
pub struct LocalityRegistry {
    this: Locality,
    count: u32,
}

impl LocalityRegistry {
    pub fn new(this: Locality, count: u32) -> Self {
        assert!(
            this.id() < count,
            "this locality {this:?} must be within [0, {count})"
        );
        Self { this, count }
    }

    pub fn this_locality(&self) -> Locality {
        self.this
    }

    pub fn num_localities(&self) -> u32 {
        self.count
    }

    /// Lazy ordered sequence `0..N`.
    pub fn all_localities(&self) -> impl Iterator<Item = Locality> + Clone {
        let count = self.count;
        (0..count).map(Locality::new)
    }

    /// `checkLocality(L)`: fails with `InvalidLocality` when `L.id >= N`.
    pub fn check(&self, loc: Locality) -> Result<(), RuntimeError> {
        if loc.is_null() || loc.id() >= self.count {
            Err(RuntimeError::InvalidLocality(loc))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ids_in_range() {
        let reg = LocalityRegistry::new(Locality::new(0), 4);
        for id in 0..4 {
            assert!(reg.check(Locality::new(id)).is_ok());
        }
    }

    #[test]
    fn rejects_out_of_range_and_null() {
        let reg = LocalityRegistry::new(Locality::new(0), 4);
        assert!(matches!(
            reg.check(Locality::new(4)),
            Err(RuntimeError::InvalidLocality(_))
        ));
        assert!(matches!(
            reg.check(Locality::NULL),
            Err(RuntimeError::InvalidLocality(_))
        ));
    }

    #[test]
    fn all_localities_is_dense_and_ordered() {
        let reg = LocalityRegistry::new(Locality::new(2), 5);
        let ids: Vec<u32> = reg.all_localities().map(Locality::id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }
}
