//! Mapping between the full parameter vector and the optimizer's sub-vector.
//!
//! The optimizer never sees absolute values. It moves offsets from a
//! committed baseline, and only in the slots the mask marks free.

use crate::schematic::{ComponentId, ParameterVector, SLOT_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariabilityMask([bool; SLOT_COUNT]);

impl VariabilityMask {
    pub fn from_components(free: &[ComponentId]) -> Self {
        let mut mask = [false; SLOT_COUNT];
        for id in free {
            mask[id.index()] = true;
        }
        VariabilityMask(mask)
    }

    pub fn is_free(&self, id: ComponentId) -> bool {
        self.0[id.index()]
    }

    /// Number of free slots, i.e. the optimizer's dimension.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&free| free).count()
    }

    /// Free slots in packing order.
    pub fn free_slots(&self) -> impl Iterator<Item = ComponentId> + '_ {
        ComponentId::ALL.into_iter().filter(move |id| self.is_free(*id))
    }

    /// Extract the free slots of `full`.
    pub fn pack(&self, full: &ParameterVector) -> Vec<f64> {
        self.free_slots().map(|id| full[id]).collect()
    }

    /// Add `offsets` onto the free slots of `base`. Fixed slots keep the
    /// baseline value.
    pub fn unroll(&self, base: &ParameterVector, offsets: &[f64]) -> ParameterVector {
        debug_assert_eq!(offsets.len(), self.count(), "offset count must match free slots");
        let mut full = *base;
        for (id, offset) in self.free_slots().zip(offsets) {
            full[id] += offset;
        }
        full
    }
}
