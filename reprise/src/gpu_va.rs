//! Translation of capture-time GPU virtual addresses.
//!
//! Command streams recorded at capture reference the addresses the capture
//! run's driver assigned; the replay driver assigns fresh ones. Each
//! resource contributes one `[base, base + width)` range on first address
//! observation, and translation rewrites any address inside a known range
//! to the same offset in the replay range. Addresses outside every range
//! are left untouched: they may be null, sentinels, or offsets into ranges
//! that the trace has not revealed yet.

use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::warn;

use crate::types::HandleId;

struct VaRange {
    replay_base: u64,
    width: u64,
    resource: HandleId,
}

#[derive(Default)]
pub struct GpuVaMap {
    /// Ranges keyed by capture-time base address.
    ranges: BTreeMap<u64, VaRange>,
}

impl GpuVaMap {
    /// Records the address pair of a resource. The first observation is
    /// authoritative: re-adding the same resource at the same base is a
    /// no-op. A conflicting overlap indicates the capture reused an address
    /// span whose owner this map still considers live; the stale span is
    /// replaced.
    pub fn add(&mut self, resource: HandleId, capture_base: u64, replay_base: u64, width: u64) {
        if let Some((&base, range)) = self
            .ranges
            .range((Bound::Unbounded, Bound::Included(capture_base)))
            .next_back()
        {
            if base == capture_base && range.resource == resource {
                return;
            }
            if capture_base < base + range.width {
                warn!(
                    "GPU VA range {:#x}..{:#x} of resource {} overlaps live range of resource {}; replacing",
                    capture_base,
                    capture_base + width,
                    resource,
                    range.resource,
                );
                self.ranges.remove(&base);
            }
        }

        self.ranges.insert(
            capture_base,
            VaRange {
                replay_base,
                width,
                resource,
            },
        );
    }

    /// Removes the range a resource added, if it is still the owner.
    pub fn remove(&mut self, resource: HandleId, capture_base: u64) {
        if let Some(range) = self.ranges.get(&capture_base) {
            if range.resource == resource {
                self.ranges.remove(&capture_base);
            }
        }
    }

    /// Translates a single address, returning it unchanged when it falls
    /// outside every known range.
    pub fn translate(&self, address: u64) -> u64 {
        match self
            .ranges
            .range((Bound::Unbounded, Bound::Included(address)))
            .next_back()
        {
            Some((&base, range)) if address < base + range.width => {
                range.replay_base + (address - base)
            }
            _ => address,
        }
    }

    /// Rewrites a batch of addresses in place.
    pub fn translate_many(&self, addresses: &mut [u64]) {
        for address in addresses {
            *address = self.translate(*address);
        }
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}
