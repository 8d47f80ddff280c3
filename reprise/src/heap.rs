//! Host allocations staged for adoption by driver heaps.
//!
//! The capture records "create heap allocation" commands for memory the
//! application handed to the driver via open-heap-from-address. On replay
//! the pool commits an equivalent writable allocation up front; the open
//! call later consumes it and transfers ownership into the heap's record.

use std::collections::HashMap;
use std::ptr::NonNull;

use crate::error::AllocationError;
use crate::types::HandleId;

/// Committed, zero-initialized host memory with a stable address.
pub struct HeapAllocation {
    data: Box<[u8]>,
}

impl HeapAllocation {
    /// Commits `size` bytes. Reservation failure is reported rather than
    /// aborting, so the caller can route it to the fatal channel.
    pub fn new(size: usize) -> Result<HeapAllocation, AllocationError> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| AllocationError { size })?;
        data.resize(size, 0);
        Ok(HeapAllocation {
            data: data.into_boxed_slice(),
        })
    }

    /// Base address handed to the driver. Stable for the allocation's
    /// lifetime; the driver writes through it once the heap is opened.
    pub fn ptr(&self) -> NonNull<u8> {
        // A boxed slice never yields a null pointer, even when empty.
        NonNull::new(self.data.as_ptr() as *mut u8).unwrap()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Allocations created but not yet adopted by a heap, keyed by the recorded
/// allocation id. An id is present iff neither adoption nor explicit
/// teardown has consumed it.
#[derive(Default)]
pub struct HeapAllocationPool {
    allocations: HashMap<HandleId, HeapAllocation>,
}

impl HeapAllocationPool {
    pub fn create(&mut self, id: HandleId, size: usize) -> Result<(), AllocationError> {
        debug_assert!(
            !self.allocations.contains_key(&id),
            "heap allocation {} created twice",
            id
        );
        let allocation = HeapAllocation::new(size)?;
        self.allocations.insert(id, allocation);
        Ok(())
    }

    /// Removes and returns the allocation; the caller now owns its release.
    pub fn consume(&mut self, id: HandleId) -> Option<HeapAllocation> {
        self.allocations.remove(&id)
    }

    /// Releases the allocation back to the OS.
    pub fn erase(&mut self, id: HandleId) -> bool {
        self.allocations.remove(&id).is_some()
    }

    /// Releases every orphan allocation.
    pub fn clear(&mut self) {
        self.allocations.clear();
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.allocations.contains_key(&id)
    }
}
