//! Index of currently-mapped memory regions.
//!
//! Recorded map calls tag the returned pointer with a memory id; later
//! fill-memory commands replay the application's writes by id. An id is
//! indexed iff some resource subresource holds it mapped with a nonzero
//! nesting count (the resource records own the counts, this index owns the
//! pointers).

use std::collections::HashMap;
use std::ptr::NonNull;

use crate::types::HandleId;

#[derive(Default)]
pub struct MappedMemory {
    regions: HashMap<HandleId, NonNull<u8>>,
}

impl MappedMemory {
    pub fn insert(&mut self, memory_id: HandleId, pointer: NonNull<u8>) {
        self.regions.insert(memory_id, pointer);
    }

    pub fn remove(&mut self, memory_id: HandleId) {
        self.regions.remove(&memory_id);
    }

    pub fn contains(&self, memory_id: HandleId) -> bool {
        self.regions.contains_key(&memory_id)
    }

    /// Copies `data` into the mapped region at `offset`. Returns `false`
    /// when the id is not indexed, leaving the caller to warn and skip.
    ///
    /// Safety relies on the trace: the recorded write landed inside the
    /// mapped subresource at capture, and the driver maps an equally-sized
    /// region on replay.
    pub fn apply_fill(&self, memory_id: HandleId, offset: usize, data: &[u8]) -> bool {
        let Some(pointer) = self.regions.get(&memory_id) else {
            return false;
        };
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), pointer.as_ptr().add(offset), data.len());
        }
        true
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }
}
