//! Resource memory overrides: mapping, GPU VA observation, external heaps.

use crate::error::result_code;
use crate::object::{ExtraInfo, HeapInfo, MappedSubresource};
use crate::types::{ApiResult, HandleId};

use super::Replayer;

impl Replayer {
    pub fn resource_map(
        &mut self,
        resource_id: HandleId,
        capture_result: ApiResult,
        subresource: u32,
        memory_id: HandleId,
    ) -> ApiResult {
        let Some(resource) = self.object_or_warn(resource_id, "resource_map") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.map(resource, subresource);
        let replay_result = result_code(&result);

        if let Ok(pointer) = result {
            match self
                .objects
                .get_mut(resource_id)
                .and_then(|r| r.resource_info_or_default())
            {
                Some(info) => {
                    let mapped = info
                        .mapped_memory
                        .entry(subresource)
                        .or_insert(MappedSubresource {
                            memory_id,
                            count: 0,
                        });
                    mapped.memory_id = memory_id;
                    mapped.count += 1;
                    self.mapped_memory.insert(memory_id, pointer);
                }
                None => self.fatal_missing_info("resource", resource_id),
            }
        }

        self.check_replay_result("resource_map", capture_result, replay_result);
        replay_result
    }

    pub fn resource_unmap(&mut self, resource_id: HandleId, subresource: u32) {
        let Some(resource) = self.object_or_warn(resource_id, "resource_unmap") else {
            return;
        };

        let mut unindex = None;
        if let Some(info) = self
            .objects
            .get_mut(resource_id)
            .and_then(|r| r.resource_info_mut())
        {
            if let Some(mapped) = info.mapped_memory.get_mut(&subresource) {
                debug_assert!(mapped.count > 0);
                mapped.count -= 1;
                if mapped.count == 0 {
                    unindex = Some(mapped.memory_id);
                    info.mapped_memory.remove(&subresource);
                }
            }
        }
        if let Some(memory_id) = unindex {
            self.mapped_memory.remove(memory_id);
        }

        self.driver.unmap(resource, subresource);
    }

    /// Observes the address pair of a resource. The first observation is
    /// the one recorded and registered for translation.
    pub fn get_gpu_virtual_address(&mut self, resource_id: HandleId, capture_result: u64) -> u64 {
        let Some(resource) = self.object_or_warn(resource_id, "get_gpu_virtual_address") else {
            return capture_result;
        };

        let replay_result = self.driver.gpu_virtual_address(resource);

        if capture_result != 0 && replay_result != 0 {
            let width = self.driver.resource_width(resource);
            match self
                .objects
                .get_mut(resource_id)
                .and_then(|r| r.resource_info_or_default())
            {
                Some(info) => {
                    // Only initialize on the first call.
                    if info.capture_address == 0 {
                        info.capture_address = capture_result;
                        info.replay_address = replay_result;
                        self.gpu_va_map
                            .add(resource_id, capture_result, replay_result, width);
                    }
                }
                None => self.fatal_missing_info("resource", resource_id),
            }
        }

        replay_result
    }

    /// Rewrites a recorded GPU VA in place; see [`crate::gpu_va::GpuVaMap`].
    pub fn map_gpu_virtual_address(&self, address: &mut u64) {
        *address = self.gpu_va_map.translate(*address);
    }

    pub fn map_gpu_virtual_addresses(&self, addresses: &mut [u64]) {
        self.gpu_va_map.translate_many(addresses);
    }

    /// Hands a pre-committed host allocation to the driver as a heap. On
    /// success the allocation's lifetime transfers to the heap record; on
    /// failure it is released immediately. Either way the pool entry is
    /// consumed.
    pub fn open_existing_heap_from_address(
        &mut self,
        device_id: HandleId,
        capture_result: ApiResult,
        allocation_id: HandleId,
        heap_id: HandleId,
    ) -> ApiResult {
        let Some(device) = self.object_or_warn(device_id, "open_existing_heap_from_address") else {
            return ApiResult::FAIL;
        };

        let Some(allocation) = self.heap_allocations.consume(allocation_id) else {
            self.fatal_error(&format!(
                "no heap allocation has been created for open-heap-from-address allocation id {}",
                allocation_id
            ));
            return ApiResult::FAIL;
        };

        let result = self
            .driver
            .open_heap_from_address(device, allocation.ptr(), allocation.len());
        let replay_result = result_code(&result);

        match result {
            Ok(heap) => {
                let record = self.objects.insert(heap_id, heap);
                record.extra_info = Some(ExtraInfo::Heap(HeapInfo {
                    external_allocation: Some(allocation),
                }));
            }
            Err(_) => {
                // The driver never adopted the memory.
                drop(allocation);
            }
        }

        self.check_replay_result("open_existing_heap_from_address", capture_result, replay_result);
        replay_result
    }

    pub fn write_to_subresource(
        &mut self,
        _resource_id: HandleId,
        _capture_result: ApiResult,
        _dst_subresource: u32,
        _src_data: &[u8],
        _src_row_pitch: u32,
        _src_depth_pitch: u32,
    ) -> ApiResult {
        // TODO: needs staging-buffer plumbing to rebuild subresource
        // contents on replay.
        ApiResult::FAIL
    }

    pub fn read_from_subresource(
        &mut self,
        _resource_id: HandleId,
        _capture_result: ApiResult,
        _dst_row_pitch: u32,
        _dst_depth_pitch: u32,
        _src_subresource: u32,
    ) -> ApiResult {
        // TODO: needs staging-buffer plumbing to rebuild subresource
        // contents on replay.
        ApiResult::FAIL
    }
}
