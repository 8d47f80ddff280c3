//! Device, factory, descriptor-heap and pipeline-library overrides.

use tracing::error;

use crate::driver::{Driver, ObjectHandle, FACTORY_FLAG_VALIDATION};
use crate::error::{result_code, DriverResult};
use crate::event::HostEvent;
use crate::object::{
    DescriptorHeapInfo, DeviceInfo, ExtraInfo, FenceInfo, QueueInfo, QueueSync,
};
use crate::types::{ApiResult, CommandQueueDesc, DescriptorHeapDesc, DescriptorKind, HandleId};

use super::Replayer;

impl Replayer {
    pub fn create_factory(
        &mut self,
        capture_result: ApiResult,
        mut flags: u32,
        factory_id: HandleId,
    ) -> ApiResult {
        if self.options.enable_validation_layer {
            flags |= FACTORY_FLAG_VALIDATION;
        }

        let result = self.driver.create_factory(flags);
        let replay_result = result_code(&result);

        if let Ok(factory) = result {
            self.objects.insert(factory_id, factory);
        }

        self.check_replay_result("create_factory", capture_result, replay_result);
        replay_result
    }

    pub fn create_device(
        &mut self,
        adapter_id: Option<HandleId>,
        capture_result: ApiResult,
        minimum_feature_level: u32,
        device_id: HandleId,
    ) -> ApiResult {
        let adapter = self.resolve(adapter_id);

        let result = self.driver.create_device(adapter, minimum_feature_level);
        let replay_result = result_code(&result);

        if let Ok(device) = result {
            let record = self.objects.insert(device_id, device);
            record.extra_info = Some(ExtraInfo::Device(DeviceInfo::default()));
        }

        self.check_replay_result("create_device", capture_result, replay_result);
        replay_result
    }

    pub fn create_command_queue(
        &mut self,
        device_id: HandleId,
        capture_result: ApiResult,
        desc: &CommandQueueDesc,
        queue_id: HandleId,
    ) -> ApiResult {
        let Some(device) = self.object_or_warn(device_id, "create_command_queue") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.create_command_queue(device, desc);
        let replay_result = result_code(&result);

        if let Ok(queue) = result {
            let mut queue_info = QueueInfo::default();

            // The sync option hangs a private fence/event pair off every
            // queue at creation time.
            if self.options.sync_queue_submissions {
                match self.driver.create_fence(device, 0) {
                    Ok(fence) => {
                        queue_info.sync = Some(QueueSync {
                            fence,
                            event: HostEvent::new(),
                            value: 0,
                            fence_info: FenceInfo::default(),
                        });
                    }
                    Err(e) => {
                        error!(
                            "failed to create a fence for the queue submission sync option: {}",
                            e
                        );
                    }
                }
            }

            let record = self.objects.insert(queue_id, queue);
            record.extra_info = Some(ExtraInfo::CommandQueue(queue_info));
        }

        self.check_replay_result("create_command_queue", capture_result, replay_result);
        replay_result
    }

    pub fn create_descriptor_heap(
        &mut self,
        device_id: HandleId,
        capture_result: ApiResult,
        desc: &DescriptorHeapDesc,
        heap_id: HandleId,
    ) -> ApiResult {
        let Some(device) = self.object_or_warn(device_id, "create_descriptor_heap") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.create_descriptor_heap(device, desc);
        let replay_result = result_code(&result);

        if let Ok(heap) = result {
            if self.objects.get(device_id).and_then(|r| r.device_info()).is_none() {
                self.fatal_missing_info("device", device_id);
            }

            let record = self.objects.insert(heap_id, heap);
            record.extra_info = Some(ExtraInfo::DescriptorHeap(DescriptorHeapInfo {
                kind: desc.kind,
                device: device_id,
                capacity: desc.capacity,
                capture_cpu_base: None,
                replay_cpu_base: None,
                capture_gpu_base: None,
                replay_gpu_base: None,
            }));
        }

        self.check_replay_result("create_descriptor_heap", capture_result, replay_result);
        replay_result
    }

    /// Records the replay increment beside the captured one; the pair is
    /// what lets recorded descriptor handles be rescaled on this device.
    pub fn get_descriptor_handle_increment_size(
        &mut self,
        device_id: HandleId,
        capture_result: u32,
        kind: DescriptorKind,
    ) -> u32 {
        let Some(device) = self.object_or_warn(device_id, "get_descriptor_handle_increment_size")
        else {
            return capture_result;
        };

        let replay_result = self.driver.descriptor_increment(device, kind);

        match self.objects.get_mut(device_id).and_then(|r| r.device_info_mut()) {
            Some(info) => {
                info.replay_increments[kind.index()] = replay_result;
                if capture_result != 0 {
                    info.capture_increments[kind.index()] = capture_result;
                }
            }
            None => self.fatal_missing_info("device", device_id),
        }

        replay_result
    }

    pub fn get_cpu_descriptor_handle_for_heap_start(
        &mut self,
        heap_id: HandleId,
        capture_result: u64,
    ) -> u64 {
        let Some(heap) = self.object_or_warn(heap_id, "get_cpu_descriptor_handle_for_heap_start")
        else {
            return capture_result;
        };

        let replay_result = self.driver.cpu_descriptor_base(heap);

        match self
            .objects
            .get_mut(heap_id)
            .and_then(|r| r.descriptor_heap_info_mut())
        {
            Some(info) => {
                // Only initialize on the first call.
                if info.replay_cpu_base.is_none() {
                    info.replay_cpu_base = Some(replay_result);
                    if capture_result != 0 {
                        info.capture_cpu_base = Some(capture_result);
                    }
                }
            }
            None => self.fatal_missing_info("descriptor heap", heap_id),
        }

        replay_result
    }

    pub fn get_gpu_descriptor_handle_for_heap_start(
        &mut self,
        heap_id: HandleId,
        capture_result: u64,
    ) -> u64 {
        let Some(heap) = self.object_or_warn(heap_id, "get_gpu_descriptor_handle_for_heap_start")
        else {
            return capture_result;
        };

        let replay_result = self.driver.gpu_descriptor_base(heap);

        match self
            .objects
            .get_mut(heap_id)
            .and_then(|r| r.descriptor_heap_info_mut())
        {
            Some(info) => {
                // Only initialize on the first call.
                if info.replay_gpu_base.is_none() {
                    info.replay_gpu_base = Some(replay_result);
                    if capture_result != 0 {
                        info.capture_gpu_base = Some(capture_result);
                    }
                }
            }
            None => self.fatal_missing_info("descriptor heap", heap_id),
        }

        replay_result
    }

    /// Rewrites a recorded CPU descriptor handle into the replay heap it
    /// points into. Handles outside every observed heap pass through
    /// unchanged, like untranslatable GPU VAs.
    pub fn map_cpu_descriptor(&self, handle: u64) -> u64 {
        self.map_descriptor(handle, |info| (info.capture_cpu_base, info.replay_cpu_base))
    }

    /// GPU-handle counterpart of [`Replayer::map_cpu_descriptor`].
    pub fn map_gpu_descriptor(&self, handle: u64) -> u64 {
        self.map_descriptor(handle, |info| (info.capture_gpu_base, info.replay_gpu_base))
    }

    fn map_descriptor(
        &self,
        handle: u64,
        bases: impl Fn(&DescriptorHeapInfo) -> (Option<u64>, Option<u64>),
    ) -> u64 {
        // The owning heap is the one with the highest observed base at or
        // below the handle whose extent still covers it.
        let mut best: Option<(u64, u64)> = None;

        for record in self.objects.records() {
            let Some(ExtraInfo::DescriptorHeap(info)) = &record.extra_info else {
                continue;
            };
            let (Some(capture_base), Some(replay_base)) = bases(info) else {
                continue;
            };
            if handle < capture_base {
                continue;
            }
            let offset = handle - capture_base;

            let increments = self.objects.get(info.device).and_then(|r| r.device_info());
            let capture_inc =
                increments.map_or(0, |d| d.capture_increments[info.kind.index()]) as u64;
            let replay_inc =
                increments.map_or(0, |d| d.replay_increments[info.kind.index()]) as u64;

            if capture_inc != 0 && offset >= info.capacity as u64 * capture_inc {
                continue;
            }

            let translated = if capture_inc != 0 && replay_inc != 0 {
                replay_base + (offset / capture_inc) * replay_inc + offset % capture_inc
            } else {
                replay_base + offset
            };

            if best.map_or(true, |(base, _)| capture_base > base) {
                best = Some((capture_base, translated));
            }
        }

        best.map_or(handle, |(_, translated)| translated)
    }

    pub fn check_feature_support(
        &mut self,
        device_id: HandleId,
        capture_result: ApiResult,
        feature: u32,
        feature_data: &mut [u8],
    ) -> ApiResult {
        let Some(device) = self.object_or_warn(device_id, "check_feature_support") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.check_feature_support(device, feature, feature_data);
        let replay_result = result_code(&result);

        self.check_replay_result("check_feature_support", capture_result, replay_result);
        replay_result
    }

    pub fn create_pipeline_library(
        &mut self,
        device_id: HandleId,
        capture_result: ApiResult,
        blob: &[u8],
        library_id: HandleId,
    ) -> ApiResult {
        // The capture layer can fail this call on purpose to make the
        // application rebuild the library; replay skips it the same way.
        if capture_result == ApiResult::DRIVER_VERSION_MISMATCH {
            return capture_result;
        }

        let Some(device) = self.object_or_warn(device_id, "create_pipeline_library") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.create_pipeline_library(device, blob);
        let replay_result = result_code(&result);

        if let Ok(library) = result {
            self.objects.insert(library_id, library);
        }

        self.check_replay_result("create_pipeline_library", capture_result, replay_result);
        replay_result
    }

    pub fn load_graphics_pipeline(
        &mut self,
        library_id: HandleId,
        capture_result: ApiResult,
        name: &str,
        desc: &[u8],
        state_id: HandleId,
    ) -> ApiResult {
        self.load_pipeline_common(
            "load_graphics_pipeline",
            library_id,
            capture_result,
            state_id,
            |driver, library| driver.load_graphics_pipeline(library, name, desc),
        )
    }

    pub fn load_compute_pipeline(
        &mut self,
        library_id: HandleId,
        capture_result: ApiResult,
        name: &str,
        desc: &[u8],
        state_id: HandleId,
    ) -> ApiResult {
        self.load_pipeline_common(
            "load_compute_pipeline",
            library_id,
            capture_result,
            state_id,
            |driver, library| driver.load_compute_pipeline(library, name, desc),
        )
    }

    pub fn load_pipeline(
        &mut self,
        library_id: HandleId,
        capture_result: ApiResult,
        name: &str,
        desc: &[u8],
        state_id: HandleId,
    ) -> ApiResult {
        self.load_pipeline_common(
            "load_pipeline",
            library_id,
            capture_result,
            state_id,
            |driver, library| driver.load_pipeline(library, name, desc),
        )
    }

    fn load_pipeline_common(
        &mut self,
        call_name: &str,
        library_id: HandleId,
        capture_result: ApiResult,
        state_id: HandleId,
        load: impl FnOnce(&dyn Driver, ObjectHandle) -> DriverResult<ObjectHandle>,
    ) -> ApiResult {
        // The capture layer fails loads from a library it invalidated; the
        // application then recreates the pipeline, and so does the replay.
        if capture_result == ApiResult::INVALID_ARG {
            return capture_result;
        }

        let Some(library) = self.object_or_warn(library_id, call_name) else {
            return ApiResult::FAIL;
        };

        let result = load(self.driver.as_ref(), library);
        let replay_result = result_code(&result);

        if let Ok(state) = result {
            self.objects.insert(state_id, state);
        }

        self.check_replay_result(call_name, capture_result, replay_result);
        replay_result
    }
}
