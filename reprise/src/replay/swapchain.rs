//! Swap-chain overrides: window substitution and back-buffer retention.

use crate::error::result_code;
use crate::object::{ExtraInfo, SwapchainInfo};
use crate::types::{ApiResult, HandleId, SwapchainDesc};

use super::Replayer;

const DEFAULT_WINDOW_POSITION_X: i32 = 0;
const DEFAULT_WINDOW_POSITION_Y: i32 = 0;

impl Replayer {
    /// Creates a swap chain against a freshly created replay window, which
    /// is substituted for the window recorded in the desc.
    pub fn create_swapchain(
        &mut self,
        factory_id: HandleId,
        capture_result: ApiResult,
        device_id: Option<HandleId>,
        desc: &SwapchainDesc,
        swapchain_id: HandleId,
    ) -> ApiResult {
        self.create_swapchain_with_window(
            factory_id,
            capture_result,
            device_id,
            desc,
            desc.output_window,
            swapchain_id,
        )
    }

    /// Composition and core-window creation paths replay through the same
    /// windowed path; they never recorded a native window handle.
    pub fn create_swapchain_for_composition(
        &mut self,
        factory_id: HandleId,
        capture_result: ApiResult,
        device_id: Option<HandleId>,
        desc: &SwapchainDesc,
        swapchain_id: HandleId,
    ) -> ApiResult {
        self.create_swapchain_with_window(
            factory_id,
            capture_result,
            device_id,
            desc,
            None,
            swapchain_id,
        )
    }

    fn create_swapchain_with_window(
        &mut self,
        factory_id: HandleId,
        capture_result: ApiResult,
        device_id: Option<HandleId>,
        desc: &SwapchainDesc,
        hwnd_id: Option<HandleId>,
        swapchain_id: HandleId,
    ) -> ApiResult {
        let Some(factory) = self.object_or_warn(factory_id, "create_swapchain") else {
            return ApiResult::FAIL;
        };
        let device = self.resolve(device_id);

        let Some(window) = self.window_factory.create(
            DEFAULT_WINDOW_POSITION_X,
            DEFAULT_WINDOW_POSITION_Y,
            desc.width,
            desc.height,
        ) else {
            self.fatal_error("failed to create a window; replay cannot continue");
            return ApiResult::FAIL;
        };

        let handle = window.raw_window_handle();
        let result = self.driver.create_swapchain(factory, device, handle, desc);
        let replay_result = result_code(&result);

        match result {
            Ok(swapchain) => {
                let window_id = self.windows.insert(window, hwnd_id);
                let record = self.objects.insert(swapchain_id, swapchain);
                record.extra_info = Some(ExtraInfo::Swapchain(SwapchainInfo {
                    window: window_id,
                    hwnd_id,
                    image_count: desc.buffer_count,
                    images: vec![None; desc.buffer_count as usize],
                }));
            }
            Err(_) => self.window_factory.destroy(window),
        }

        self.check_replay_result("create_swapchain", capture_result, replay_result);
        replay_result
    }

    pub fn get_buffer(
        &mut self,
        swapchain_id: HandleId,
        capture_result: ApiResult,
        buffer: u32,
        surface_id: HandleId,
    ) -> ApiResult {
        let Some(swapchain) = self.object_or_warn(swapchain_id, "get_buffer") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.swapchain_buffer(swapchain, buffer);
        let replay_result = result_code(&result);

        if let Ok(surface) = result {
            self.objects.insert(surface_id, surface);

            let slot_unfilled = match self
                .objects
                .get(swapchain_id)
                .and_then(|r| r.swapchain_info())
            {
                Some(info) => info
                    .images
                    .get(buffer as usize)
                    .map_or(false, |slot| slot.is_none()),
                None => {
                    self.fatal_missing_info("swapchain", swapchain_id);
                    false
                }
            };

            if slot_unfilled {
                // The slot holds one keep-alive reference so the buffer
                // record survives the application releasing its own; the
                // slot's lifetime spans queries and ends at resize.
                if let Some(record) = self.objects.get_mut(surface_id) {
                    record.extra_ref += 1;
                }
                if let Some(info) = self
                    .objects
                    .get_mut(swapchain_id)
                    .and_then(|r| r.swapchain_info_mut())
                {
                    info.images[buffer as usize] = Some(surface_id);
                }
            }
        }

        self.check_replay_result("get_buffer", capture_result, replay_result);
        replay_result
    }

    pub fn resize_buffers(
        &mut self,
        swapchain_id: HandleId,
        capture_result: ApiResult,
        buffer_count: u32,
        width: u32,
        height: u32,
        format: u32,
        flags: u32,
    ) -> ApiResult {
        let Some(swapchain) = self.object_or_warn(swapchain_id, "resize_buffers") else {
            return ApiResult::FAIL;
        };

        let result = self
            .driver
            .resize_buffers(swapchain, buffer_count, width, height, format, flags, &[]);
        let replay_result = result_code(&result);

        if result.is_ok() {
            self.reset_swapchain_images(swapchain_id, buffer_count, width, height);
        }

        self.check_replay_result("resize_buffers", capture_result, replay_result);
        replay_result
    }

    /// Multi-node variant carrying per-buffer present queues.
    pub fn resize_buffers1(
        &mut self,
        swapchain_id: HandleId,
        capture_result: ApiResult,
        buffer_count: u32,
        width: u32,
        height: u32,
        format: u32,
        flags: u32,
        present_queue_ids: &[HandleId],
    ) -> ApiResult {
        let Some(swapchain) = self.object_or_warn(swapchain_id, "resize_buffers1") else {
            return ApiResult::FAIL;
        };
        let present_queues: Vec<_> = present_queue_ids
            .iter()
            .filter_map(|&id| self.object_or_warn(id, "resize_buffers1"))
            .collect();

        let result = self.driver.resize_buffers(
            swapchain,
            buffer_count,
            width,
            height,
            format,
            flags,
            &present_queues,
        );
        let replay_result = result_code(&result);

        if result.is_ok() {
            self.reset_swapchain_images(swapchain_id, buffer_count, width, height);
        }

        self.check_replay_result("resize_buffers1", capture_result, replay_result);
        replay_result
    }

    /// Drops the per-slot retention of the old back buffers, sizes the slot
    /// array for the new count, and resizes the replay window.
    fn reset_swapchain_images(
        &mut self,
        swapchain_id: HandleId,
        buffer_count: u32,
        width: u32,
        height: u32,
    ) {
        let (images, window_id) = match self
            .objects
            .get_mut(swapchain_id)
            .and_then(|r| r.swapchain_info_mut())
        {
            Some(info) => (std::mem::take(&mut info.images), info.window),
            None => {
                self.fatal_missing_info("swapchain", swapchain_id);
                return;
            }
        };

        self.release_swapchain_images(images);

        if let Some(info) = self
            .objects
            .get_mut(swapchain_id)
            .and_then(|r| r.swapchain_info_mut())
        {
            info.image_count = buffer_count;
            info.images = vec![None; buffer_count as usize];
        }

        self.windows.set_size(window_id, width, height);
    }

    /// Releases the keep-alive reference each filled slot holds, destroying
    /// buffer records the application has already released.
    pub(crate) fn release_swapchain_images(&mut self, images: Vec<Option<HandleId>>) {
        for image_id in images.into_iter().flatten() {
            let Some(record) = self.objects.get_mut(image_id) else {
                continue;
            };
            if record.extra_ref > 0 {
                record.extra_ref -= 1;
                if record.ref_count == 0 && record.extra_ref == 0 {
                    self.remove_object(image_id);
                }
            }
        }
    }
}
