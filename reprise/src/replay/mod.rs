//! The replay dispatcher.
//!
//! The trace decoder drives one method per recorded API call, in trace
//! order, on a single thread. Each override resolves capture ids to live
//! driver objects, substitutes host resources (windows, events, mapped
//! memory), issues the driver call, and folds the outcome back into the
//! tables. The dispatcher is split across this module and its siblings the
//! same way the state it manages is: synchronization in `sync`, device and
//! descriptor state in `device`, resource memory in `resource`, swap
//! chains in `swapchain`.

use std::time::Duration;

use tracing::{error, trace_span, warn};

use raw_window_handle::RawWindowHandle;

use crate::driver::{Driver, ObjectHandle};
use crate::event::{EventRegistry, HostEvent};
use crate::gpu_va::GpuVaMap;
use crate::heap::HeapAllocationPool;
use crate::mapped_memory::MappedMemory;
use crate::object::{ExtraInfo, FenceRef, ObjectRecord, ObjectTable};
use crate::types::{ApiCallId, ApiResult, HandleId};
use crate::window::{WindowFactory, WindowTable};

mod device;
mod resource;
mod swapchain;
mod sync;

/// Options recognized by the replay core, supplied by the host at startup.
#[derive(Clone, Debug)]
pub struct ReplayOptions {
    /// Enable driver-side validation; silently downgraded when the driver
    /// refuses.
    pub enable_validation_layer: bool,
    /// Run every queue submission in lockstep with the host.
    pub sync_queue_submissions: bool,
    /// Bound for every synchronous wait except shutdown and lockstep waits.
    pub wait_timeout: Duration,
}

impl Default for ReplayOptions {
    fn default() -> ReplayOptions {
        ReplayOptions {
            enable_validation_layer: false,
            sync_queue_submissions: false,
            wait_timeout: Duration::from_secs(10),
        }
    }
}

/// A host-side object resolved for a call that passes raw handles through
/// the API rather than capture ids.
pub enum ExternalObject {
    Event(HostEvent),
    Window(RawWindowHandle),
}

pub type FatalErrorHandler = Box<dyn Fn(&str)>;

/// Replay-side state machine for one trace.
///
/// Owns every table the replay needs; separate replays in one process use
/// separate instances. All methods must be called from the decoder thread.
pub struct Replayer {
    pub(crate) driver: Box<dyn Driver>,
    pub(crate) window_factory: Box<dyn WindowFactory>,
    pub(crate) options: ReplayOptions,
    pub(crate) objects: ObjectTable,
    pub(crate) gpu_va_map: GpuVaMap,
    pub(crate) heap_allocations: HeapAllocationPool,
    pub(crate) mapped_memory: MappedMemory,
    pub(crate) windows: WindowTable,
    pub(crate) events: EventRegistry,
    fatal_error_handler: Option<FatalErrorHandler>,
    shut_down: bool,
}

impl Replayer {
    pub fn new(
        driver: Box<dyn Driver>,
        window_factory: Box<dyn WindowFactory>,
        mut options: ReplayOptions,
    ) -> Replayer {
        if options.enable_validation_layer {
            if let Err(e) = driver.enable_validation() {
                warn!("failed to enable the driver validation layer: {}", e);
                options.enable_validation_layer = false;
            }
        }

        Replayer {
            driver,
            window_factory,
            options,
            objects: ObjectTable::default(),
            gpu_va_map: GpuVaMap::default(),
            heap_allocations: HeapAllocationPool::default(),
            mapped_memory: MappedMemory::default(),
            windows: WindowTable::default(),
            events: EventRegistry::default(),
            fatal_error_handler: None,
            shut_down: false,
        }
    }

    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    /// Installs the callback invoked with a message when replay cannot
    /// continue. Without one, fatal errors are only logged.
    pub fn set_fatal_error_handler(&mut self, handler: FatalErrorHandler) {
        self.fatal_error_handler = Some(handler);
    }

    pub(crate) fn fatal_error(&self, message: &str) {
        error!("{}", message);
        if let Some(handler) = &self.fatal_error_handler {
            handler(message);
        }
    }

    /// Fatal report for a record that should carry extra info but does not;
    /// this indicates a capture defect, not a replay one.
    pub(crate) fn fatal_missing_info(&self, kind: &str, id: HandleId) {
        self.fatal_error(&format!(
            "{} object {} does not have an associated info record",
            kind, id
        ));
    }

    /// Compares the replay status of a call against the captured one. A
    /// mismatch is tolerated with a warning unless the device was lost.
    pub fn check_replay_result(
        &self,
        call_name: &str,
        capture_result: ApiResult,
        replay_result: ApiResult,
    ) {
        if capture_result != replay_result {
            if replay_result == ApiResult::DEVICE_REMOVED {
                self.fatal_error(&format!(
                    "{} returned {}, which does not match the value returned at capture {}; \
                     replay cannot continue",
                    call_name, replay_result, capture_result
                ));
            } else {
                warn!(
                    "{} returned {}, which does not match the value returned at capture {}",
                    call_name, replay_result, capture_result
                );
            }
        }
    }

    // --- object table -----------------------------------------------------

    /// Registers an object produced by a call without a dedicated override.
    pub fn add_object(&mut self, capture_id: HandleId, object: ObjectHandle) {
        self.objects.insert(capture_id, object);
    }

    pub fn object_record(&self, capture_id: HandleId) -> Option<&ObjectRecord> {
        self.objects.get(capture_id)
    }

    /// The live driver object for a capture id.
    pub fn object(&self, capture_id: HandleId) -> Option<ObjectHandle> {
        self.objects.object(capture_id)
    }

    /// Resolves an optional object argument, mapping both "not recorded"
    /// and "no longer live" to the null handle the way the capture passed
    /// null pointers through.
    pub(crate) fn resolve(&self, id: Option<HandleId>) -> ObjectHandle {
        id.and_then(|id| self.objects.object(id))
            .unwrap_or(ObjectHandle::NULL)
    }

    pub(crate) fn object_or_warn(&self, id: HandleId, call_name: &str) -> Option<ObjectHandle> {
        let object = self.objects.object(id);
        if object.is_none() {
            warn!("{} references unknown object {}", call_name, id);
        }
        object
    }

    pub fn add_ref(&mut self, object_id: HandleId, _capture_result: u32) -> u32 {
        let Some(record) = self.objects.get_mut(object_id) else {
            warn!("add_ref references unknown object {}", object_id);
            return 0;
        };
        record.ref_count += 1;
        let object = record.object;
        self.driver.add_ref(object)
    }

    pub fn release(&mut self, object_id: HandleId, _capture_result: u32) -> u32 {
        let Some(record) = self.objects.get_mut(object_id) else {
            warn!("release references unknown object {}", object_id);
            return 0;
        };
        debug_assert!(record.ref_count > 0, "release of object {} with no replay references", object_id);
        record.ref_count = record.ref_count.saturating_sub(1);
        let object = record.object;
        if record.ref_count == 0 && record.extra_ref == 0 {
            self.remove_object(object_id);
        }
        self.driver.release(object)
    }

    /// Destroys the record for `capture_id`, tearing down its extra info.
    pub(crate) fn remove_object(&mut self, capture_id: HandleId) {
        if let Some(record) = self.objects.remove(capture_id) {
            self.destroy_record(record, true);
        }
    }

    /// Kind-specific teardown of a record already detached from the table.
    /// Not reentrant for the same record; it may cascade into others.
    ///
    /// Fences and queues name each other by capture id without owning each
    /// other, so teardown of either side removes the entries naming it on
    /// the survivors.
    fn destroy_record(&mut self, record: ObjectRecord, release_extra_refs: bool) {
        let capture_id = record.capture_id;
        match record.extra_info {
            Some(ExtraInfo::Resource(info)) => {
                if info.capture_address != 0 {
                    self.gpu_va_map.remove(capture_id, info.capture_address);
                }
                for mapped in info.mapped_memory.values() {
                    self.mapped_memory.remove(mapped.memory_id);
                }
            }
            Some(ExtraInfo::Fence(_)) => {
                // Every queue entry naming this fence is dead: a wait on it
                // can never be signaled and a deferred signal has no state
                // to reach. Drop them, then drain whatever they were
                // blocking.
                let fence = FenceRef::Captured(capture_id);
                let queue_ids: Vec<HandleId> = self
                    .objects
                    .records()
                    .filter(|r| matches!(r.extra_info, Some(ExtraInfo::CommandQueue(_))))
                    .map(|r| r.capture_id)
                    .collect();
                for queue_id in queue_ids {
                    let mut changed = false;
                    if let Some(queue_info) = self
                        .objects
                        .get_mut(queue_id)
                        .and_then(|r| r.queue_info_mut())
                    {
                        let before = queue_info.pending_events.len();
                        queue_info.pending_events.retain(|entry| entry.fence != fence);
                        changed = queue_info.pending_events.len() != before;
                    }
                    if changed {
                        self.drain_queue(queue_id);
                    }
                }
            }
            Some(ExtraInfo::CommandQueue(info)) => {
                if let Some(sync) = info.sync {
                    self.driver.release(sync.fence);
                }
                // Surviving fences drop this queue from their waiter lists.
                for other in self.objects.records_mut() {
                    if let Some(ExtraInfo::Fence(state)) = &mut other.extra_info {
                        state.waiting_objects.retain(|_, waiters| {
                            waiters.wait_queues.retain(|&queue| queue != capture_id);
                            !(waiters.wait_events.is_empty() && waiters.wait_queues.is_empty())
                        });
                    }
                }
            }
            Some(ExtraInfo::Heap(info)) => {
                // The adopted host memory is returned to the OS here.
                drop(info.external_allocation);
            }
            Some(ExtraInfo::Swapchain(info)) => {
                if release_extra_refs {
                    self.release_swapchain_images(info.images);
                }
                if let Some(window) = self.windows.remove(info.window, info.hwnd_id) {
                    self.window_factory.destroy(window);
                }
            }
            Some(ExtraInfo::Device(_)) | Some(ExtraInfo::DescriptorHeap(_)) | None => {}
        }
    }

    // --- metacommands -----------------------------------------------------

    /// Applies a recorded write to mapped memory, if the target is known.
    pub fn process_fill_memory_command(
        &mut self,
        memory_id: HandleId,
        offset: u64,
        size: u64,
        data: &[u8],
    ) {
        if !self.mapped_memory.contains(memory_id) {
            warn!(
                "skipping memory fill for unrecognized mapped memory object (id = {})",
                memory_id
            );
            return;
        }

        let (Ok(offset), Ok(size)) = (usize::try_from(offset), usize::try_from(size)) else {
            self.fatal_error(&format!(
                "memory fill of {} bytes at offset {} exceeds the platform's addressable size",
                size, offset
            ));
            return;
        };
        let Some(bytes) = data.get(..size) else {
            warn!("memory fill payload is shorter than its recorded size; skipping");
            return;
        };

        self.mapped_memory.apply_fill(memory_id, offset, bytes);
    }

    /// Commits host memory for a later open-heap-from-address call.
    pub fn process_create_heap_allocation_command(&mut self, allocation_id: HandleId, size: u64) {
        let Ok(size) = usize::try_from(size) else {
            self.fatal_error(&format!(
                "external heap allocation {} of {} bytes exceeds the platform's addressable size",
                allocation_id, size
            ));
            return;
        };

        if self.heap_allocations.create(allocation_id, size).is_err() {
            self.fatal_error(&format!(
                "failed to create external heap allocation (id = {}) of size {}",
                allocation_id, size
            ));
        }
    }

    /// Resolves a raw handle argument recorded at one of the known external
    /// call sites.
    pub fn pre_process_external_object(
        &mut self,
        object_id: HandleId,
        call_id: ApiCallId,
        call_name: &str,
    ) -> Option<ExternalObject> {
        match call_id {
            ApiCallId::RegisterBudgetNotification => {
                Some(ExternalObject::Event(self.events.get(object_id, false)))
            }
            ApiCallId::MakeWindowAssociation => self
                .windows
                .native_handle(object_id)
                .map(ExternalObject::Window),
            _ => {
                warn!(
                    "skipping object handle mapping for unsupported external object processed by {}",
                    call_name
                );
                None
            }
        }
    }

    /// Accepts a raw handle returned at one of the known external call
    /// sites; the replay keeps its own handles, so nothing is recorded.
    pub fn post_process_external_object(
        &mut self,
        _replay_result: ApiResult,
        _object_id: HandleId,
        call_id: ApiCallId,
        call_name: &str,
    ) {
        match call_id {
            ApiCallId::GetSurfaceDc
            | ApiCallId::GetWindowAssociation
            | ApiCallId::GetSwapchainWindow => {}
            _ => warn!(
                "skipping object handle mapping for unsupported external object processed by {}",
                call_name
            ),
        }
    }

    // --- shutdown ---------------------------------------------------------

    /// Waits for in-flight GPU work, then tears down every table: objects
    /// (releasing the replay's driver references), windows, cached events,
    /// and orphan heap allocations. Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let _span = trace_span!("shutdown").entered();
        self.wait_idle();
        self.destroy_active_objects();
        self.destroy_active_windows();
        self.events.clear();
        self.heap_allocations.clear();
    }

    fn destroy_active_objects(&mut self) {
        let records: Vec<ObjectRecord> = self.objects.drain().collect();
        for record in records {
            let object = record.object;
            let refs = record.ref_count;
            // Per-slot extra refs are not released here; the records they
            // point at are being destroyed by this same sweep.
            self.destroy_record(record, false);
            for _ in 0..refs {
                self.driver.release(object);
            }
        }
        self.mapped_memory.clear();
        self.gpu_va_map.clear();
    }

    fn destroy_active_windows(&mut self) {
        let factory = &mut self.window_factory;
        self.windows.drain(|window| factory.destroy(window));
    }
}

impl Drop for Replayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
