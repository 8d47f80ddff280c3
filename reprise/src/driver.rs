//! The live graphics API the core replays against.
//!
//! The replay core never links a driver directly; the host hands it a
//! [`Driver`] implementation at construction. Driver objects are opaque
//! [`ObjectHandle`] values minted by the implementation; the core treats
//! them the way it treats the capture's own object pointers: it stores
//! them, passes them back, and balances every reference it takes.

use std::fmt;
use std::ptr::NonNull;

use raw_window_handle::RawWindowHandle;

use crate::error::DriverResult;
use crate::event::HostEvent;
use crate::types::{CommandQueueDesc, DescriptorHeapDesc, DescriptorKind, SwapchainDesc};

/// Opaque handle to a live driver object.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
#[repr(transparent)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub const NULL: ObjectHandle = ObjectHandle(0);

    pub const fn from_raw(raw: u64) -> ObjectHandle {
        ObjectHandle(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectHandle({:#x})", self.0)
    }
}

/// Factory-creation flag requesting driver-side validation, ORed into the
/// recorded flags when the validation option is active.
pub const FACTORY_FLAG_VALIDATION: u32 = 0x1;

/// Entry points of the replayed API.
///
/// One method per call the dispatcher reissues, grouped by the interface
/// that receives it. All methods take `&self`: a conforming implementation
/// is internally synchronized or, like the core itself, single-threaded.
///
/// Reference-management contract: every handle returned by a `create_*`,
/// `open_*`, `load_*` or `swapchain_buffer` call carries one reference owned
/// by the caller. `queue_device` returns a borrowed handle and transfers
/// nothing.
pub trait Driver {
    // --- reference management ---------------------------------------------

    /// Takes an additional reference on `object`; returns the driver's count.
    fn add_ref(&self, object: ObjectHandle) -> u32;

    /// Drops one reference on `object`; returns the driver's count.
    fn release(&self, object: ObjectHandle) -> u32;

    // --- instance ---------------------------------------------------------

    /// Enables the driver-side validation layer for objects created later.
    fn enable_validation(&self) -> DriverResult<()>;

    fn create_factory(&self, flags: u32) -> DriverResult<ObjectHandle>;

    /// `adapter` may be null to let the driver pick a default.
    fn create_device(
        &self,
        adapter: ObjectHandle,
        minimum_feature_level: u32,
    ) -> DriverResult<ObjectHandle>;

    // --- device -----------------------------------------------------------

    fn create_command_queue(
        &self,
        device: ObjectHandle,
        desc: &CommandQueueDesc,
    ) -> DriverResult<ObjectHandle>;

    fn create_fence(&self, device: ObjectHandle, initial_value: u64) -> DriverResult<ObjectHandle>;

    fn create_descriptor_heap(
        &self,
        device: ObjectHandle,
        desc: &DescriptorHeapDesc,
    ) -> DriverResult<ObjectHandle>;

    /// Size in bytes between adjacent descriptors of `kind` on this device.
    fn descriptor_increment(&self, device: ObjectHandle, kind: DescriptorKind) -> u32;

    /// Adopts `size` bytes of caller-owned host memory at `address` as a
    /// driver heap. The memory must stay valid until the heap is released.
    fn open_heap_from_address(
        &self,
        device: ObjectHandle,
        address: NonNull<u8>,
        size: usize,
    ) -> DriverResult<ObjectHandle>;

    fn create_pipeline_library(
        &self,
        device: ObjectHandle,
        blob: &[u8],
    ) -> DriverResult<ObjectHandle>;

    /// Queues a residency request; `fence` is signaled with `value` when the
    /// objects are resident.
    fn enqueue_make_resident(
        &self,
        device: ObjectHandle,
        objects: &[ObjectHandle],
        fence: ObjectHandle,
        value: u64,
    ) -> DriverResult<()>;

    /// Queries feature support into `data`, which the dispatcher sizes from
    /// the recorded call.
    fn check_feature_support(
        &self,
        device: ObjectHandle,
        feature: u32,
        data: &mut [u8],
    ) -> DriverResult<()>;

    /// Parent device of `queue`, borrowed: no reference is transferred.
    fn queue_device(&self, queue: ObjectHandle) -> DriverResult<ObjectHandle>;

    // --- command queue ----------------------------------------------------

    fn execute_command_lists(&self, queue: ObjectHandle, lists: &[ObjectHandle]);

    /// Signals `fence` with `value` once prior work on `queue` completes.
    fn queue_signal(&self, queue: ObjectHandle, fence: ObjectHandle, value: u64)
        -> DriverResult<()>;

    /// Stalls later work on `queue` until `fence` reaches `value`. The
    /// driver accepts this before any matching signal exists.
    fn queue_wait(&self, queue: ObjectHandle, fence: ObjectHandle, value: u64) -> DriverResult<()>;

    // --- fence ------------------------------------------------------------

    fn fence_completed_value(&self, fence: ObjectHandle) -> u64;

    /// Sets the fence's completed value from the host.
    fn fence_signal(&self, fence: ObjectHandle, value: u64) -> DriverResult<()>;

    /// Sets `event` once the fence's completed value reaches `value`; fires
    /// immediately if it already has.
    fn fence_set_event_on_completion(
        &self,
        fence: ObjectHandle,
        value: u64,
        event: &HostEvent,
    ) -> DriverResult<()>;

    // --- resource ---------------------------------------------------------

    /// Maps `subresource` and returns the host pointer. Nested maps return
    /// the same pointer until balanced by [`Driver::unmap`].
    fn map(&self, resource: ObjectHandle, subresource: u32) -> DriverResult<NonNull<u8>>;

    fn unmap(&self, resource: ObjectHandle, subresource: u32);

    fn gpu_virtual_address(&self, resource: ObjectHandle) -> u64;

    /// Width in bytes of the resource, bounding its GPU VA range.
    fn resource_width(&self, resource: ObjectHandle) -> u64;

    // --- descriptor heap --------------------------------------------------

    fn cpu_descriptor_base(&self, heap: ObjectHandle) -> u64;

    fn gpu_descriptor_base(&self, heap: ObjectHandle) -> u64;

    // --- swap chain -------------------------------------------------------

    /// `device` is the presentation queue on APIs that present from a queue.
    fn create_swapchain(
        &self,
        factory: ObjectHandle,
        device: ObjectHandle,
        window: RawWindowHandle,
        desc: &SwapchainDesc,
    ) -> DriverResult<ObjectHandle>;

    fn swapchain_buffer(&self, swapchain: ObjectHandle, index: u32) -> DriverResult<ObjectHandle>;

    /// `present_queues` is empty except for the multi-node resize variant.
    fn resize_buffers(
        &self,
        swapchain: ObjectHandle,
        buffer_count: u32,
        width: u32,
        height: u32,
        format: u32,
        flags: u32,
        present_queues: &[ObjectHandle],
    ) -> DriverResult<()>;

    // --- pipeline library -------------------------------------------------

    fn load_graphics_pipeline(
        &self,
        library: ObjectHandle,
        name: &str,
        desc: &[u8],
    ) -> DriverResult<ObjectHandle>;

    fn load_compute_pipeline(
        &self,
        library: ObjectHandle,
        name: &str,
        desc: &[u8],
    ) -> DriverResult<ObjectHandle>;

    fn load_pipeline(&self, library: ObjectHandle, name: &str, desc: &[u8])
        -> DriverResult<ObjectHandle>;
}
