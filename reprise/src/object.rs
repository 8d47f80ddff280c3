//! The object info table: capture id → live object plus auxiliary state.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::driver::ObjectHandle;
use crate::event::HostEvent;
use crate::heap::HeapAllocation;
use crate::types::{DescriptorKind, HandleId};
use crate::window::WindowId;

/// One entry per live driver object.
///
/// `ref_count` counts the replay tool's own references (mirroring the
/// references the application held at capture); `extra_ref` counts
/// keep-alive references the core takes on its own behalf, such as
/// swap-chain back-buffer retention. The record is destroyed exactly when
/// both reach zero.
pub struct ObjectRecord {
    pub capture_id: HandleId,
    pub object: ObjectHandle,
    pub ref_count: u32,
    pub extra_ref: u32,
    pub extra_info: Option<ExtraInfo>,
}

/// Per-kind auxiliary state attached to an object record.
pub enum ExtraInfo {
    Device(DeviceInfo),
    CommandQueue(QueueInfo),
    DescriptorHeap(DescriptorHeapInfo),
    Fence(FenceInfo),
    Resource(ResourceInfo),
    Heap(HeapInfo),
    Swapchain(SwapchainInfo),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExtraInfoKind {
    Device,
    CommandQueue,
    DescriptorHeap,
    Fence,
    Resource,
    Heap,
    Swapchain,
}

impl ExtraInfo {
    pub fn kind(&self) -> ExtraInfoKind {
        match self {
            ExtraInfo::Device(_) => ExtraInfoKind::Device,
            ExtraInfo::CommandQueue(_) => ExtraInfoKind::CommandQueue,
            ExtraInfo::DescriptorHeap(_) => ExtraInfoKind::DescriptorHeap,
            ExtraInfo::Fence(_) => ExtraInfoKind::Fence,
            ExtraInfo::Resource(_) => ExtraInfoKind::Resource,
            ExtraInfo::Heap(_) => ExtraInfoKind::Heap,
            ExtraInfo::Swapchain(_) => ExtraInfoKind::Swapchain,
        }
    }
}

/// Descriptor increments observed on a device, indexed by
/// [`DescriptorKind::index`]. Zero means not yet observed.
#[derive(Default)]
pub struct DeviceInfo {
    pub capture_increments: [u32; DescriptorKind::COUNT],
    pub replay_increments: [u32; DescriptorKind::COUNT],
}

/// A queue's host-side view of its submission stream.
#[derive(Default)]
pub struct QueueInfo {
    /// Present only when queue-submission synchronization is active.
    pub sync: Option<QueueSync>,
    /// Wait and signal operations not yet resolved, in submission order.
    pub pending_events: VecDeque<QueueSyncEvent>,
}

/// Internal fence/event pair backing the queue-submission sync option.
/// The fence is a driver object without a capture id; it never enters the
/// object table and is addressed as [`FenceRef::QueueSync`].
pub struct QueueSync {
    pub fence: ObjectHandle,
    pub event: HostEvent,
    pub value: u64,
    pub fence_info: FenceInfo,
}

/// One deferred wait or signal in a queue's pending FIFO.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueSyncEvent {
    pub is_wait: bool,
    pub is_signaled: bool,
    pub fence: FenceRef,
    pub value: u64,
}

/// Weak reference to fence state, resolved through the object table (or the
/// owning queue record) on use. Neither direction implies ownership.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FenceRef {
    /// A fence the trace created, by capture id.
    Captured(HandleId),
    /// The internal sync fence of the queue with this capture id.
    QueueSync(HandleId),
}

#[derive(Default)]
pub struct FenceInfo {
    pub last_signaled_value: u64,
    /// Waiters keyed by threshold value, iterated in ascending order.
    /// Invariant: every key is greater than `last_signaled_value`.
    pub waiting_objects: BTreeMap<u64, FenceWaiters>,
}

#[derive(Default)]
pub struct FenceWaiters {
    pub wait_events: Vec<HostEvent>,
    pub wait_queues: Vec<HandleId>,
}

#[derive(Default)]
pub struct ResourceInfo {
    /// GPU VA pair, zero until the first address observation.
    pub capture_address: u64,
    pub replay_address: u64,
    /// Map state per subresource; an entry exists iff the count is nonzero.
    pub mapped_memory: HashMap<u32, MappedSubresource>,
}

pub struct MappedSubresource {
    pub memory_id: HandleId,
    /// Nesting depth of outstanding map calls.
    pub count: u32,
}

pub struct DescriptorHeapInfo {
    pub kind: DescriptorKind,
    /// Owning device, for increment lookup during handle translation.
    pub device: HandleId,
    pub capacity: u32,
    pub capture_cpu_base: Option<u64>,
    pub replay_cpu_base: Option<u64>,
    pub capture_gpu_base: Option<u64>,
    pub replay_gpu_base: Option<u64>,
}

#[derive(Default)]
pub struct HeapInfo {
    /// Host memory adopted by the heap; released when the record dies.
    pub external_allocation: Option<HeapAllocation>,
}

pub struct SwapchainInfo {
    pub window: WindowId,
    /// Recorded window-handle id, if the creating call had one.
    pub hwnd_id: Option<HandleId>,
    pub image_count: u32,
    /// Back-buffer records by slot; a filled slot holds one `extra_ref` on
    /// the buffer's record.
    pub images: Vec<Option<HandleId>>,
}

macro_rules! info_accessors {
    ($ref_fn:ident, $mut_fn:ident, $variant:ident, $ty:ty) => {
        pub fn $ref_fn(&self) -> Option<&$ty> {
            match &self.extra_info {
                Some(ExtraInfo::$variant(info)) => Some(info),
                Some(other) => {
                    debug_assert!(
                        false,
                        "object {} carries {:?} info, expected {:?}",
                        self.capture_id,
                        other.kind(),
                        ExtraInfoKind::$variant,
                    );
                    None
                }
                None => None,
            }
        }

        pub fn $mut_fn(&mut self) -> Option<&mut $ty> {
            match &mut self.extra_info {
                Some(ExtraInfo::$variant(info)) => Some(info),
                Some(other) => {
                    debug_assert!(
                        false,
                        "object {} carries {:?} info, expected {:?}",
                        self.capture_id,
                        other.kind(),
                        ExtraInfoKind::$variant,
                    );
                    None
                }
                None => None,
            }
        }
    };
}

impl ObjectRecord {
    info_accessors!(device_info, device_info_mut, Device, DeviceInfo);
    info_accessors!(queue_info, queue_info_mut, CommandQueue, QueueInfo);
    info_accessors!(
        descriptor_heap_info,
        descriptor_heap_info_mut,
        DescriptorHeap,
        DescriptorHeapInfo
    );
    info_accessors!(fence_info, fence_info_mut, Fence, FenceInfo);
    info_accessors!(resource_info, resource_info_mut, Resource, ResourceInfo);
    info_accessors!(heap_info, heap_info_mut, Heap, HeapInfo);
    info_accessors!(swapchain_info, swapchain_info_mut, Swapchain, SwapchainInfo);

    /// Resource info, created on first use; capture never tags resources at
    /// creation, only when an address or mapping is first observed. `None`
    /// when the record already carries info of another kind.
    pub fn resource_info_or_default(&mut self) -> Option<&mut ResourceInfo> {
        if self.extra_info.is_none() {
            self.extra_info = Some(ExtraInfo::Resource(ResourceInfo::default()));
        }
        self.resource_info_mut()
    }
}

/// Registry of every live object, keyed by capture id.
#[derive(Default)]
pub struct ObjectTable {
    records: HashMap<HandleId, ObjectRecord>,
}

impl ObjectTable {
    /// Registers a new object with a single replay-owned reference. If the
    /// id is already live the existing record gains a reference instead:
    /// the call returned another reference to the same object.
    pub fn insert(&mut self, capture_id: HandleId, object: ObjectHandle) -> &mut ObjectRecord {
        self.records
            .entry(capture_id)
            .and_modify(|record| record.ref_count += 1)
            .or_insert(ObjectRecord {
                capture_id,
                object,
                ref_count: 1,
                extra_ref: 0,
                extra_info: None,
            })
    }

    pub fn get(&self, capture_id: HandleId) -> Option<&ObjectRecord> {
        self.records.get(&capture_id)
    }

    pub fn get_mut(&mut self, capture_id: HandleId) -> Option<&mut ObjectRecord> {
        self.records.get_mut(&capture_id)
    }

    /// The live driver object for `capture_id`, if any.
    pub fn object(&self, capture_id: HandleId) -> Option<ObjectHandle> {
        self.records.get(&capture_id).map(|r| r.object)
    }

    pub fn remove(&mut self, capture_id: HandleId) -> Option<ObjectRecord> {
        self.records.remove(&capture_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = HandleId> + '_ {
        self.records.keys().copied()
    }

    pub fn records(&self) -> impl Iterator<Item = &ObjectRecord> + '_ {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut ObjectRecord> + '_ {
        self.records.values_mut()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = ObjectRecord> + '_ {
        self.records.drain().map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
