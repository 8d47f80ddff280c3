//! Shared test harness: a null driver that completes every submission
//! immediately, plus a headless window factory.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;

use raw_window_handle::{RawWindowHandle, Win32Handle};

use reprise::driver::{Driver, ObjectHandle};
use reprise::error::{DriverError, DriverResult};
use reprise::event::HostEvent;
use reprise::types::{
    ApiResult, CommandQueueDesc, DescriptorHeapDesc, DescriptorKind, SwapchainDesc,
};
use reprise::window::{Window, WindowFactory};
use reprise::{ReplayOptions, Replayer};

// --- null driver ----------------------------------------------------------

enum Kind {
    /// Adapters, factories, heaps, command lists, libraries, pipelines.
    Plain,
    Device,
    Queue {
        device: u64,
    },
    Fence {
        completed: u64,
        pending: Vec<(u64, HostEvent)>,
    },
    Resource {
        va: u64,
        backing: Box<[u8]>,
        mapped: u32,
    },
    DescriptorHeap {
        cpu_base: u64,
        gpu_base: u64,
    },
    Swapchain {
        buffers: Vec<Option<u64>>,
    },
}

struct NullObject {
    refs: u32,
    kind: Kind,
}

#[derive(Default)]
struct DriverState {
    next_handle: u64,
    objects: HashMap<u64, NullObject>,
    fail_next: Option<ApiResult>,
    executed_lists: usize,
    validation_enabled: bool,
    fail_validation: bool,
    last_factory_flags: u32,
}

impl DriverState {
    fn alloc(&mut self, kind: Kind) -> ObjectHandle {
        self.next_handle += 1;
        self.objects
            .insert(self.next_handle, NullObject { refs: 1, kind });
        ObjectHandle::from_raw(self.next_handle)
    }

    fn signal_fence(&mut self, fence: ObjectHandle, value: u64) {
        if let Some(NullObject {
            kind: Kind::Fence { completed, pending },
            ..
        }) = self.objects.get_mut(&fence.as_raw())
        {
            *completed = value;
            pending.retain(|(threshold, event)| {
                if *threshold <= value {
                    event.set();
                    false
                } else {
                    true
                }
            });
        }
    }
}

/// Driver that fulfils every call against in-memory state. Queue work
/// completes the moment it is submitted, which is exactly the freedom the
/// core's host-side ordering must not depend on.
#[derive(Clone, Default)]
pub struct NullDriver {
    state: Rc<RefCell<DriverState>>,
}

impl NullDriver {
    pub fn new() -> NullDriver {
        NullDriver::default()
    }

    /// Makes the next fallible driver call fail with `code`.
    pub fn fail_next_call(&self, code: ApiResult) {
        self.state.borrow_mut().fail_next = Some(code);
    }

    pub fn refuse_validation(&self) {
        self.state.borrow_mut().fail_validation = true;
    }

    pub fn validation_enabled(&self) -> bool {
        self.state.borrow().validation_enabled
    }

    pub fn last_factory_flags(&self) -> u32 {
        self.state.borrow().last_factory_flags
    }

    pub fn is_alive(&self, handle: ObjectHandle) -> bool {
        self.state.borrow().objects.contains_key(&handle.as_raw())
    }

    pub fn ref_count(&self, handle: ObjectHandle) -> u32 {
        self.state
            .borrow()
            .objects
            .get(&handle.as_raw())
            .map_or(0, |o| o.refs)
    }

    pub fn live_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    pub fn executed_lists(&self) -> usize {
        self.state.borrow().executed_lists
    }

    pub fn completed_value(&self, fence: ObjectHandle) -> u64 {
        match self.state.borrow().objects.get(&fence.as_raw()) {
            Some(NullObject {
                kind: Kind::Fence { completed, .. },
                ..
            }) => *completed,
            _ => 0,
        }
    }

    /// Raises a fence's completed value without going through the core,
    /// standing in for GPU progress.
    pub fn complete_fence(&self, fence: ObjectHandle, value: u64) {
        self.state.borrow_mut().signal_fence(fence, value);
    }

    // Objects whose creation has no dedicated override are minted directly.

    pub fn make_adapter(&self) -> ObjectHandle {
        self.state.borrow_mut().alloc(Kind::Plain)
    }

    pub fn make_command_list(&self) -> ObjectHandle {
        self.state.borrow_mut().alloc(Kind::Plain)
    }

    pub fn make_resource(&self, va: u64, width: u64) -> ObjectHandle {
        self.state.borrow_mut().alloc(Kind::Resource {
            va,
            backing: vec![0; width as usize].into_boxed_slice(),
            mapped: 0,
        })
    }

    pub fn resource_bytes(&self, resource: ObjectHandle) -> Vec<u8> {
        match self.state.borrow().objects.get(&resource.as_raw()) {
            Some(NullObject {
                kind: Kind::Resource { backing, .. },
                ..
            }) => backing.to_vec(),
            _ => Vec::new(),
        }
    }

    fn checked(&self) -> DriverResult<()> {
        if let Some(code) = self.state.borrow_mut().fail_next.take() {
            return Err(DriverError(code));
        }
        Ok(())
    }
}

impl Driver for NullDriver {
    fn add_ref(&self, object: ObjectHandle) -> u32 {
        let mut state = self.state.borrow_mut();
        match state.objects.get_mut(&object.as_raw()) {
            Some(o) => {
                o.refs += 1;
                o.refs
            }
            None => 0,
        }
    }

    fn release(&self, object: ObjectHandle) -> u32 {
        let mut state = self.state.borrow_mut();
        let refs = match state.objects.get_mut(&object.as_raw()) {
            Some(o) => {
                o.refs -= 1;
                o.refs
            }
            None => return 0,
        };
        if refs == 0 {
            // A dying swapchain drops the references it holds on its buffers.
            if let Some(NullObject {
                kind: Kind::Swapchain { buffers },
                ..
            }) = state.objects.remove(&object.as_raw())
            {
                for buffer in buffers.into_iter().flatten() {
                    if let Some(o) = state.objects.get_mut(&buffer) {
                        o.refs -= 1;
                        if o.refs == 0 {
                            state.objects.remove(&buffer);
                        }
                    }
                }
            }
        }
        refs
    }

    fn enable_validation(&self) -> DriverResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_validation {
            return Err(DriverError(ApiResult::FAIL));
        }
        state.validation_enabled = true;
        Ok(())
    }

    fn create_factory(&self, flags: u32) -> DriverResult<ObjectHandle> {
        self.checked()?;
        let mut state = self.state.borrow_mut();
        state.last_factory_flags = flags;
        Ok(state.alloc(Kind::Plain))
    }

    fn create_device(
        &self,
        _adapter: ObjectHandle,
        _minimum_feature_level: u32,
    ) -> DriverResult<ObjectHandle> {
        self.checked()?;
        Ok(self.state.borrow_mut().alloc(Kind::Device))
    }

    fn create_command_queue(
        &self,
        device: ObjectHandle,
        _desc: &CommandQueueDesc,
    ) -> DriverResult<ObjectHandle> {
        self.checked()?;
        Ok(self.state.borrow_mut().alloc(Kind::Queue {
            device: device.as_raw(),
        }))
    }

    fn create_fence(&self, _device: ObjectHandle, initial_value: u64) -> DriverResult<ObjectHandle> {
        self.checked()?;
        Ok(self.state.borrow_mut().alloc(Kind::Fence {
            completed: initial_value,
            pending: Vec::new(),
        }))
    }

    fn create_descriptor_heap(
        &self,
        _device: ObjectHandle,
        _desc: &DescriptorHeapDesc,
    ) -> DriverResult<ObjectHandle> {
        self.checked()?;
        let mut state = self.state.borrow_mut();
        let base = (state.next_handle + 1) << 20;
        Ok(state.alloc(Kind::DescriptorHeap {
            cpu_base: base,
            gpu_base: base | 1 << 40,
        }))
    }

    fn descriptor_increment(&self, _device: ObjectHandle, kind: DescriptorKind) -> u32 {
        match kind {
            DescriptorKind::Resource => 32,
            DescriptorKind::Sampler => 16,
            DescriptorKind::RenderTarget => 8,
            DescriptorKind::DepthStencil => 8,
        }
    }

    fn open_heap_from_address(
        &self,
        _device: ObjectHandle,
        _address: NonNull<u8>,
        _size: usize,
    ) -> DriverResult<ObjectHandle> {
        self.checked()?;
        Ok(self.state.borrow_mut().alloc(Kind::Plain))
    }

    fn create_pipeline_library(
        &self,
        _device: ObjectHandle,
        _blob: &[u8],
    ) -> DriverResult<ObjectHandle> {
        self.checked()?;
        Ok(self.state.borrow_mut().alloc(Kind::Plain))
    }

    fn enqueue_make_resident(
        &self,
        _device: ObjectHandle,
        _objects: &[ObjectHandle],
        fence: ObjectHandle,
        value: u64,
    ) -> DriverResult<()> {
        self.checked()?;
        if !fence.is_null() {
            self.state.borrow_mut().signal_fence(fence, value);
        }
        Ok(())
    }

    fn check_feature_support(
        &self,
        _device: ObjectHandle,
        _feature: u32,
        data: &mut [u8],
    ) -> DriverResult<()> {
        self.checked()?;
        data.fill(1);
        Ok(())
    }

    fn queue_device(&self, queue: ObjectHandle) -> DriverResult<ObjectHandle> {
        match self.state.borrow().objects.get(&queue.as_raw()) {
            Some(NullObject {
                kind: Kind::Queue { device },
                ..
            }) => Ok(ObjectHandle::from_raw(*device)),
            _ => Err(DriverError(ApiResult::FAIL)),
        }
    }

    fn execute_command_lists(&self, _queue: ObjectHandle, lists: &[ObjectHandle]) {
        self.state.borrow_mut().executed_lists += lists.len();
    }

    fn queue_signal(
        &self,
        _queue: ObjectHandle,
        fence: ObjectHandle,
        value: u64,
    ) -> DriverResult<()> {
        self.checked()?;
        // Submitted work completes instantly on the null device.
        self.state.borrow_mut().signal_fence(fence, value);
        Ok(())
    }

    fn queue_wait(
        &self,
        _queue: ObjectHandle,
        _fence: ObjectHandle,
        _value: u64,
    ) -> DriverResult<()> {
        self.checked()
    }

    fn fence_completed_value(&self, fence: ObjectHandle) -> u64 {
        self.completed_value(fence)
    }

    fn fence_signal(&self, fence: ObjectHandle, value: u64) -> DriverResult<()> {
        self.checked()?;
        self.state.borrow_mut().signal_fence(fence, value);
        Ok(())
    }

    fn fence_set_event_on_completion(
        &self,
        fence: ObjectHandle,
        value: u64,
        event: &HostEvent,
    ) -> DriverResult<()> {
        self.checked()?;
        let mut state = self.state.borrow_mut();
        match state.objects.get_mut(&fence.as_raw()) {
            Some(NullObject {
                kind: Kind::Fence { completed, pending },
                ..
            }) => {
                if *completed >= value {
                    event.set();
                } else {
                    pending.push((value, event.clone()));
                }
                Ok(())
            }
            _ => Err(DriverError(ApiResult::FAIL)),
        }
    }

    fn map(&self, resource: ObjectHandle, _subresource: u32) -> DriverResult<NonNull<u8>> {
        self.checked()?;
        let mut state = self.state.borrow_mut();
        match state.objects.get_mut(&resource.as_raw()) {
            Some(NullObject {
                kind: Kind::Resource { backing, mapped, .. },
                ..
            }) => {
                *mapped += 1;
                Ok(NonNull::new(backing.as_mut_ptr()).unwrap())
            }
            _ => Err(DriverError(ApiResult::FAIL)),
        }
    }

    fn unmap(&self, resource: ObjectHandle, _subresource: u32) {
        if let Some(NullObject {
            kind: Kind::Resource { mapped, .. },
            ..
        }) = self.state.borrow_mut().objects.get_mut(&resource.as_raw())
        {
            *mapped = mapped.saturating_sub(1);
        }
    }

    fn gpu_virtual_address(&self, resource: ObjectHandle) -> u64 {
        match self.state.borrow().objects.get(&resource.as_raw()) {
            Some(NullObject {
                kind: Kind::Resource { va, .. },
                ..
            }) => *va,
            _ => 0,
        }
    }

    fn resource_width(&self, resource: ObjectHandle) -> u64 {
        match self.state.borrow().objects.get(&resource.as_raw()) {
            Some(NullObject {
                kind: Kind::Resource { backing, .. },
                ..
            }) => backing.len() as u64,
            _ => 0,
        }
    }

    fn cpu_descriptor_base(&self, heap: ObjectHandle) -> u64 {
        match self.state.borrow().objects.get(&heap.as_raw()) {
            Some(NullObject {
                kind: Kind::DescriptorHeap { cpu_base, .. },
                ..
            }) => *cpu_base,
            _ => 0,
        }
    }

    fn gpu_descriptor_base(&self, heap: ObjectHandle) -> u64 {
        match self.state.borrow().objects.get(&heap.as_raw()) {
            Some(NullObject {
                kind: Kind::DescriptorHeap { gpu_base, .. },
                ..
            }) => *gpu_base,
            _ => 0,
        }
    }

    fn create_swapchain(
        &self,
        _factory: ObjectHandle,
        _device: ObjectHandle,
        _window: RawWindowHandle,
        desc: &SwapchainDesc,
    ) -> DriverResult<ObjectHandle> {
        self.checked()?;
        Ok(self.state.borrow_mut().alloc(Kind::Swapchain {
            buffers: vec![None; desc.buffer_count as usize],
        }))
    }

    fn swapchain_buffer(&self, swapchain: ObjectHandle, index: u32) -> DriverResult<ObjectHandle> {
        self.checked()?;
        let mut state = self.state.borrow_mut();
        let existing = match state.objects.get(&swapchain.as_raw()) {
            Some(NullObject {
                kind: Kind::Swapchain { buffers },
                ..
            }) => match buffers.get(index as usize) {
                Some(slot) => *slot,
                None => return Err(DriverError(ApiResult::INVALID_ARG)),
            },
            _ => return Err(DriverError(ApiResult::FAIL)),
        };

        match existing {
            Some(buffer) => {
                // Another reference to the same buffer object.
                if let Some(o) = state.objects.get_mut(&buffer) {
                    o.refs += 1;
                }
                Ok(ObjectHandle::from_raw(buffer))
            }
            None => {
                // One reference for the caller, one held by the swapchain,
                // the way presentation engines keep their buffers alive.
                let buffer = state.alloc(Kind::Plain);
                if let Some(o) = state.objects.get_mut(&buffer.as_raw()) {
                    o.refs += 1;
                }
                if let Some(NullObject {
                    kind: Kind::Swapchain { buffers },
                    ..
                }) = state.objects.get_mut(&swapchain.as_raw())
                {
                    buffers[index as usize] = Some(buffer.as_raw());
                }
                Ok(buffer)
            }
        }
    }

    fn resize_buffers(
        &self,
        swapchain: ObjectHandle,
        buffer_count: u32,
        _width: u32,
        _height: u32,
        _format: u32,
        _flags: u32,
        _present_queues: &[ObjectHandle],
    ) -> DriverResult<()> {
        self.checked()?;
        let mut state = self.state.borrow_mut();
        let old = match state.objects.get_mut(&swapchain.as_raw()) {
            Some(NullObject {
                kind: Kind::Swapchain { buffers },
                ..
            }) => std::mem::replace(buffers, vec![None; buffer_count as usize]),
            _ => return Err(DriverError(ApiResult::FAIL)),
        };
        for buffer in old.into_iter().flatten() {
            if let Some(o) = state.objects.get_mut(&buffer) {
                o.refs -= 1;
                if o.refs == 0 {
                    state.objects.remove(&buffer);
                }
            }
        }
        Ok(())
    }

    fn load_graphics_pipeline(
        &self,
        _library: ObjectHandle,
        _name: &str,
        _desc: &[u8],
    ) -> DriverResult<ObjectHandle> {
        self.checked()?;
        Ok(self.state.borrow_mut().alloc(Kind::Plain))
    }

    fn load_compute_pipeline(
        &self,
        _library: ObjectHandle,
        _name: &str,
        _desc: &[u8],
    ) -> DriverResult<ObjectHandle> {
        self.checked()?;
        Ok(self.state.borrow_mut().alloc(Kind::Plain))
    }

    fn load_pipeline(
        &self,
        _library: ObjectHandle,
        _name: &str,
        _desc: &[u8],
    ) -> DriverResult<ObjectHandle> {
        self.checked()?;
        Ok(self.state.borrow_mut().alloc(Kind::Plain))
    }
}

// --- headless windows -----------------------------------------------------

#[derive(Default)]
struct FactoryState {
    created: usize,
    destroyed: usize,
    next_hwnd: usize,
    last_size: Option<(u32, u32)>,
}

#[derive(Clone, Default)]
pub struct HeadlessWindowFactory {
    state: Rc<RefCell<FactoryState>>,
}

struct HeadlessWindow {
    hwnd: usize,
    state: Rc<RefCell<FactoryState>>,
}

impl Window for HeadlessWindow {
    fn raw_window_handle(&self) -> RawWindowHandle {
        let mut handle = Win32Handle::empty();
        handle.hwnd = self.hwnd as *mut _;
        RawWindowHandle::Win32(handle)
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.state.borrow_mut().last_size = Some((width, height));
    }
}

impl HeadlessWindowFactory {
    pub fn new() -> HeadlessWindowFactory {
        HeadlessWindowFactory::default()
    }

    pub fn created(&self) -> usize {
        self.state.borrow().created
    }

    pub fn destroyed(&self) -> usize {
        self.state.borrow().destroyed
    }

    pub fn last_size(&self) -> Option<(u32, u32)> {
        self.state.borrow().last_size
    }
}

impl WindowFactory for HeadlessWindowFactory {
    fn create(&mut self, _x: i32, _y: i32, width: u32, height: u32) -> Option<Box<dyn Window>> {
        let mut state = self.state.borrow_mut();
        state.created += 1;
        state.next_hwnd += 1;
        state.last_size = Some((width, height));
        Some(Box::new(HeadlessWindow {
            hwnd: state.next_hwnd,
            state: self.state.clone(),
        }))
    }

    fn destroy(&mut self, window: Box<dyn Window>) {
        self.state.borrow_mut().destroyed += 1;
        drop(window);
    }
}

// --- fixture --------------------------------------------------------------

pub fn test_options() -> ReplayOptions {
    ReplayOptions {
        wait_timeout: Duration::from_millis(50),
        ..ReplayOptions::default()
    }
}

pub fn replayer_with(options: ReplayOptions) -> (Replayer, NullDriver, HeadlessWindowFactory) {
    let driver = NullDriver::new();
    let factory = HeadlessWindowFactory::new();
    let replayer = Replayer::new(Box::new(driver.clone()), Box::new(factory.clone()), options);
    (replayer, driver, factory)
}

pub fn replayer() -> (Replayer, NullDriver, HeadlessWindowFactory) {
    replayer_with(test_options())
}
