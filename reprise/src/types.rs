//! Capture-side vocabulary shared by the decoder and the replay core.

use std::fmt;

/// Identifier assigned by the capture layer to every object, event, memory
/// region, heap allocation and window handle recorded in a trace.
///
/// Ids are opaque and globally unique within a trace. The all-ones value is
/// reserved for the replay core's internal event (see [`HandleId::INTERNAL`]).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct HandleId(pub u64);

impl HandleId {
    /// Reserved id naming the single event the core allocates for synthetic
    /// waits that have no capture-time equivalent.
    pub const INTERNAL: HandleId = HandleId(u64::MAX);

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if *self == HandleId::INTERNAL {
            write!(f, "HandleId(internal)")
        } else {
            write!(f, "HandleId({})", self.0)
        }
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Status code returned by the captured API's entry points.
///
/// Negative values are failures, everything else is success, following the
/// HRESULT convention of the recorded API. The constants below are the codes
/// the core gives special meaning to; traces may carry others.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct ApiResult(pub i32);

impl ApiResult {
    pub const OK: ApiResult = ApiResult(0);
    pub const FAIL: ApiResult = ApiResult(0x8000_4005_u32 as i32);
    pub const INVALID_ARG: ApiResult = ApiResult(0x8007_0057_u32 as i32);
    pub const OUT_OF_MEMORY: ApiResult = ApiResult(0x8007_000E_u32 as i32);
    /// The device was lost. Replay cannot continue past this.
    pub const DEVICE_REMOVED: ApiResult = ApiResult(0x887A_0005_u32 as i32);
    /// Cached pipeline library does not match the current driver; the
    /// application is expected to rebuild it.
    pub const DRIVER_VERSION_MISMATCH: ApiResult = ApiResult(0x887E_0003_u32 as i32);

    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    fn name(self) -> Option<&'static str> {
        match self {
            ApiResult::OK => Some("ok"),
            ApiResult::FAIL => Some("fail"),
            ApiResult::INVALID_ARG => Some("invalid argument"),
            ApiResult::OUT_OF_MEMORY => Some("out of memory"),
            ApiResult::DEVICE_REMOVED => Some("device removed"),
            ApiResult::DRIVER_VERSION_MISMATCH => Some("driver version mismatch"),
            _ => None,
        }
    }
}

impl fmt::Display for ApiResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#010x})", name, self.0 as u32),
            None => write!(f, "{:#010x}", self.0 as u32),
        }
    }
}

impl fmt::Debug for ApiResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The kinds of descriptor a descriptor heap can hold.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorKind {
    /// Constant-buffer / shader-resource / unordered-access views.
    Resource,
    Sampler,
    RenderTarget,
    DepthStencil,
}

impl DescriptorKind {
    pub const COUNT: usize = 4;

    pub const fn index(self) -> usize {
        match self {
            DescriptorKind::Resource => 0,
            DescriptorKind::Sampler => 1,
            DescriptorKind::RenderTarget => 2,
            DescriptorKind::DepthStencil => 3,
        }
    }
}

/// Submission engine a command queue is bound to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum QueueKind {
    Direct,
    Compute,
    Copy,
}

#[derive(Copy, Clone, Debug)]
pub struct CommandQueueDesc {
    pub kind: QueueKind,
    pub priority: i32,
}

#[derive(Copy, Clone, Debug)]
pub struct DescriptorHeapDesc {
    pub kind: DescriptorKind,
    /// Number of descriptors the heap holds.
    pub capacity: u32,
    pub shader_visible: bool,
}

/// Decoded swap-chain creation parameters.
///
/// `output_window` carries the capture-time window-handle id recorded with
/// the call; creation paths that never had a native window (composition,
/// core-window) record none.
#[derive(Copy, Clone, Debug)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    /// Raw pixel format code, passed through to the driver untranslated.
    pub format: u32,
    pub buffer_count: u32,
    pub output_window: Option<HandleId>,
}

/// Recorded call sites at which the trace refers to an external (non-API)
/// object such as a host event or a native window handle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ApiCallId {
    /// Registration of a host event for video-memory budget notifications.
    RegisterBudgetNotification,
    /// Association of a native window with a factory.
    MakeWindowAssociation,
    GetWindowAssociation,
    /// Query of a swap chain's native window handle.
    GetSwapchainWindow,
    /// Query of a surface's device context.
    GetSurfaceDc,
    /// Any call site the core has no mapping for.
    Other(u32),
}
