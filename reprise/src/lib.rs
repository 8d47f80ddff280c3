//! Replay core for captured GPU command API traces.
//!
//! A capture tool records every call an application makes against a
//! low-level GPU command API; this crate reconsumes such a trace, reissuing
//! each call against a live driver so the recorded workload runs again. The
//! trace decoder, the driver, and the windowing system all live outside the
//! crate: the decoder drives [`Replayer`]'s per-call overrides in trace
//! order, and the driver and windowing system are injected as the
//! [`Driver`] and [`WindowFactory`] capabilities.
//!
//! What the crate owns is the replay-side state machine: the object table
//! mapping capture ids to live objects, GPU virtual-address and descriptor
//! handle translation, mapped-memory and external-heap bookkeeping, window
//! tracking, and the fence/queue synchronizer that reproduces host-visible
//! completion order, including waits enqueued before their signal exists.

pub mod driver;
pub mod error;
pub mod event;
pub mod gpu_va;
pub mod heap;
pub mod mapped_memory;
pub mod object;
mod replay;
pub mod types;
pub mod window;

pub use crate::driver::{Driver, ObjectHandle};
pub use crate::error::{DriverError, DriverResult};
pub use crate::event::HostEvent;
pub use crate::replay::{ExternalObject, FatalErrorHandler, ReplayOptions, Replayer};
pub use crate::types::{ApiCallId, ApiResult, HandleId};
pub use crate::window::{Window, WindowFactory};
