//! Windowing capability.
//!
//! Swap-chain creation needs a live native window, but the core does not
//! own a windowing system; the host injects a [`WindowFactory`] and the
//! core tracks what it creates. Recorded window-handle ids are mapped to
//! the replacement windows' native handles so that calls taking raw window
//! handles can be replayed against the new windows.

use std::collections::HashMap;

use raw_window_handle::RawWindowHandle;
use slotmap::SlotMap;

use crate::types::HandleId;

slotmap::new_key_type! {
    /// Identifies a live replay window.
    pub struct WindowId;
}

/// A window created for replay.
pub trait Window {
    /// The native handle substituted into swap-chain creation calls.
    fn raw_window_handle(&self) -> RawWindowHandle;

    fn set_size(&mut self, width: u32, height: u32);
}

/// Creates and destroys the windows swap chains are presented to.
pub trait WindowFactory {
    fn create(&mut self, x: i32, y: i32, width: u32, height: u32) -> Option<Box<dyn Window>>;

    fn destroy(&mut self, window: Box<dyn Window>);
}

/// Live windows plus the recorded-handle → native-handle map.
#[derive(Default)]
pub struct WindowTable {
    windows: SlotMap<WindowId, Box<dyn Window>>,
    handles: HashMap<HandleId, RawWindowHandle>,
}

impl WindowTable {
    /// Adopts a freshly created window; if the creating call recorded a
    /// window-handle id, the native handle becomes reachable through it.
    pub fn insert(&mut self, window: Box<dyn Window>, hwnd_id: Option<HandleId>) -> WindowId {
        if let Some(id) = hwnd_id {
            self.handles.insert(id, window.raw_window_handle());
        }
        self.windows.insert(window)
    }

    /// Detaches the window for destruction through the factory and drops
    /// its recorded-handle entry.
    pub fn remove(&mut self, id: WindowId, hwnd_id: Option<HandleId>) -> Option<Box<dyn Window>> {
        if let Some(hwnd_id) = hwnd_id {
            self.handles.remove(&hwnd_id);
        }
        self.windows.remove(id)
    }

    pub fn set_size(&mut self, id: WindowId, width: u32, height: u32) {
        if let Some(window) = self.windows.get_mut(id) {
            window.set_size(width, height);
        }
    }

    /// Native handle for a recorded window-handle id.
    pub fn native_handle(&self, hwnd_id: HandleId) -> Option<RawWindowHandle> {
        self.handles.get(&hwnd_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Hands every remaining window to `destroy` and clears the handle map.
    pub fn drain(&mut self, mut destroy: impl FnMut(Box<dyn Window>)) {
        for (_, window) in self.windows.drain() {
            destroy(window);
        }
        self.handles.clear();
    }
}
