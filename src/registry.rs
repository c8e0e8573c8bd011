//! A fixed table associating X11 window ids with live bridge
//! contexts.
//!
//! Selection events identify a context only by window id, so the
//! event dispatch needs a way back to the owning bridge. The table is
//! mutated exclusively while the owning event loop is not running
//! (during `start` and after `stop`), and read from the loop thread.

use parking_lot::Mutex;
use x11rb::protocol::xproto::Window;

use crate::error::{Error, Result};

/// How many bridge instances one process can run at a time. Far more
/// than any production setup needs; tests like to run several.
pub(crate) const MAX_CONTEXTS: usize = 20;

/// Identifies a registered context across register/lookup calls.
pub(crate) type ContextId = u64;

#[derive(Clone, Copy)]
struct Slot {
	window: Window,
	context: ContextId,
}

static CONTEXTS: Mutex<[Option<Slot>; MAX_CONTEXTS]> =
	parking_lot::const_mutex([None; MAX_CONTEXTS]);

/// Associate a window with a context. Registering the same pair again
/// is a no-op; a window may hold only one context at a time.
pub(crate) fn register(window: Window, context: ContextId) -> Result<()> {
	let mut slots = CONTEXTS.lock();
	if let Some(slot) = slots.iter_mut().flatten().find(|s| s.window == window) {
		if slot.context != context {
			log::warn!("window {window} re-registered with a different context");
			slot.context = context;
		}
		return Ok(());
	}
	match slots.iter_mut().find(|s| s.is_none()) {
		Some(free) => {
			*free = Some(Slot { window, context });
			Ok(())
		}
		None => Err(Error::OutOfMemory),
	}
}

/// Remove a window's registration. Unregistering an unknown window is
/// a no-op.
pub(crate) fn unregister(window: Window) {
	let mut slots = CONTEXTS.lock();
	for slot in slots.iter_mut() {
		if slot.map_or(false, |s| s.window == window) {
			*slot = None;
		}
	}
}

/// The context registered for a window, if any.
pub(crate) fn lookup(window: Window) -> Option<ContextId> {
	CONTEXTS.lock().iter().flatten().find(|s| s.window == window).map(|s| s.context)
}
