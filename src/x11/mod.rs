//! The X11 side of the bridge: selection state, the toolkit seam the
//! core logic runs against, and the owner/requester protocol paths.
//!
//! All of the state in [`Context`] is owned by a single event-loop
//! thread; other threads only enqueue work items and write the wakeup
//! pipe.

use std::sync::Arc;

use x11rb::protocol::xproto::Atom;

use crate::bridge::{Cookie, Frontend};
use crate::ctext;

mod event_loop;
mod owner;
mod requester;

pub(crate) use event_loop::{spawn_event_loop, Shared, Started, Work};
pub(crate) use owner::{PeerData, PeerReply};

/// Whether an issued conversion is the TARGETS poll or a data fetch.
/// The reply routing differs: one carries atoms, the other bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferKind {
	Targets,
	Data,
}

/// The outcome of a data conversion, as delivered to the requester.
#[derive(Debug)]
pub(crate) enum Reply {
	/// The owner produced content.
	Data(Vec<u8>),
	/// The owner refused the conversion or had nothing to give.
	NoContent,
	/// The owner never answered within the transfer deadline.
	Timeout,
}

/// The selection operations the protocol logic needs from X11.
///
/// The real implementation wraps an x11rb connection; tests substitute
/// an in-memory fake, which is what makes the owner and requester
/// paths testable without an X server.
pub(crate) trait Toolkit {
	/// Intern an atom, caching the result.
	fn atom(&mut self, name: &str) -> Atom;
	/// The name of an atom, for diagnostics.
	fn atom_name(&mut self, atom: Atom) -> String;
	/// Try to become the owner of a selection.
	fn own_selection(&mut self, selection: Atom) -> bool;
	/// Give a selection up.
	fn disown_selection(&mut self, selection: Atom);
	/// Ask the current owner of `selection` to convert it to `target`.
	/// The answer arrives later as a [`Reply`] (or a TARGETS reply)
	/// routed by `kind`.
	fn convert_selection(&mut self, selection: Atom, target: Atom, kind: TransferKind);
}

/// One-shot record of a host data request that is out on the wire.
pub(crate) struct PendingRequest {
	/// The host format the data was requested in.
	pub host_format: u32,
	/// The format-table row of the target we asked X11 for.
	pub text_format: usize,
	/// Echoed back to the frontend on completion.
	pub cookie: Cookie,
}

/// Per-bridge X11 state. Only ever touched on the event-loop thread.
pub(crate) struct Context {
	pub frontend: Arc<dyn Frontend>,
	/// The format-table row that best represents what the X11 side
	/// currently holds; `None` while X11 offers nothing we understand,
	/// and always `None` while we own the selections ourselves.
	pub x11_text_format: Option<usize>,
	/// Tracked for future use; never chosen yet.
	pub x11_bitmap_format: Option<usize>,
	/// The format bits the host currently advertises.
	pub host_formats: u32,
	/// Host bytes fetched once per announcement, serving repeated peer
	/// conversions without another round-trip. Invalidated by every
	/// announcement.
	pub unicode_cache: Option<Vec<u8>>,
	/// A selection transfer (TARGETS poll or data fetch) is
	/// outstanding. At most one may be in flight.
	pub busy: bool,
	/// A selection change arrived while `busy`; one refresh is owed
	/// once the transfer settles. Multiple rapid changes coalesce.
	pub update_needed: bool,
	/// The host data request the current transfer belongs to.
	pub pending: Option<PendingRequest>,
	/// Poll the X11 clipboard as soon as the loop starts.
	pub grab_on_start: bool,
	/// Locale snapshot for compound text, taken at start.
	pub locale: ctext::Locale,
}

impl Context {
	pub(crate) fn new(frontend: Arc<dyn Frontend>, grab_on_start: bool) -> Self {
		Self {
			frontend,
			x11_text_format: None,
			x11_bitmap_format: None,
			host_formats: 0,
			unicode_cache: None,
			busy: false,
			update_needed: false,
			pending: None,
			grab_on_start,
			locale: ctext::Locale::capture(),
		}
	}
}
