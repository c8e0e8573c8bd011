/*
SPDX-License-Identifier: Apache-2.0 OR MIT

Copyright 2026 The clipbridge contributors

The project to which this file belongs is licensed under either of
the Apache 2.0 or the MIT license at the licensee's choice. The terms
and conditions of the chosen license apply to this file.
*/

//! The public face of the bridge.
//!
//! A [`Bridge`] connects one upstream [`Frontend`] to the X11
//! selections. All X11 state lives on a dedicated event-loop thread;
//! the methods here only enqueue work items and wake that thread, so
//! they are safe to call from anywhere and never block (except `stop`,
//! which joins the thread).
//!
//! When no X server is available the bridge is constructed headless:
//! every operation is an inert success, except [`Bridge::request_data`]
//! which completes synchronously with [`Error::NoData`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, trace, warn};

use crate::error::{Error, Result};
use crate::registry;
use crate::x11::{self, Work};

/// How long `stop` keeps checking for the loop thread to wind down.
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STOP_POLL_ATTEMPTS: u32 = 300;

/// Opaque token the frontend attaches to a data request; echoed back
/// verbatim in the completion so replies can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie(pub u64);

/// What the bridge needs from the upstream clipboard service.
///
/// `host_clipboard_data` is called on the event-loop thread and may
/// block for the duration of a host round-trip; the two notification
/// callbacks must not block. Completion bytes are passed by value and
/// belong to the callee afterwards.
pub trait Frontend: Send + Sync {
	/// Fetch the host clipboard contents in the given format,
	/// synchronously.
	fn host_clipboard_data(&self, format: u32) -> Result<Vec<u8>>;

	/// The X11 side now offers this set of host formats (possibly
	/// empty).
	fn report_formats(&self, formats: u32);

	/// A prior [`Bridge::request_data`] finished, successfully or not.
	fn complete_request(&self, cookie: Cookie, result: Result<Vec<u8>>);
}

enum Backend {
	/// No X server: refuse everything, silently.
	Headless,
	/// The real backend; `None` until `start` succeeds.
	X11(Option<Running>),
}

struct Running {
	shared: Arc<x11::Shared>,
	thread: thread::JoinHandle<()>,
	win_id: u32,
}

/// A bidirectional clipboard bridge between the host channel and the
/// X11 selections.
pub struct Bridge {
	frontend: Arc<dyn Frontend>,
	backend: Backend,
}

impl Bridge {
	/// Create a bridge. A headless bridge never touches X11 and
	/// swallows every operation; this keeps callers free of
	/// conditionals on machines without a display.
	pub fn new(frontend: Arc<dyn Frontend>, headless: bool) -> Self {
		let backend = if headless {
			trace!("no X11 display, running the clipboard bridge headless");
			Backend::Headless
		} else {
			Backend::X11(None)
		};
		Self { frontend, backend }
	}

	/// Connect to the X server and spin up the event loop. With `grab`
	/// set, the X11 clipboard is polled for content right away. On any
	/// failure everything set up so far is torn down again.
	pub fn start(&mut self, grab: bool) -> Result<()> {
		match &mut self.backend {
			Backend::Headless => Ok(()),
			Backend::X11(Some(_)) => {
				warn!("clipboard bridge started twice");
				Ok(())
			}
			Backend::X11(running @ None) => {
				let started = x11::spawn_event_loop(Arc::clone(&self.frontend), grab)?;
				*running = Some(Running {
					shared: started.shared,
					thread: started.thread,
					win_id: started.win_id,
				});
				Ok(())
			}
		}
	}

	/// Shut the event loop down and release everything. Idempotent;
	/// safe to call on a bridge that never started.
	///
	/// Any outstanding host data fetch must have returned before this
	/// is called, otherwise the loop cannot wind down.
	pub fn stop(&mut self) -> Result<()> {
		let Backend::X11(running) = &mut self.backend else {
			return Ok(());
		};
		let Some(running) = running.take() else {
			return Ok(());
		};
		trace!("stopping the clipboard bridge");
		running.shared.push(Work::Stop);
		let mut attempts = 0;
		while !running.thread.is_finished() && attempts < STOP_POLL_ATTEMPTS {
			thread::sleep(STOP_POLL_INTERVAL);
			attempts += 1;
		}
		if !running.thread.is_finished() {
			error!("the clipboard event loop did not stop");
			return Err(Error::Timeout);
		}
		if running.thread.join().is_err() {
			error!("the clipboard event loop panicked");
		}
		registry::unregister(running.win_id);
		Ok(())
	}

	/// Announce the formats the host now holds. A non-empty mask grabs
	/// the CLIPBOARD and PRIMARY selections, an empty one releases
	/// them. Returns immediately; the work runs on the loop thread.
	pub fn announce_formats(&self, formats: u32) {
		match &self.backend {
			Backend::Headless => {}
			Backend::X11(Some(running)) => running.shared.push(Work::AnnounceFormats(formats)),
			Backend::X11(None) => warn!("announce_formats on a bridge that is not started"),
		}
	}

	/// Ask for the X11 clipboard contents in a host format. Returns
	/// immediately; the result arrives through
	/// [`Frontend::complete_request`] with the same cookie, on the
	/// loop thread.
	pub fn request_data(&self, format: u32, cookie: Cookie) -> Result<()> {
		match &self.backend {
			Backend::Headless => {
				self.frontend.complete_request(cookie, Err(Error::NoData));
				Ok(())
			}
			Backend::X11(Some(running)) => {
				running.shared.push(Work::RequestData { format, cookie });
				Ok(())
			}
			Backend::X11(None) => {
				warn!("request_data on a bridge that is not started");
				self.frontend.complete_request(cookie, Err(Error::NoData));
				Ok(())
			}
		}
	}
}

impl Drop for Bridge {
	fn drop(&mut self) {
		if let Err(e) = self.stop() {
			error!("stopping the clipboard bridge on drop failed: {e}");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::format::host_format;
	use crate::x11::testkit::FakeFrontend;

	#[test]
	fn headless_operations_succeed_silently() {
		let frontend = FakeFrontend::new();
		let mut bridge = Bridge::new(frontend.clone(), true);
		bridge.start(false).unwrap();
		bridge.announce_formats(host_format::UNICODE_TEXT);
		bridge.announce_formats(0);
		bridge.stop().unwrap();
		bridge.stop().unwrap();
		assert!(frontend.reported.lock().is_empty());
	}

	#[test]
	fn headless_request_completes_with_no_data() {
		let frontend = FakeFrontend::new();
		frontend.set_host_text("never served");
		let mut bridge = Bridge::new(frontend.clone(), true);
		bridge.start(true).unwrap();

		bridge.request_data(host_format::UNICODE_TEXT, Cookie(7)).unwrap();
		let (cookie, result) = frontend.take_completion();
		assert_eq!(cookie, Cookie(7));
		assert_eq!(result, Err(Error::NoData));

		// Every request, not just the first.
		bridge.request_data(0xFFFF, Cookie(8)).unwrap();
		let (cookie, result) = frontend.take_completion();
		assert_eq!(cookie, Cookie(8));
		assert_eq!(result, Err(Error::NoData));
	}

	#[test]
	fn stop_before_start_is_a_no_op() {
		let frontend = FakeFrontend::new();
		let mut bridge = Bridge::new(frontend, false);
		bridge.stop().unwrap();
	}
}
