/*
SPDX-License-Identifier: Apache-2.0 OR MIT

Copyright 2026 The clipbridge contributors

The project to which this file belongs is licensed under either of
the Apache 2.0 or the MIT license at the licensee's choice. The terms
and conditions of the chosen license apply to this file.
*/

//! The real X11 toolkit and the thread that runs it.
//!
//! One thread per bridge owns the connection and every piece of
//! selection state. It blocks in poll(2) on the union of the X stream
//! and the wakeup pipe. Other threads enqueue work items and write a
//! token into the pipe; the token itself is discarded, it only exists
//! to make the kernel wait return.

use std::collections::{HashMap, VecDeque};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, trace, warn};
use parking_lot::Mutex;
use x11rb::connection::Connection;
use x11rb::connection::RequestConnection;
use x11rb::protocol::xfixes::{self, ConnectionExt as _, SelectionEventMask};
use x11rb::protocol::xproto::{
	Atom, ConnectionExt as _, CreateWindowAux, EventMask, GetPropertyType, PropMode, Property,
	PropertyNotifyEvent, SelectionNotifyEvent, SelectionRequestEvent, Time, Window, WindowClass,
	SELECTION_NOTIFY_EVENT,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::{COPY_DEPTH_FROM_PARENT, COPY_FROM_PARENT, NONE};

use super::{Context, PeerData, Reply, Toolkit, TransferKind};
use crate::bridge::{Cookie, Frontend};
use crate::error::{Error, Result};
use crate::registry;

/// How long to wait for the X socket before assuming there is no
/// server worth talking to.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// How long a selection owner gets to answer a conversion.
const TRANSFER_TIMEOUT: Duration = Duration::from_millis(4000);
/// How long between INCR chunks before the transfer is abandoned.
const INCR_CHUNK_TIMEOUT: Duration = Duration::from_millis(100);
/// Written into the wakeup pipe, one token per queued work item. The
/// content never matters.
const WAKE_TOKEN: &[u8] = b"wake";
/// The property on our window that conversion replies land in.
const TRANSFER_PROPERTY: &str = "CLIPBRIDGE_TRANSFER";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

fn into_unresolved<E: std::fmt::Display>(error: E) -> Error {
	Error::Unresolved(error.to_string())
}

/// Work another thread wants run on the event-loop thread.
pub(crate) enum Work {
	AnnounceFormats(u32),
	RequestData { format: u32, cookie: Cookie },
	Stop,
}

/// The cross-thread half of a running loop: the work queue and the
/// write end of the wakeup pipe.
pub(crate) struct Shared {
	work: Mutex<VecDeque<Work>>,
	pipe_write: OwnedFd,
}

impl Shared {
	/// Queue a work item and unblock the loop. Never blocks beyond the
	/// pipe write itself.
	pub(crate) fn push(&self, item: Work) {
		self.work.lock().push_back(item);
		let rc = unsafe {
			libc::write(self.pipe_write.as_raw_fd(), WAKE_TOKEN.as_ptr().cast(), WAKE_TOKEN.len())
		};
		if rc < 0 {
			warn!("waking the clipboard event loop failed: {}", std::io::Error::last_os_error());
		}
	}

	fn pop(&self) -> Option<Work> {
		self.work.lock().pop_front()
	}
}

/// A conversion we issued and are waiting on.
struct Transfer {
	kind: TransferKind,
	target: Atom,
	deadline: Instant,
	buf: Vec<u8>,
	using_incr: bool,
}

/// The [`Toolkit`] backed by a live x11rb connection.
struct XToolkit {
	conn: RustConnection,
	win_id: Window,
	atoms: HashMap<String, Atom>,
	atom_names: HashMap<Atom, String>,
	transfer_property: Atom,
	transfer: Option<Transfer>,
}

impl Toolkit for XToolkit {
	fn atom(&mut self, name: &str) -> Atom {
		if let Some(&atom) = self.atoms.get(name) {
			return atom;
		}
		let atom = self
			.conn
			.intern_atom(false, name.as_bytes())
			.ok()
			.and_then(|cookie| cookie.reply().ok())
			.map_or(NONE, |reply| reply.atom);
		if atom == NONE {
			warn!("failed to intern atom {name}");
		} else {
			self.atoms.insert(name.to_owned(), atom);
			self.atom_names.insert(atom, name.to_owned());
		}
		atom
	}

	fn atom_name(&mut self, atom: Atom) -> String {
		if let Some(name) = self.atom_names.get(&atom) {
			return name.clone();
		}
		let name = self
			.conn
			.get_atom_name(atom)
			.ok()
			.and_then(|cookie| cookie.reply().ok())
			.map_or_else(String::new, |reply| String::from_utf8_lossy(&reply.name).into_owned());
		if !name.is_empty() {
			self.atom_names.insert(atom, name.clone());
		}
		name
	}

	fn own_selection(&mut self, selection: Atom) -> bool {
		let grabbed = self
			.conn
			.set_selection_owner(self.win_id, selection, Time::CURRENT_TIME)
			.is_ok() && self.conn.flush().is_ok();
		// The server is free to have given the selection to someone
		// else in the meantime; what counts is who owns it now.
		grabbed
			&& self
				.conn
				.get_selection_owner(selection)
				.ok()
				.and_then(|cookie| cookie.reply().ok())
				.map_or(false, |reply| reply.owner == self.win_id)
	}

	fn disown_selection(&mut self, selection: Atom) {
		if self.conn.set_selection_owner(NONE, selection, Time::CURRENT_TIME).is_err() {
			warn!("releasing selection {selection} failed");
		}
		let _ = self.conn.flush();
	}

	fn convert_selection(&mut self, selection: Atom, target: Atom, kind: TransferKind) {
		// Clear the landing property first so a PropertyNotify tells
		// us when the owner starts writing.
		let issued = self
			.conn
			.delete_property(self.win_id, self.transfer_property)
			.is_ok()
			&& self
				.conn
				.convert_selection(
					self.win_id,
					selection,
					target,
					self.transfer_property,
					Time::CURRENT_TIME,
				)
				.is_ok()
			&& self.conn.flush().is_ok();
		if !issued {
			warn!("issuing the selection conversion failed");
		}
		// Even on a failed send the transfer record stands; the
		// deadline turns it into a timeout.
		self.transfer = Some(Transfer {
			kind,
			target,
			deadline: Instant::now() + TRANSFER_TIMEOUT,
			buf: Vec::new(),
			using_incr: false,
		});
	}
}

/// What a settled conversion produced.
enum Outcome {
	Value { format: u8, value: Vec<u8> },
	NoContent,
	Timeout,
}

/// Everything `start` hands back to the facade.
pub(crate) struct Started {
	pub shared: Arc<Shared>,
	pub thread: JoinHandle<()>,
	pub win_id: Window,
}

/// Connect, set up the client window and XFIXES, create the wakeup
/// pipe, and spawn the loop thread. Every step unwinds on failure.
pub(crate) fn spawn_event_loop(frontend: Arc<dyn Frontend>, grab: bool) -> Result<Started> {
	let (conn, screen_num) = connect()?;

	// Without XFIXES there is no way to observe selection-owner
	// changes short of polling; treat its absence as fatal.
	let present = conn
		.extension_information(xfixes::X11_EXTENSION_NAME)
		.map_err(into_unresolved)?
		.is_some();
	if !present {
		return Err(Error::NotSupported("the XFIXES extension is not present".into()));
	}
	let version = conn
		.xfixes_query_version(5, 0)
		.map_err(into_unresolved)?
		.reply()
		.map_err(|e| Error::NotSupported(format!("XFIXES version negotiation failed: {e}")))?;
	trace!("XFIXES {}.{}", version.major_version, version.minor_version);

	let screen = conn
		.setup()
		.roots
		.get(screen_num)
		.ok_or_else(|| Error::NotSupported("no usable screen".into()))?;
	let win_id = conn.generate_id().map_err(into_unresolved)?;
	conn.create_window(
		COPY_DEPTH_FROM_PARENT,
		win_id,
		screen.root,
		0,
		0,
		1,
		1,
		0,
		WindowClass::COPY_FROM_PARENT,
		COPY_FROM_PARENT,
		// PropertyNotify carries INCR chunks, StructureNotify lets a
		// DestroyNotify stop the loop.
		&CreateWindowAux::new().event_mask(EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY),
	)
	.map_err(into_unresolved)?;

	let clipboard = conn
		.intern_atom(false, b"CLIPBOARD")
		.map_err(into_unresolved)?
		.reply()
		.map_err(into_unresolved)?
		.atom;
	conn.xfixes_select_selection_input(
		win_id,
		clipboard,
		SelectionEventMask::SET_SELECTION_OWNER
			| SelectionEventMask::SELECTION_WINDOW_DESTROY
			| SelectionEventMask::SELECTION_CLIENT_CLOSE,
	)
	.map_err(into_unresolved)?;
	let transfer_property = conn
		.intern_atom(false, TRANSFER_PROPERTY.as_bytes())
		.map_err(into_unresolved)?
		.reply()
		.map_err(into_unresolved)?
		.atom;
	conn.flush().map_err(into_unresolved)?;

	let context_id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
	registry::register(win_id, context_id)?;

	let (pipe_read, pipe_write) = match wakeup_pipe() {
		Ok(pipes) => pipes,
		Err(e) => {
			registry::unregister(win_id);
			return Err(e);
		}
	};

	let shared = Arc::new(Shared { work: Mutex::new(VecDeque::new()), pipe_write });
	let event_loop = EventLoop {
		tk: XToolkit {
			conn,
			win_id,
			atoms: HashMap::new(),
			atom_names: HashMap::new(),
			transfer_property,
			transfer: None,
		},
		ctx: Context::new(frontend, grab),
		shared: Arc::clone(&shared),
		pipe_read,
		exit: false,
	};
	match thread::Builder::new().name("clipbridge-x11".into()).spawn(move || event_loop.run()) {
		Ok(thread) => Ok(Started { shared, thread, win_id }),
		Err(e) => {
			registry::unregister(win_id);
			Err(Error::Unresolved(format!("spawning the event loop thread failed: {e}")))
		}
	}
}

/// Connect from a helper thread so a wedged X socket cannot hang the
/// caller.
fn connect() -> Result<(RustConnection, usize)> {
	let (tx, rx) = mpsc::channel();
	thread::spawn(move || {
		// A send error only means the main thread gave up waiting.
		tx.send(RustConnection::connect(None)).ok();
	});
	let outcome = rx
		.recv_timeout(CONNECT_TIMEOUT)
		.map_err(|_| Error::NotSupported("timed out connecting to the X server".into()))?;
	outcome.map_err(|e| Error::NotSupported(format!("cannot reach the X server: {e}")))
}

fn wakeup_pipe() -> Result<(OwnedFd, OwnedFd)> {
	let mut fds = [0 as libc::c_int; 2];
	if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
		return Err(Error::Unresolved(format!(
			"creating the wakeup pipe failed: {}",
			std::io::Error::last_os_error()
		)));
	}
	// Only the read side goes nonblocking: the loop drains it
	// opportunistically, writers take the fixed-size token hit.
	if unsafe { libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK) } != 0 {
		let err = std::io::Error::last_os_error();
		unsafe {
			libc::close(fds[0]);
			libc::close(fds[1]);
		}
		return Err(Error::Unresolved(format!("configuring the wakeup pipe failed: {err}")));
	}
	Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

struct EventLoop {
	tk: XToolkit,
	ctx: Context,
	shared: Arc<Shared>,
	pipe_read: OwnedFd,
	exit: bool,
}

impl EventLoop {
	fn run(mut self) {
		trace!("clipboard event loop starting");
		if self.ctx.grab_on_start {
			self.ctx.query_targets(&mut self.tk);
		}
		loop {
			self.drain_work();
			if self.exit {
				break;
			}
			if let Err(e) = self.drain_events() {
				error!("the X connection broke: {e}");
				break;
			}
			self.check_deadline();
			if self.exit {
				break;
			}
			if let Err(e) = self.tk.conn.flush() {
				error!("flushing the X connection failed: {e}");
				break;
			}
			self.wait();
			self.drain_pipe();
		}
		trace!("clipboard event loop terminated");
	}

	fn drain_work(&mut self) {
		while let Some(item) = self.shared.pop() {
			match item {
				Work::AnnounceFormats(formats) => self.ctx.announce_formats(&mut self.tk, formats),
				Work::RequestData { format, cookie } => {
					self.ctx.request_data(&mut self.tk, format, cookie)
				}
				Work::Stop => self.exit = true,
			}
		}
	}

	fn drain_events(&mut self) -> Result<()> {
		while let Some(event) = self.tk.conn.poll_for_event().map_err(into_unresolved)? {
			self.dispatch(event);
		}
		Ok(())
	}

	fn dispatch(&mut self, event: Event) {
		match event {
			Event::XfixesSelectionNotify(e) => self.on_owner_change(e),
			Event::SelectionRequest(e) => self.on_selection_request(e),
			Event::SelectionNotify(e) => self.on_selection_notify(e),
			Event::PropertyNotify(e) => self.on_property_notify(e),
			Event::SelectionClear(e) => {
				trace!("lost selection {} to another client", e.selection);
			}
			Event::DestroyNotify(_) => {
				trace!("client window destroyed, stopping");
				self.exit = true;
			}
			_ => {}
		}
	}

	/// An XFIXES notification: the selection changed hands. Our own
	/// grabs show up here too and are ignored.
	fn on_owner_change(&mut self, event: xfixes::SelectionNotifyEvent) {
		if event.owner == self.tk.win_id {
			return;
		}
		let occupied = event.subtype == xfixes::SelectionEvent::SET_SELECTION_OWNER
			&& event.owner != NONE;
		self.ctx.owner_changed(&mut self.tk, occupied.then_some(event.owner));
	}

	/// A peer wants our selection converted. The protocol answer is a
	/// property write plus a SelectionNotify; refusals carry no
	/// property.
	fn on_selection_request(&mut self, event: SelectionRequestEvent) {
		if event.owner != self.tk.win_id || registry::lookup(event.owner).is_none() {
			warn!("conversion request for a window this bridge does not serve");
			return;
		}
		let property = match self.ctx.convert_for_peer(&mut self.tk, event.selection, event.target)
		{
			Ok(reply) => {
				let written = match &reply.data {
					PeerData::Atoms(atoms) => self
						.tk
						.conn
						.change_property32(
							PropMode::REPLACE,
							event.requestor,
							event.property,
							reply.type_atom,
							atoms,
						)
						.is_ok(),
					PeerData::Bytes(bytes) => self
						.tk
						.conn
						.change_property8(
							PropMode::REPLACE,
							event.requestor,
							event.property,
							reply.type_atom,
							bytes,
						)
						.is_ok(),
				};
				if written {
					event.property
				} else {
					NONE
				}
			}
			Err(e) => {
				trace!("refusing conversion: {e}");
				NONE
			}
		};
		let notify = SelectionNotifyEvent {
			response_type: SELECTION_NOTIFY_EVENT,
			sequence: event.sequence,
			time: event.time,
			requestor: event.requestor,
			selection: event.selection,
			target: event.target,
			property,
		};
		if self.tk.conn.send_event(false, event.requestor, EventMask::NO_EVENT, notify).is_err() {
			warn!("answering a selection request failed");
		}
		let _ = self.tk.conn.flush();
	}

	/// The owner answered a conversion we issued.
	fn on_selection_notify(&mut self, event: SelectionNotifyEvent) {
		let Some(transfer) = self.tk.transfer.as_ref() else {
			trace!("SelectionNotify with no transfer outstanding");
			return;
		};
		if event.requestor != self.tk.win_id || event.target != transfer.target {
			return;
		}
		if transfer.using_incr {
			warn!("SelectionNotify while an INCR transfer is active");
			return;
		}
		if event.property == NONE {
			self.finish_transfer(Outcome::NoContent);
			return;
		}
		match self.fetch_transfer_property() {
			Ok(Some(outcome)) => self.finish_transfer(outcome),
			// The INCR handshake started; chunks follow as
			// PropertyNotify events.
			Ok(None) => {}
			Err(e) => {
				warn!("reading the conversion reply failed: {e}");
				self.finish_transfer(Outcome::NoContent);
			}
		}
	}

	/// Read the landing property. `None` means an INCR transfer was
	/// initiated instead of inline data.
	fn fetch_transfer_property(&mut self) -> Result<Option<Outcome>> {
		let reply = self
			.tk
			.conn
			.get_property(
				true,
				self.tk.win_id,
				self.tk.transfer_property,
				GetPropertyType::ANY,
				0,
				u32::MAX / 4,
			)
			.map_err(into_unresolved)?
			.reply()
			.map_err(into_unresolved)?;
		let incr: Atom = self.tk.atom("INCR");
		if reply.type_ == incr {
			let transfer = self.tk.transfer.as_mut().ok_or(Error::NoData)?;
			transfer.using_incr = true;
			transfer.deadline = Instant::now() + INCR_CHUNK_TIMEOUT;
			// The owner advertises a lower bound for the total size.
			if let Some(hint) = reply.value32().and_then(|mut values| values.next()) {
				transfer.buf.reserve(hint as usize);
			}
			trace!("INCR transfer started");
			return Ok(None);
		}
		Ok(Some(Outcome::Value { format: reply.format, value: reply.value }))
	}

	/// An INCR chunk (or the zero-length terminator) arrived.
	fn on_property_notify(&mut self, event: PropertyNotifyEvent) {
		if event.window != self.tk.win_id
			|| event.atom != self.tk.transfer_property
			|| event.state != Property::NEW_VALUE
		{
			return;
		}
		match self.tk.transfer.as_ref() {
			// The owner received our request and is preparing data.
			Some(transfer) if !transfer.using_incr => return,
			Some(_) => {}
			None => return,
		}
		let reply = self
			.tk
			.conn
			.get_property(
				true,
				self.tk.win_id,
				self.tk.transfer_property,
				GetPropertyType::ANY,
				0,
				u32::MAX / 4,
			)
			.ok()
			.and_then(|cookie| cookie.reply().ok());
		match reply {
			Some(reply) if reply.value_len == 0 => {
				// Terminator: the transfer is complete.
				let value = self
					.tk
					.transfer
					.as_mut()
					.map(|t| std::mem::take(&mut t.buf))
					.unwrap_or_default();
				self.finish_transfer(Outcome::Value { format: 8, value });
			}
			Some(reply) => {
				if let Some(transfer) = self.tk.transfer.as_mut() {
					transfer.buf.extend_from_slice(&reply.value);
					transfer.deadline = Instant::now() + INCR_CHUNK_TIMEOUT;
				}
			}
			None => {
				warn!("reading an INCR chunk failed");
				self.finish_transfer(Outcome::NoContent);
			}
		}
	}

	/// Route a settled conversion to the requester logic.
	fn finish_transfer(&mut self, outcome: Outcome) {
		let Some(transfer) = self.tk.transfer.take() else {
			return;
		};
		match transfer.kind {
			TransferKind::Targets => {
				let atoms = match outcome {
					Outcome::Value { format: 32, value } => Some(parse_atoms(&value)),
					Outcome::Value { format, .. } => {
						warn!("TARGETS reply with unexpected format {format}");
						None
					}
					Outcome::NoContent | Outcome::Timeout => None,
				};
				self.ctx.targets_reply(&mut self.tk, atoms);
			}
			TransferKind::Data => {
				let reply = match outcome {
					Outcome::Value { value, .. } => Reply::Data(value),
					Outcome::NoContent => Reply::NoContent,
					Outcome::Timeout => Reply::Timeout,
				};
				self.ctx.data_reply(&mut self.tk, reply);
			}
		}
	}

	fn check_deadline(&mut self) {
		if let Some(transfer) = self.tk.transfer.as_ref() {
			if Instant::now() >= transfer.deadline {
				warn!("selection transfer timed out");
				self.finish_transfer(Outcome::Timeout);
			}
		}
	}

	/// Block until the X stream or the wakeup pipe is readable, or the
	/// transfer deadline is due.
	fn wait(&self) {
		let timeout_ms: libc::c_int = match self.tk.transfer.as_ref() {
			Some(transfer) => {
				let now = Instant::now();
				if transfer.deadline <= now {
					0
				} else {
					transfer
						.deadline
						.duration_since(now)
						.as_millis()
						.min(libc::c_int::MAX as u128) as libc::c_int
				}
			}
			None => -1,
		};
		let mut fds = [
			libc::pollfd {
				fd: self.tk.conn.stream().as_raw_fd(),
				events: libc::POLLIN,
				revents: 0,
			},
			libc::pollfd { fd: self.pipe_read.as_raw_fd(), events: libc::POLLIN, revents: 0 },
		];
		let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
		if rc < 0 {
			let err = std::io::Error::last_os_error();
			if err.kind() != std::io::ErrorKind::Interrupted {
				warn!("poll on the event loop fds failed: {err}");
			}
		}
	}

	/// Throw away whatever accumulated in the wakeup pipe. Only the
	/// arrival of the tokens meant anything.
	fn drain_pipe(&self) {
		let mut buf = [0u8; 64];
		loop {
			let rc = unsafe {
				libc::read(self.pipe_read.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
			};
			if rc <= 0 {
				break;
			}
		}
	}
}

fn parse_atoms(value: &[u8]) -> Vec<Atom> {
	value
		.chunks_exact(4)
		.map(|c| Atom::from_ne_bytes([c[0], c[1], c[2], c[3]]))
		.collect()
}
