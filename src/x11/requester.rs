/*
SPDX-License-Identifier: Apache-2.0 OR MIT

Copyright 2026 The clipbridge contributors

The project to which this file belongs is licensed under either of
the Apache 2.0 or the MIT license at the licensee's choice. The terms
and conditions of the chosen license apply to this file.
*/

//! Pulling data out of the X11 clipboard on behalf of the host.
//!
//! X11 selection transfers are one-at-a-time: while a TARGETS poll or
//! a data fetch is on the wire, `busy` is set and everything else has
//! to wait. A selection-owner change that arrives in the meantime only
//! flags `update_needed`; however many changes pile up, exactly one
//! refresh runs once the transfer settles. Host requests issued while
//! busy are fended off with `TryAgain` and retried upstream.

use log::{trace, warn};
use x11rb::protocol::xproto::{Atom, Window};

use super::{Context, PendingRequest, Reply, Toolkit, TransferKind};
use crate::error::Error;
use crate::format::{self, host_format, ClipFormat};
use crate::{ctext, text};

impl Context {
	/// The selection changed hands. A new owner means new content to
	/// interrogate; no owner means the clipboard is now empty.
	pub(crate) fn owner_changed(&mut self, toolkit: &mut dyn Toolkit, owner: Option<Window>) {
		match owner {
			Some(owner) => {
				trace!("selection owner is now window {owner}, polling targets");
				self.query_targets(toolkit);
			}
			None => {
				trace!("selection has no owner");
				if self.busy {
					self.update_needed = true;
				} else {
					self.report_empty();
				}
			}
		}
	}

	/// Ask the selection owner which targets it supports. Deferred
	/// when a transfer is already outstanding.
	pub(crate) fn query_targets(&mut self, toolkit: &mut dyn Toolkit) {
		if self.busy {
			self.update_needed = true;
			return;
		}
		self.busy = true;
		let clipboard = toolkit.atom("CLIPBOARD");
		let targets = toolkit.atom("TARGETS");
		toolkit.convert_selection(clipboard, targets, TransferKind::Targets);
	}

	/// The TARGETS poll came back. `None` covers both a refused
	/// conversion and a timed-out one; either way X11 offers nothing.
	pub(crate) fn targets_reply(&mut self, toolkit: &mut dyn Toolkit, atoms: Option<Vec<Atom>>) {
		self.busy = false;
		match atoms {
			Some(atoms) => {
				self.update_targets(toolkit, &atoms);
				self.report_formats();
			}
			None => self.report_empty(),
		}
		self.consume_deferred_update(toolkit);
	}

	/// The host wants the clipboard contents in `host_format`. The
	/// completion fires through the frontend in every outcome; when a
	/// conversion could actually be issued it fires later, from the
	/// reply path.
	pub(crate) fn request_data(
		&mut self,
		toolkit: &mut dyn Toolkit,
		host_format: u32,
		cookie: crate::bridge::Cookie,
	) {
		if self.busy {
			// Just fend the request off; upstream retries.
			self.frontend.complete_request(cookie, Err(Error::TryAgain));
			return;
		}
		if host_format != host_format::UNICODE_TEXT {
			self.frontend.complete_request(cookie, Err(Error::NotImplemented));
			return;
		}
		let Some(text_format) = self.x11_text_format else {
			// The host thinks X11 has data and it does not.
			self.frontend.complete_request(cookie, Err(Error::NoData));
			return;
		};
		self.busy = true;
		self.pending = Some(PendingRequest { host_format, text_format, cookie });
		let clipboard = toolkit.atom("CLIPBOARD");
		let target = format::atom_of(toolkit, text_format);
		trace!("requesting selection data as {}", toolkit.atom_name(target));
		toolkit.convert_selection(clipboard, target, TransferKind::Data);
	}

	/// The data conversion settled, one way or another.
	pub(crate) fn data_reply(&mut self, toolkit: &mut dyn Toolkit, reply: Reply) {
		self.busy = false;
		match self.pending.take() {
			Some(pending) => {
				trace!("completing a host request for format {:#x}", pending.host_format);
				let result = match reply {
					Reply::Timeout => Err(Error::Timeout),
					Reply::NoContent => Err(Error::NoData),
					Reply::Data(bytes) if bytes.is_empty() => Err(Error::NoData),
					Reply::Data(bytes) => convert_reply(&pending, &bytes),
				};
				self.frontend.complete_request(pending.cookie, result);
			}
			None => warn!("selection data arrived with no request pending"),
		}
		self.consume_deferred_update(toolkit);
	}

	/// Run the one refresh owed for selection changes that arrived
	/// while a transfer was outstanding.
	fn consume_deferred_update(&mut self, toolkit: &mut dyn Toolkit) {
		if self.update_needed {
			self.update_needed = false;
			self.query_targets(toolkit);
		}
	}

	/// Pick the best text target out of a TARGETS reply and remember
	/// it. Bitmap targets are tracked but never chosen.
	fn update_targets(&mut self, toolkit: &mut dyn Toolkit, atoms: &[Atom]) {
		let best = format::best_text_format(toolkit, atoms);
		if best != self.x11_text_format {
			if let Some(index) = best {
				trace!("best X11 text target is now {}", format::TABLE[index].atom_name);
			}
			self.x11_text_format = best;
		}
		self.x11_bitmap_format = None;
	}

	/// Forget what X11 had on offer and tell the host it is gone.
	fn report_empty(&mut self) {
		self.x11_text_format = None;
		self.x11_bitmap_format = None;
		self.report_formats();
	}

	/// Tell the host which of its formats the X11 side can currently
	/// deliver.
	fn report_formats(&self) {
		let mut formats = self.x11_text_format.map_or(0, format::host_mask_of);
		formats |= self.x11_bitmap_format.map_or(0, format::host_mask_of);
		self.frontend.report_formats(formats);
	}
}

/// Transcode a data reply into host bytes according to the target the
/// request went out under.
fn convert_reply(pending: &PendingRequest, bytes: &[u8]) -> Result<Vec<u8>, Error> {
	// Owners may or may not zero-terminate; a terminator is not
	// content either way.
	let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
	let bytes = &bytes[..end];
	let units = match format::tag_of(pending.text_format) {
		ClipFormat::CText => text::utf8_to_host_utf16(&ctext::decode(bytes)?)?,
		ClipFormat::Utf8 | ClipFormat::Text => text::x11_text_to_host_utf16(bytes)?,
		_ => return Err(Error::Unresolved("request went out under a non-text target".into())),
	};
	Ok(text::units_to_bytes(&units))
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::super::testkit::{context, host_text_bytes, FakeFrontend, FakeToolkit};
	use super::*;
	use crate::bridge::Cookie;

	struct Rig {
		frontend: Arc<FakeFrontend>,
		toolkit: FakeToolkit,
		ctx: Context,
	}

	impl Rig {
		fn new() -> Self {
			let frontend = FakeFrontend::new();
			Self { frontend: frontend.clone(), toolkit: FakeToolkit::new(), ctx: context(frontend) }
		}

		/// An X11 client takes the selection offering `targets`, and
		/// the resulting TARGETS poll completes.
		fn x11_offers(&mut self, targets: &[&str]) {
			self.ctx.owner_changed(&mut self.toolkit, Some(0x42));
			let atoms: Vec<Atom> = targets.iter().map(|n| self.toolkit.atom(n)).collect();
			self.ctx.targets_reply(&mut self.toolkit, Some(atoms));
		}

		fn request(&mut self, cookie: u64) {
			self.ctx.request_data(&mut self.toolkit, host_format::UNICODE_TEXT, Cookie(cookie));
		}
	}

	#[test]
	fn utf8_in_utf16_out() {
		let mut rig = Rig::new();
		rig.x11_offers(&["UTF8_STRING"]);
		assert_eq!(rig.frontend.last_reported(), Some(host_format::UNICODE_TEXT));

		rig.request(1);
		assert_eq!(rig.toolkit.last_conversion_target().as_deref(), Some("UTF8_STRING"));
		rig.ctx.data_reply(&mut rig.toolkit, Reply::Data(b"hello world\0".to_vec()));

		let (cookie, result) = rig.frontend.take_completion();
		assert_eq!(cookie, Cookie(1));
		let bytes = result.unwrap();
		assert_eq!(bytes.len(), 24);
		assert_eq!(bytes, host_text_bytes("hello world"));
	}

	#[test]
	fn embedded_lf_becomes_crlf() {
		let mut rig = Rig::new();
		rig.x11_offers(&["text/plain;charset=UTF-8"]);
		rig.request(2);
		rig.ctx.data_reply(&mut rig.toolkit, Reply::Data(b"hello\nworld\0".to_vec()));
		let (_, result) = rig.frontend.take_completion();
		assert_eq!(result.unwrap(), host_text_bytes("hello\r\nworld"));
	}

	#[test]
	fn compound_text_reply_is_decoded() {
		let mut rig = Rig::new();
		rig.x11_offers(&["COMPOUND_TEXT"]);
		rig.request(3);
		assert_eq!(rig.toolkit.last_conversion_target().as_deref(), Some("COMPOUND_TEXT"));
		rig.ctx.data_reply(&mut rig.toolkit, Reply::Data(b"hello\nworld".to_vec()));
		let (_, result) = rig.frontend.take_completion();
		assert_eq!(result.unwrap(), host_text_bytes("hello\r\nworld"));
	}

	#[test]
	fn latin1_fallback_for_broken_utf8() {
		let mut rig = Rig::new();
		rig.x11_offers(&["STRING"]);
		rig.request(4);
		rig.ctx.data_reply(&mut rig.toolkit, Reply::Data(b"Georges Dupr\xEA".to_vec()));
		let (_, result) = rig.frontend.take_completion();
		assert_eq!(result.unwrap(), host_text_bytes("Georges Dupr\u{EA}"));
	}

	#[test]
	fn empty_selection_completes_no_data() {
		let mut rig = Rig::new();
		rig.x11_offers(&["UTF8_STRING"]);
		rig.request(5);
		rig.ctx.data_reply(&mut rig.toolkit, Reply::Data(Vec::new()));
		let (cookie, result) = rig.frontend.take_completion();
		assert_eq!(cookie, Cookie(5));
		assert_eq!(result, Err(Error::NoData));
	}

	#[test]
	fn unknown_targets_report_nothing() {
		let mut rig = Rig::new();
		rig.x11_offers(&["STRING_FOO"]);
		assert_eq!(rig.frontend.last_reported(), Some(0));

		// And a request against nothing completes with NoData without
		// touching the wire.
		let conversions = rig.toolkit.conversions.len();
		rig.request(6);
		assert_eq!(rig.toolkit.conversions.len(), conversions);
		let (_, result) = rig.frontend.take_completion();
		assert_eq!(result, Err(Error::NoData));
		assert!(!rig.ctx.busy);
	}

	#[test]
	fn conversion_timeout_is_distinct_from_no_data() {
		let mut rig = Rig::new();
		rig.x11_offers(&["UTF8_STRING"]);
		rig.request(7);
		rig.ctx.data_reply(&mut rig.toolkit, Reply::Timeout);
		let (_, result) = rig.frontend.take_completion();
		assert_eq!(result, Err(Error::Timeout));
	}

	#[test]
	fn unknown_host_format_not_implemented() {
		let mut rig = Rig::new();
		rig.x11_offers(&["UTF8_STRING"]);
		rig.ctx.request_data(&mut rig.toolkit, 0xFFFF, Cookie(8));
		let (cookie, result) = rig.frontend.take_completion();
		assert_eq!(cookie, Cookie(8));
		assert_eq!(result, Err(Error::NotImplemented));
		assert!(!rig.ctx.busy);
	}

	#[test]
	fn second_request_in_flight_gets_try_again() {
		let mut rig = Rig::new();
		rig.x11_offers(&["UTF8_STRING"]);
		rig.request(9);
		assert!(rig.ctx.busy);
		rig.request(10);
		let (cookie, result) = rig.frontend.take_completion();
		assert_eq!(cookie, Cookie(10));
		assert_eq!(result, Err(Error::TryAgain));

		// The first transfer still completes normally.
		rig.ctx.data_reply(&mut rig.toolkit, Reply::Data(b"hi\0".to_vec()));
		let (cookie, result) = rig.frontend.take_completion();
		assert_eq!(cookie, Cookie(9));
		assert!(result.is_ok());
	}

	#[test]
	fn owner_changes_while_busy_coalesce_into_one_refresh() {
		let mut rig = Rig::new();
		rig.x11_offers(&["UTF8_STRING"]);
		rig.request(11);

		// Three rapid changes while the fetch is outstanding.
		rig.ctx.owner_changed(&mut rig.toolkit, Some(0x43));
		rig.ctx.owner_changed(&mut rig.toolkit, Some(0x44));
		rig.ctx.owner_changed(&mut rig.toolkit, None);
		assert!(rig.ctx.update_needed);
		let conversions = rig.toolkit.conversions.len();

		rig.ctx.data_reply(&mut rig.toolkit, Reply::Data(b"stale\0".to_vec()));

		// Exactly one TARGETS refresh went out, and the flag cleared.
		assert_eq!(rig.toolkit.conversions.len(), conversions + 1);
		assert_eq!(
			rig.toolkit.conversions.last().map(|&(_, _, kind)| kind),
			Some(TransferKind::Targets)
		);
		assert!(!rig.ctx.update_needed);
		assert!(rig.ctx.busy);
	}

	#[test]
	fn targets_timeout_reports_empty() {
		let mut rig = Rig::new();
		rig.ctx.owner_changed(&mut rig.toolkit, Some(0x42));
		rig.ctx.targets_reply(&mut rig.toolkit, None);
		assert_eq!(rig.frontend.last_reported(), Some(0));
		assert_eq!(rig.ctx.x11_text_format, None);
		assert!(!rig.ctx.busy);
	}

	#[test]
	fn ownerless_selection_reports_empty_immediately() {
		let mut rig = Rig::new();
		rig.x11_offers(&["UTF8_STRING"]);
		rig.ctx.owner_changed(&mut rig.toolkit, None);
		assert_eq!(rig.frontend.last_reported(), Some(0));
		assert_eq!(rig.ctx.x11_text_format, None);
	}

	#[test]
	fn busy_toggles_once_per_transfer() {
		let mut rig = Rig::new();
		assert!(!rig.ctx.busy);
		rig.ctx.owner_changed(&mut rig.toolkit, Some(0x42));
		assert!(rig.ctx.busy);
		let utf8 = rig.toolkit.atom("UTF8_STRING");
		rig.ctx.targets_reply(&mut rig.toolkit, Some(vec![utf8]));
		assert!(!rig.ctx.busy);

		rig.request(12);
		assert!(rig.ctx.busy);
		rig.ctx.data_reply(&mut rig.toolkit, Reply::Data(b"x\0".to_vec()));
		assert!(!rig.ctx.busy);
		assert_eq!(rig.frontend.completions.lock().len(), 1);
	}
}
