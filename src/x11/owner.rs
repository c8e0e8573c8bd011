/*
SPDX-License-Identifier: Apache-2.0 OR MIT

Copyright 2026 The clipbridge contributors

The project to which this file belongs is licensed under either of
the Apache 2.0 or the MIT license at the licensee's choice. The terms
and conditions of the chosen license apply to this file.
*/

//! Serving X11 peers while the host advertises clipboard content.
//!
//! Host bytes are fetched once per announcement and cached, so a
//! TARGETS probe followed by several data conversions costs a single
//! round-trip to the host.

use log::trace;
use x11rb::protocol::xproto::{Atom, AtomEnum};

use super::{Context, Toolkit};
use crate::error::{Error, Result};
use crate::format::{self, host_format, ClipFormat};
use crate::{ctext, text};

/// A conversion answer for an X11 peer.
pub(crate) struct PeerReply {
	/// The property type the reply is written under.
	pub type_atom: Atom,
	/// The property format, 8 for text and 32 for atom lists.
	pub format: u8,
	pub data: PeerData,
}

pub(crate) enum PeerData {
	Atoms(Vec<Atom>),
	Bytes(Vec<u8>),
}

impl Context {
	/// The host announced a new set of formats. A non-empty set grabs
	/// both selections; an empty one releases them. Either way the
	/// cache and the view of the X11 side are reset.
	pub(crate) fn announce_formats(&mut self, toolkit: &mut dyn Toolkit, formats: u32) {
		trace!("host announces formats {formats:#x}");
		self.unicode_cache = None;
		self.host_formats = formats;
		let clipboard = toolkit.atom("CLIPBOARD");
		let primary = toolkit.atom("PRIMARY");
		if formats != 0 {
			// Ownership is re-asserted on every announcement, per
			// ICCCM 2.6.1.3.
			if toolkit.own_selection(clipboard) {
				toolkit.own_selection(primary);
			}
		} else {
			toolkit.disown_selection(clipboard);
			toolkit.disown_selection(primary);
		}
		// Owning the selections means holding no observation of the
		// other side.
		self.x11_text_format = None;
		self.x11_bitmap_format = None;
	}

	/// Answer a peer's conversion request. An `Err` refuses the
	/// conversion; the event loop then replies with no property.
	pub(crate) fn convert_for_peer(
		&mut self,
		toolkit: &mut dyn Toolkit,
		selection: Atom,
		target: Atom,
	) -> Result<PeerReply> {
		let clipboard = toolkit.atom("CLIPBOARD");
		let primary = toolkit.atom("PRIMARY");
		if selection != clipboard && selection != primary {
			return Err(Error::NotSupported("conversion for an unrelated selection".into()));
		}
		if target == toolkit.atom("TARGETS") {
			return Ok(self.targets_for_peer(toolkit));
		}
		self.text_for_peer(toolkit, target)
	}

	/// Build the TARGETS reply: every table row matching the announced
	/// host formats, plus the conventional meta targets.
	fn targets_for_peer(&self, toolkit: &mut dyn Toolkit) -> PeerReply {
		let mut atoms = Vec::with_capacity(format::TABLE.len() + 3);
		let mut last = None;
		while let Some(index) = format::enumerate(self.host_formats, last) {
			atoms.push(format::atom_of(toolkit, index));
			last = Some(index);
		}
		// Always advertised; only TARGETS gets a real reply from us.
		atoms.push(toolkit.atom("TARGETS"));
		atoms.push(toolkit.atom("MULTIPLE"));
		atoms.push(toolkit.atom("TIMESTAMP"));
		PeerReply { type_atom: AtomEnum::ATOM.into(), format: 32, data: PeerData::Atoms(atoms) }
	}

	/// Convert the host's text for a peer that asked for a text
	/// target.
	fn text_for_peer(&mut self, toolkit: &mut dyn Toolkit, target: Atom) -> Result<PeerReply> {
		let tag = format::find_by_atom(toolkit, target).map(format::tag_of);
		let is_text = matches!(tag, Some(ClipFormat::Utf8 | ClipFormat::Text | ClipFormat::CText));
		if !is_text || self.host_formats & host_format::UNICODE_TEXT == 0 {
			trace!("refusing conversion to {}", toolkit.atom_name(target));
			return Err(Error::NotSupported("target not on offer".into()));
		}

		let bytes = self.cached_host_text()?;
		if bytes.is_empty() {
			return Err(Error::NoData);
		}
		let units = text::bytes_to_units(&bytes)?;
		let mut utf8 = text::host_utf16_to_utf8(&units)?;

		let (type_atom, mut payload) = match tag {
			Some(ClipFormat::CText) => {
				text::trim_trailing_nul(&mut utf8);
				let encoded = match std::str::from_utf8(&utf8) {
					Ok(s) => ctext::encode(&self.locale, s)?,
					Err(e) => return Err(Error::Unresolved(e.to_string())),
				};
				(toolkit.atom("COMPOUND_TEXT"), encoded)
			}
			_ => (target, utf8),
		};
		text::trim_trailing_nul(&mut payload);
		Ok(PeerReply { type_atom, format: 8, data: PeerData::Bytes(payload) })
	}

	/// The host's Unicode text, fetched on first use after an
	/// announcement and served from the cache afterwards.
	fn cached_host_text(&mut self) -> Result<Vec<u8>> {
		if let Some(cached) = &self.unicode_cache {
			return Ok(cached.clone());
		}
		let bytes = self.frontend.host_clipboard_data(host_format::UNICODE_TEXT)?;
		self.unicode_cache = Some(bytes.clone());
		Ok(bytes)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::super::testkit::{context, FakeFrontend, FakeToolkit};
	use super::*;

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

		fn announce_text(&mut self, text: &str) {
			self.frontend.set_host_text(text);
			self.ctx.announce_formats(&mut self.toolkit, host_format::UNICODE_TEXT);
		}

		fn convert(&mut self, target: &str) -> Result<PeerReply> {
			let selection = self.toolkit.atom("CLIPBOARD");
			let target = self.toolkit.atom(target);
			self.ctx.convert_for_peer(&mut self.toolkit, selection, target)
		}

		fn convert_bytes(&mut self, target: &str) -> (Atom, Vec<u8>) {
			let reply = self.convert(target).unwrap();
			assert_eq!(reply.format, 8);
			match reply.data {
				PeerData::Bytes(bytes) => (reply.type_atom, bytes),
				PeerData::Atoms(_) => panic!("expected a byte reply"),
			}
		}
	}

	#[test]
	fn announcement_grabs_both_selections() {
		let mut rig = Rig::new();
		rig.announce_text("hello");
		assert!(rig.toolkit.owns("CLIPBOARD"));
		assert!(rig.toolkit.owns("PRIMARY"));
		assert_eq!(rig.ctx.x11_text_format, None);
	}

	#[test]
	fn empty_announcement_releases_ownership() {
		let mut rig = Rig::new();
		rig.announce_text("hello");
		rig.ctx.announce_formats(&mut rig.toolkit, 0);
		assert!(!rig.toolkit.owns("CLIPBOARD"));
		assert!(!rig.toolkit.owns("PRIMARY"));

		// And nothing is ever fetched from the host.
		let result = rig.convert("UTF8_STRING");
		assert!(result.is_err());
		assert!(rig.ctx.unicode_cache.is_none());
	}

	#[test]
	fn targets_reply_lists_text_targets_and_meta_targets() {
		let mut rig = Rig::new();
		rig.announce_text("hello");
		let reply = rig.convert("TARGETS").unwrap();
		assert_eq!(reply.format, 32);
		assert_eq!(reply.type_atom, Atom::from(AtomEnum::ATOM));
		let PeerData::Atoms(atoms) = reply.data else { panic!("expected atoms") };
		let names: Vec<String> = atoms.iter().map(|&a| rig.toolkit.atom_name(a)).collect();
		for expected in [
			"UTF8_STRING",
			"text/plain;charset=UTF-8",
			"text/plain;charset=utf-8",
			"STRING",
			"TEXT",
			"text/plain",
			"COMPOUND_TEXT",
			"TARGETS",
			"MULTIPLE",
			"TIMESTAMP",
		] {
			assert!(names.iter().any(|n| n == expected), "missing {expected}");
		}
	}

	#[test]
	fn utf8_conversion_trims_the_terminator() {
		let mut rig = Rig::new();
		rig.announce_text("hello world");
		let (type_atom, bytes) = rig.convert_bytes("UTF8_STRING");
		assert_eq!(type_atom, rig.toolkit.atom("UTF8_STRING"));
		assert_eq!(bytes, b"hello world");
	}

	#[test]
	fn compound_text_conversion_for_ascii() {
		let mut rig = Rig::new();
		rig.announce_text("hello world");
		let (type_atom, bytes) = rig.convert_bytes("COMPOUND_TEXT");
		assert_eq!(type_atom, rig.toolkit.atom("COMPOUND_TEXT"));
		assert_eq!(bytes, b"hello world");
	}

	#[test]
	fn crlf_folds_before_serving() {
		let mut rig = Rig::new();
		rig.announce_text("hello\r\nworld");
		let (_, bytes) = rig.convert_bytes("text/plain;charset=UTF-8");
		assert_eq!(bytes, b"hello\nworld");
	}

	#[test]
	fn unknown_target_is_refused() {
		let mut rig = Rig::new();
		rig.announce_text("hello");
		assert!(rig.convert("image/png").is_err());
		assert!(rig.convert("MULTIPLE").is_err());
		assert!(rig.convert("TIMESTAMP").is_err());
	}

	#[test]
	fn unrelated_selection_is_refused() {
		let mut rig = Rig::new();
		rig.announce_text("hello");
		let selection = rig.toolkit.atom("SECONDARY");
		let target = rig.toolkit.atom("UTF8_STRING");
		assert!(rig.ctx.convert_for_peer(&mut rig.toolkit, selection, target).is_err());
	}

	#[test]
	fn empty_host_text_yields_no_data() {
		let mut rig = Rig::new();
		rig.frontend.set_host_text("");
		rig.ctx.announce_formats(&mut rig.toolkit, host_format::UNICODE_TEXT);
		// A bare terminator still converts to an empty string.
		let (_, bytes) = rig.convert_bytes("UTF8_STRING");
		assert_eq!(bytes, b"");

		// Truly zero bytes from the host refuse the conversion.
		*rig.frontend.host_data.lock() = Ok(Vec::new());
		rig.ctx.announce_formats(&mut rig.toolkit, host_format::UNICODE_TEXT);
		assert!(matches!(rig.convert("UTF8_STRING"), Err(Error::NoData)));
	}

	#[test]
	fn host_fetch_happens_once_per_announcement() {
		let mut rig = Rig::new();
		rig.announce_text("cached");
		let _ = rig.convert_bytes("UTF8_STRING");
		// Change what the host would answer; the cache must mask it.
		rig.frontend.set_host_text("changed");
		let (_, bytes) = rig.convert_bytes("STRING");
		assert_eq!(bytes, b"cached");

		// A new announcement invalidates the cache.
		rig.ctx.announce_formats(&mut rig.toolkit, host_format::UNICODE_TEXT);
		let (_, bytes) = rig.convert_bytes("UTF8_STRING");
		assert_eq!(bytes, b"changed");
	}
}
