//! The registry of clipboard formats the bridge understands: X11
//! target-atom names on one side, host format bits on the other, and
//! the preference order used to pick the best text representation.

use x11rb::protocol::xproto::Atom;

use crate::x11::Toolkit;

/// Format bits of the host clipboard channel.
pub mod host_format {
	/// Plain Unicode text (UTF-16 code units, CRLF line endings).
	pub const UNICODE_TEXT: u32 = 0x01;
	/// Bitmap image data. Tracked in the negotiation tables but never
	/// chosen yet.
	pub const BITMAP: u32 = 0x02;
	/// HTML fragment.
	pub const HTML: u32 = 0x04;
}

/// The kinds of X11 target the bridge can convert.
///
/// The variant order doubles as the preference order: when several
/// targets are on offer, the highest one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClipFormat {
	Invalid,
	Targets,
	/// `STRING` / `TEXT` / `text/plain`. Treated as UTF-8, but may
	/// really be Latin-1; the transcoder falls back when validation
	/// fails.
	Text,
	/// ISO compound text.
	CText,
	Utf8,
}

/// One row of the format table.
pub(crate) struct FormatEntry {
	pub atom_name: &'static str,
	pub format: ClipFormat,
	pub host_mask: u32,
}

/// All X11 targets the bridge knows, several names per format. Lookup
/// by atom yields at most one row; lookup by host mask enumerates all
/// matching rows.
pub(crate) const TABLE: &[FormatEntry] = &[
	FormatEntry { atom_name: "INVALID", format: ClipFormat::Invalid, host_mask: 0 },
	FormatEntry {
		atom_name: "UTF8_STRING",
		format: ClipFormat::Utf8,
		host_mask: host_format::UNICODE_TEXT,
	},
	FormatEntry {
		atom_name: "text/plain;charset=UTF-8",
		format: ClipFormat::Utf8,
		host_mask: host_format::UNICODE_TEXT,
	},
	FormatEntry {
		atom_name: "text/plain;charset=utf-8",
		format: ClipFormat::Utf8,
		host_mask: host_format::UNICODE_TEXT,
	},
	FormatEntry {
		atom_name: "STRING",
		format: ClipFormat::Text,
		host_mask: host_format::UNICODE_TEXT,
	},
	FormatEntry { atom_name: "TEXT", format: ClipFormat::Text, host_mask: host_format::UNICODE_TEXT },
	FormatEntry {
		atom_name: "text/plain",
		format: ClipFormat::Text,
		host_mask: host_format::UNICODE_TEXT,
	},
	FormatEntry {
		atom_name: "COMPOUND_TEXT",
		format: ClipFormat::CText,
		host_mask: host_format::UNICODE_TEXT,
	},
];

/// The format tag of a table row.
pub(crate) fn tag_of(index: usize) -> ClipFormat {
	TABLE[index].format
}

/// The host format bits a table row corresponds to.
pub(crate) fn host_mask_of(index: usize) -> u32 {
	TABLE[index].host_mask
}

/// The interned atom of a table row.
pub(crate) fn atom_of(toolkit: &mut dyn Toolkit, index: usize) -> Atom {
	toolkit.atom(TABLE[index].atom_name)
}

/// Look up the table row whose atom matches. Linear scan; the table is
/// small and the atoms are cached by the toolkit.
pub(crate) fn find_by_atom(toolkit: &mut dyn Toolkit, atom: Atom) -> Option<usize> {
	(0..TABLE.len()).find(|&i| atom_of(toolkit, i) == atom)
}

/// Enumerate table rows whose host bits intersect `host_mask`,
/// starting strictly after `last`. Used to assemble the TARGETS reply.
pub(crate) fn enumerate(host_mask: u32, last: Option<usize>) -> Option<usize> {
	let start = last.map_or(0, |i| i + 1);
	(start..TABLE.len()).find(|&i| TABLE[i].host_mask & host_mask != 0)
}

/// Scan a TARGETS list and pick the text target we like best. Utf8
/// beats compound text beats plain text; unknown atoms are skipped.
pub(crate) fn best_text_format(toolkit: &mut dyn Toolkit, atoms: &[Atom]) -> Option<usize> {
	let mut best = None;
	let mut best_tag = ClipFormat::Invalid;
	for &atom in atoms {
		if let Some(index) = find_by_atom(toolkit, atom) {
			if TABLE[index].host_mask & host_format::UNICODE_TEXT != 0 && tag_of(index) > best_tag {
				best_tag = tag_of(index);
				best = Some(index);
			}
		}
	}
	best
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::x11::testkit::FakeToolkit;

	#[test]
	fn preference_order() {
		assert!(ClipFormat::Utf8 > ClipFormat::CText);
		assert!(ClipFormat::CText > ClipFormat::Text);
		assert!(ClipFormat::Text > ClipFormat::Invalid);
	}

	#[test]
	fn best_text_prefers_utf8_over_compound() {
		let mut tk = FakeToolkit::new();
		let targets = [tk.atom("UTF8_STRING"), tk.atom("text/plain"), tk.atom("COMPOUND_TEXT")];
		let best = best_text_format(&mut tk, &targets).unwrap();
		assert_eq!(tag_of(best), ClipFormat::Utf8);
	}

	#[test]
	fn best_text_prefers_compound_over_plain() {
		let mut tk = FakeToolkit::new();
		let targets = [tk.atom("COMPOUND_TEXT"), tk.atom("text/plain"), tk.atom("TARGETS")];
		let best = best_text_format(&mut tk, &targets).unwrap();
		assert_eq!(tag_of(best), ClipFormat::CText);
	}

	#[test]
	fn best_text_ignores_unknown_targets() {
		let mut tk = FakeToolkit::new();
		let targets = [tk.atom("STRING_FOO"), tk.atom("image/png")];
		assert_eq!(best_text_format(&mut tk, &targets), None);
	}

	#[test]
	fn enumerate_walks_all_text_rows() {
		let mut seen = Vec::new();
		let mut last = None;
		while let Some(i) = enumerate(host_format::UNICODE_TEXT, last) {
			seen.push(TABLE[i].atom_name);
			last = Some(i);
		}
		assert_eq!(
			seen,
			[
				"UTF8_STRING",
				"text/plain;charset=UTF-8",
				"text/plain;charset=utf-8",
				"STRING",
				"TEXT",
				"text/plain",
				"COMPOUND_TEXT",
			]
		);
	}

	#[test]
	fn enumerate_with_no_match_is_empty() {
		assert_eq!(enumerate(host_format::BITMAP, None), None);
	}

	#[test]
	fn find_by_atom_is_exact() {
		let mut tk = FakeToolkit::new();
		let atom = tk.atom("text/plain;charset=UTF-8");
		let index = find_by_atom(&mut tk, atom).unwrap();
		assert_eq!(TABLE[index].atom_name, "text/plain;charset=UTF-8");
		let unknown = tk.atom("application/x-unknown");
		assert_eq!(find_by_atom(&mut tk, unknown), None);
	}
}
