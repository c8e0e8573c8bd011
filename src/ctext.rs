//! ISO 2022 compound text, the encoding X11 historically used to
//! carry multi-script selections.
//!
//! The default designations of compound text are ASCII in GL and the
//! Latin-1 right half in GR, so Latin-1 strings encode byte for byte.
//! Anything beyond Latin-1 travels in UTF-8 extension segments
//! (`ESC % G` … `ESC % @`).
//!
//! Encoding consults the locale the bridge captured when it started;
//! later changes to the process environment are not observed.

use std::env;

use crate::error::{Error, Result};

const ESC: u8 = 0x1B;

/// The character repertoire of the captured locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codeset {
	/// "C"/"POSIX" or an unrecognised codeset: ASCII only.
	Ascii,
	/// An ISO 8859-1 locale.
	Latin1,
	/// A UTF-8 locale: the full repertoire is representable.
	Utf8,
}

/// Locale snapshot taken once at bridge start.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Locale {
	codeset: Codeset,
}

impl Locale {
	/// Capture the locale from the environment, honouring the usual
	/// precedence of `LC_ALL` over `LC_CTYPE` over `LANG`.
	pub(crate) fn capture() -> Self {
		let spec = env::var("LC_ALL")
			.or_else(|_| env::var("LC_CTYPE"))
			.or_else(|_| env::var("LANG"))
			.ok();
		Self::from_spec(spec.as_deref())
	}

	fn from_spec(spec: Option<&str>) -> Self {
		let codeset = match spec {
			None => Codeset::Ascii,
			Some(spec) => {
				let codeset = spec.split('.').nth(1).unwrap_or(spec).split('@').next().unwrap_or("");
				let normalized: String =
					codeset.chars().filter(|c| *c != '-' && *c != '_').collect::<String>().to_ascii_lowercase();
				match normalized.as_str() {
					"utf8" => Codeset::Utf8,
					"iso88591" | "latin1" => Codeset::Latin1,
					_ => Codeset::Ascii,
				}
			}
		};
		Self { codeset }
	}

	fn representable(&self, c: char) -> bool {
		match self.codeset {
			Codeset::Ascii => c.is_ascii(),
			Codeset::Latin1 => (c as u32) <= 0xFF,
			Codeset::Utf8 => true,
		}
	}
}

/// Encode UTF-8 text as compound text. Fails with `NotSupported` when
/// the captured locale cannot represent a character, matching what the
/// locale-based conversion of the original X libraries reports.
pub(crate) fn encode(locale: &Locale, text: &str) -> Result<Vec<u8>> {
	let mut out = Vec::with_capacity(text.len());
	let mut utf8_run = String::new();
	for c in text.chars() {
		if !locale.representable(c) {
			return Err(Error::NotSupported(format!(
				"locale cannot represent U+{:04X}",
				c as u32
			)));
		}
		if (c as u32) <= 0xFF {
			flush_utf8_run(&mut out, &mut utf8_run);
			out.push(c as u8);
		} else {
			utf8_run.push(c);
		}
	}
	flush_utf8_run(&mut out, &mut utf8_run);
	Ok(out)
}

fn flush_utf8_run(out: &mut Vec<u8>, run: &mut String) {
	if !run.is_empty() {
		out.extend_from_slice(&[ESC, b'%', b'G']);
		out.extend_from_slice(run.as_bytes());
		out.extend_from_slice(&[ESC, b'%', b'@']);
		run.clear();
	}
}

/// Decode compound text to a string. Unknown charset designations map
/// to `NotSupported` (no converter), malformed sequences to
/// `Unresolved`.
pub(crate) fn decode(bytes: &[u8]) -> Result<String> {
	let mut out = String::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		let b = bytes[i];
		if b != ESC {
			out.push(b as char);
			i += 1;
			continue;
		}
		let rest = &bytes[i + 1..];
		match rest {
			[b'%', b'G', ..] => {
				i += 3;
				let run_start = i;
				while i < bytes.len() && bytes[i] != ESC {
					i += 1;
				}
				let run = std::str::from_utf8(&bytes[run_start..i])
					.map_err(|e| Error::Unresolved(format!("invalid UTF-8 segment: {e}")))?;
				out.push_str(run);
				if i < bytes.len() {
					// Expect the segment terminator ESC % @.
					if bytes.len() < i + 3 || bytes[i + 1] != b'%' || bytes[i + 2] != b'@' {
						return Err(Error::Unresolved("unterminated UTF-8 segment".into()));
					}
					i += 3;
				}
			}
			// The default designations, re-announced: ASCII (or the
			// near-identical JIS roman) into G0, Latin-1 right into G1.
			[b'(', b'B', ..] | [b'(', b'J', ..] | [b'-', b'A', ..] => i += 3,
			[_, _, ..] => {
				return Err(Error::NotSupported(format!(
					"no converter for designation {:02X} {:02X}",
					rest[0], rest[1]
				)))
			}
			_ => return Err(Error::Unresolved("truncated escape sequence".into())),
		}
	}
	Ok(out)
}
