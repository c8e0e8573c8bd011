/*
SPDX-License-Identifier: Apache-2.0 OR MIT

Copyright 2026 The clipbridge contributors

The project to which this file belongs is licensed under either of
the Apache 2.0 or the MIT license at the licensee's choice. The terms
and conditions of the chosen license apply to this file.
*/

//! Pure text transcoding between the host clipboard representation
//! (16-bit code units, CRLF line endings, NUL terminated) and the X11
//! text targets (UTF-8 or Latin-1 bytes with LF line endings).

use crate::error::{Error, Result};

const CARRIAGE_RETURN: u16 = 0x0D;
const LINE_FEED: u16 = 0x0A;

/// Convert bytes from the host channel into 16-bit code units. The
/// host always hands us native-endian UTF-16.
pub(crate) fn bytes_to_units(bytes: &[u8]) -> Result<Vec<u16>> {
	if bytes.len() % 2 != 0 {
		return Err(Error::Unresolved("UTF-16 data must have even length".into()));
	}
	Ok(bytes.chunks_exact(2).map(|c| u16::from_ne_bytes([c[0], c[1]])).collect())
}

/// Convert 16-bit code units back into the byte form the host expects.
pub(crate) fn units_to_bytes(units: &[u16]) -> Vec<u8> {
	units.iter().flat_map(|u| u.to_ne_bytes()).collect()
}

/// Cut the input at its terminator, if one is present. Host text may
/// arrive with or without the trailing NUL; transcoding must behave
/// identically either way.
fn until_nul(units: &[u16]) -> &[u16] {
	let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
	&units[..end]
}

fn bytes_until_nul(bytes: &[u8]) -> &[u8] {
	let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
	&bytes[..end]
}

/// Fold host line endings into Unix ones: every CR immediately
/// followed by LF is dropped. Lone CRs survive, so CRCRLF becomes
/// CRLF and CRLFCR becomes LFCR.
fn fold_crlf(units: &[u16]) -> Vec<u16> {
	let mut out = Vec::with_capacity(units.len());
	let mut i = 0;
	while i < units.len() {
		if units[i] == CARRIAGE_RETURN && units.get(i + 1) == Some(&LINE_FEED) {
			i += 1;
			continue;
		}
		out.push(units[i]);
		i += 1;
	}
	out
}

/// Expand Unix line endings for the host: a CR is inserted before
/// every LF that does not already follow one. Existing CRLF pairs are
/// left intact.
fn expand_lf(units: &[u16]) -> Vec<u16> {
	let mut out = Vec::with_capacity(units.len() + units.len() / 8);
	for &u in units {
		if u == LINE_FEED && out.last() != Some(&CARRIAGE_RETURN) {
			out.push(CARRIAGE_RETURN);
		}
		out.push(u);
	}
	out
}

/// Convert host text to the UTF-8 bytes an X11 peer expects: CRLF
/// folded to LF, NUL terminated. Callers serving X11 peers strip the
/// terminator with [`trim_trailing_nul`].
pub(crate) fn host_utf16_to_utf8(units: &[u16]) -> Result<Vec<u8>> {
	let folded = fold_crlf(until_nul(units));
	let text = String::from_utf16(&folded)
		.map_err(|e| Error::Unresolved(format!("invalid UTF-16 from the host: {e}")))?;
	let mut out = text.into_bytes();
	out.push(0);
	Ok(out)
}

/// Convert text received from an X11 peer into host code units. The
/// input is validated as UTF-8; if validation fails it is decoded as
/// Latin-1 instead, which many older clients still produce under the
/// STRING target.
pub(crate) fn x11_text_to_host_utf16(bytes: &[u8]) -> Result<Vec<u16>> {
	let bytes = bytes_until_nul(bytes);
	match std::str::from_utf8(bytes) {
		Ok(text) => utf8_to_host_utf16(text),
		Err(_) => Ok(latin1_to_host_utf16(bytes)),
	}
}

/// Convert validated UTF-8 into host code units: LF expanded to CRLF,
/// a NUL code unit appended.
pub(crate) fn utf8_to_host_utf16(text: &str) -> Result<Vec<u16>> {
	let units: Vec<u16> = text.encode_utf16().collect();
	let mut out = expand_lf(&units);
	out.push(0);
	Ok(out)
}

/// Decode Latin-1 into host code units; every byte maps to the code
/// point of the same value. LF is expanded and a terminator appended
/// as for UTF-8.
pub(crate) fn latin1_to_host_utf16(bytes: &[u8]) -> Vec<u16> {
	let units: Vec<u16> = bytes_until_nul(bytes).iter().map(|&b| b as u16).collect();
	let mut out = expand_lf(&units);
	out.push(0);
	out
}

/// Drop a single trailing NUL byte. Some X11 applications dislike
/// zero-terminated selection payloads.
pub(crate) fn trim_trailing_nul(bytes: &mut Vec<u8>) {
	if bytes.last() == Some(&0) {
		bytes.pop();
	}
}
