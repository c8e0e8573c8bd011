/*
SPDX-License-Identifier: Apache-2.0 OR MIT

Copyright 2026 The clipbridge contributors

The project to which this file belongs is licensed under either of
the Apache 2.0 or the MIT license at the licensee's choice. The terms
and conditions of the chosen license apply to this file.
*/

//! A bidirectional clipboard bridge between a host-side VM clipboard
//! channel and the X Window System selections.
//!
//! The two clipboard worlds have opposite shapes. X11 selections are
//! request-driven: the owner advertises targets and peers pull the
//! encoding they want, one conversion at a time. The host channel is
//! announcement-driven: an owner declares the formats it holds and
//! answers asynchronous content requests with a completion callback.
//! The bridge translates between the two, including between the text
//! conventions on each side (UTF-16 code units with CRLF endings and
//! a terminating NUL on the host; UTF-8, compound text or Latin-1
//! with LF endings on X11).
//!
//! The upstream service implements [`Frontend`] and drives the bridge:
//!
//! ```no_run
//! use std::sync::Arc;
//! use clipbridge::{host_format, Bridge, Cookie, Frontend, Result};
//!
//! struct Service;
//!
//! impl Frontend for Service {
//! 	fn host_clipboard_data(&self, _format: u32) -> Result<Vec<u8>> {
//! 		// UTF-16 code units of "hi\0", native byte order.
//! 		Ok(vec![0x68, 0, 0x69, 0, 0, 0])
//! 	}
//! 	fn report_formats(&self, formats: u32) {
//! 		println!("X11 now offers {formats:#x}");
//! 	}
//! 	fn complete_request(&self, cookie: Cookie, result: Result<Vec<u8>>) {
//! 		println!("request {cookie:?} finished: {result:?}");
//! 	}
//! }
//!
//! fn main() -> Result<()> {
//! 	let headless = std::env::var_os("DISPLAY").is_none();
//! 	let mut bridge = Bridge::new(Arc::new(Service), headless);
//! 	bridge.start(false)?;
//! 	bridge.announce_formats(host_format::UNICODE_TEXT);
//! 	bridge.request_data(host_format::UNICODE_TEXT, Cookie(1))?;
//! 	bridge.stop()
//! }
//! ```

mod bridge;
mod ctext;
mod error;
mod format;
mod registry;
mod text;
mod x11;

pub use bridge::{Bridge, Cookie, Frontend};
pub use error::{Error, Result};
pub use format::{host_format, ClipFormat};
