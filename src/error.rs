use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error kinds the bridge distinguishes.
///
/// `Timeout` and `NoData` are deliberately separate: an empty selection
/// is an ordinary answer, a peer that never replied is not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	/// The selection is empty, or the chosen target returned no content.
	#[error("no data available in the requested format")]
	NoData,

	/// The peer did not answer the conversion in time.
	#[error("the selection transfer timed out")]
	Timeout,

	/// Another selection transfer is still in flight. The caller may
	/// retry after a short delay; the bridge keeps no internal queue.
	#[error("a selection transfer is already in progress")]
	TryAgain,

	/// The requested host format has no conversion yet. Only Unicode
	/// text is currently implemented.
	#[error("the requested format is not implemented")]
	NotImplemented,

	/// The X server is unreachable, the XFIXES extension is missing,
	/// or the locale cannot represent the data.
	#[error("not supported: {0}")]
	NotSupported(String),

	/// A fixed resource pool or allocation was exhausted.
	#[error("out of memory")]
	OutOfMemory,

	/// An encoding conversion failed for reasons not otherwise
	/// classified.
	#[error("conversion failed: {0}")]
	Unresolved(String),
}
