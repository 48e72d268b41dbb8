use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while reading an install tree or
/// authoring patches against it.
#[derive(Debug, Error)]
pub enum Error {
	/// The top-level contents.xml is missing or malformed. Fatal, nothing
	/// has been written yet.
	#[error("couldn't read manifest {}", .0.display())]
	ManifestUnreadable(PathBuf),
	/// A single package descriptor failed to parse. The package is skipped,
	/// the session continues.
	#[error("couldn't read package descriptor {}: {source}", .path.display())]
	DescriptorUnreadable {
		path: PathBuf,
		#[source]
		source: Box<Error>,
	},
	/// No anchored archive file is reachable in the patch graph for the
	/// requested version.
	#[error("no archive on disk can produce {0}")]
	MissingSource(String),
	/// The binary delta oracle failed while authoring a patch.
	#[error("building patch {} failed", .0.display())]
	DeltaBuildFailure(PathBuf),
	/// Compressing a freshly authored artifact failed. Half-authored
	/// patches are never committed to the descriptor.
	#[error("compressing {} failed", .0.display())]
	CompressFailure(PathBuf),
	/// Applying an existing patchfile failed while re-creating an archive.
	#[error("applying patch {} failed: {reason}", .path.display())]
	ApplyFailure { path: PathBuf, reason: String },
	/// Patches pinned to a foreign host can't be wired into the graph yet.
	#[error("cross-host patching is not supported (host {0})")]
	ForeignHost(String),
	#[error("malformed xml: {0}")]
	XmlRead(#[from] xml::reader::Error),
	#[error("couldn't write xml: {0}")]
	XmlWrite(#[from] xml::writer::Error),
	#[error(transparent)]
	Io(#[from] io::Error),
}

impl Error {
	pub(crate) fn desc(path: PathBuf, source: Error) -> Error {
		Error::DescriptorUnreadable { path, source: Box::new(source) }
	}
}
