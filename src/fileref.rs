use std::{
	fmt,
	fs::File,
	io::{self, Read},
	path::Path,
};

use crate::error::Result;
use crate::xml::Element;

/// Identity of an archive's bytes. Two files are the same version iff
/// their hashes match; names and sizes are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHash([u8; 16]);

impl FileHash {
	pub fn of_bytes(bytes: &[u8]) -> FileHash {
		FileHash(*md5::compute(bytes))
	}

	pub fn of_file(path: &Path) -> io::Result<FileHash> {
		let mut file = File::open(path)?;
		let mut context = md5::Context::new();
		let mut buffer = [0u8; 64 * 1024];
		loop {
			let read = file.read(&mut buffer)?;
			if read == 0 {
				break;
			}
			context.consume(&buffer[..read]);
		}
		Ok(FileHash(*context.compute()))
	}

	pub fn from_hex(text: &str) -> Option<FileHash> {
		let bytes = hex::decode(text).ok()?;
		if bytes.len() != 16 {
			return None;
		}
		let mut hash = [0u8; 16];
		hash.copy_from_slice(&bytes);
		Some(FileHash(hash))
	}

	/// Shortened form for log lines.
	pub fn brief(&self) -> String {
		hex::encode(&self.0[..4])
	}
}

impl fmt::Display for FileHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(self.0))
	}
}

/// A by-hash reference to a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
	pub filename: String,
	pub size: u64,
	pub hash: FileHash,
}

impl FileRef {
	/// Read a reference from an element's attributes. The `filename` may be
	/// absent (the mini form used for `<source>`/`<target>` children); the
	/// hash never is.
	pub fn load_xml(element: &Element) -> Result<FileRef> {
		let hash = element
			.attr("hash")
			.and_then(FileHash::from_hex)
			.ok_or_else(|| bad_data(format!("<{}> carries no usable hash", element.name)))?;
		Ok(FileRef {
			filename: element.attr("filename").unwrap_or("").to_owned(),
			size: element.attr("size").and_then(|s| s.parse().ok()).unwrap_or(0),
			hash,
		})
	}

	/// Recompute size and hash from the file at `dir/name`.
	pub fn from_file(dir: &Path, name: &str) -> Result<FileRef> {
		let path = dir.join(name);
		let size = path.metadata()?.len();
		let hash = FileHash::of_file(&path)?;
		Ok(FileRef { filename: name.to_owned(), size, hash })
	}

	pub fn store_xml(&self, element: &mut Element) {
		element.set_attr("filename", self.filename.as_str());
		self.store_mini_xml(element);
	}

	/// The reduced attribute set, for contexts where the filename is implied.
	pub fn store_mini_xml(&self, element: &mut Element) {
		element.set_attr("size", self.size.to_string());
		element.set_attr("hash", self.hash.to_string());
	}
}

fn bad_data(message: String) -> crate::Error {
	io::Error::new(io::ErrorKind::InvalidData, message).into()
}
