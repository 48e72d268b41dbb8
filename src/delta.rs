//! Seams to the external oracles: the binary delta engine and the `.pz`
//! stream compressor. Everything here is plain `io::Result`; callers map
//! failures onto the session error kinds.

use std::{
	fs::File,
	io::{self, BufReader, BufWriter, Read, Write},
	path::Path,
};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tempfile::{Builder, TempPath};

/// Build a binary delta turning `orig`'s bytes into `new`'s bytes.
pub fn build(orig: &Path, new: &Path, patch_out: &Path) -> io::Result<()> {
	let older = read_all(orig)?;
	let newer = read_all(new)?;
	let mut out = BufWriter::new(File::create(patch_out)?);
	bidiff::simple_diff(&older, &newer, &mut out)?;
	out.flush()
}

/// Apply a patchfile to `orig`, writing the result to `new_out`. Compressed
/// (`.pz`) patch artifacts are decompressed transparently, which is why
/// descriptors may reference them by their compressed name.
pub fn apply(patch: &Path, orig: &Path, new_out: &Path) -> io::Result<()> {
	let mut out = BufWriter::new(File::create(new_out)?);
	let orig = BufReader::new(File::open(orig)?);
	if patch.extension().map_or(false, |e| e == "pz") {
		let plain = decompress_to_temp(patch)?;
		let mut reader = bipatch::Reader::new(BufReader::new(File::open(&plain)?), orig)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
		io::copy(&mut reader, &mut out)?;
	} else {
		let mut reader = bipatch::Reader::new(BufReader::new(File::open(patch)?), orig)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
		io::copy(&mut reader, &mut out)?;
	}
	out.flush()
}

pub fn compress_file(src: &Path, dst: &Path, level: Compression) -> io::Result<()> {
	let mut encoder = ZlibEncoder::new(BufWriter::new(File::create(dst)?), level);
	io::copy(&mut BufReader::new(File::open(src)?), &mut encoder)?;
	encoder.finish()?.flush()
}

pub fn decompress_file(src: &Path, dst: &Path) -> io::Result<()> {
	let mut decoder = ZlibDecoder::new(BufReader::new(File::open(src)?));
	let mut out = BufWriter::new(File::create(dst)?);
	io::copy(&mut decoder, &mut out)?;
	out.flush()
}

/// Decompress `src` into a fresh session temp file.
pub fn decompress_to_temp(src: &Path) -> io::Result<TempPath> {
	let temp = new_temp()?.into_temp_path();
	decompress_file(src, &temp)?;
	Ok(temp)
}

/// Apply `patch` to `orig`, storing the result in a fresh session temp file.
pub fn apply_to_temp(patch: &Path, orig: &Path) -> io::Result<TempPath> {
	let temp = new_temp()?.into_temp_path();
	apply(patch, orig, &temp)?;
	Ok(temp)
}

fn new_temp() -> io::Result<tempfile::NamedTempFile> {
	Builder::new().prefix("patch_").tempfile()
}

fn read_all(path: &Path) -> io::Result<Vec<u8>> {
	let mut bytes = Vec::new();
	BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
	Ok(bytes)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pz_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let plain = dir.path().join("pkg.mf");
		let packed = dir.path().join("pkg.mf.1.pz");
		let unpacked = dir.path().join("pkg.mf.out");
		std::fs::write(&plain, b"the archive payload, repeated payload payload").unwrap();

		compress_file(&plain, &packed, Compression::best()).unwrap();
		decompress_file(&packed, &unpacked).unwrap();

		assert_eq!(std::fs::read(&plain).unwrap(), std::fs::read(&unpacked).unwrap());
	}

	#[test]
	fn diff_then_apply_reproduces_the_new_file() {
		let dir = tempfile::tempdir().unwrap();
		let v1 = dir.path().join("v1");
		let v2 = dir.path().join("v2");
		let patch = dir.path().join("v2.patch");
		let rebuilt = dir.path().join("rebuilt");
		std::fs::write(&v1, b"alpha beta gamma delta").unwrap();
		std::fs::write(&v2, b"alpha beta GAMMA delta epsilon").unwrap();

		build(&v1, &v2, &patch).unwrap();
		apply(&patch, &v1, &rebuilt).unwrap();

		assert_eq!(std::fs::read(&rebuilt).unwrap(), b"alpha beta GAMMA delta epsilon");
	}

	#[test]
	fn compressed_patches_apply_transparently() {
		let dir = tempfile::tempdir().unwrap();
		let v1 = dir.path().join("v1");
		let v2 = dir.path().join("v2");
		let patch = dir.path().join("v2.patch");
		let packed = dir.path().join("v2.patch.pz");
		std::fs::write(&v1, b"one two three").unwrap();
		std::fs::write(&v2, b"one two three four").unwrap();

		build(&v1, &v2, &patch).unwrap();
		compress_file(&patch, &packed, Compression::best()).unwrap();

		let rebuilt = apply_to_temp(&packed, &v1).unwrap();
		assert_eq!(std::fs::read(&rebuilt).unwrap(), b"one two three four");
	}
}
