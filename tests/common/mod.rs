//! Builds small single-package install trees for the end-to-end tests.

use std::fs;
use std::path::Path;

use flate2::Compression;
use patchforge::delta;
use patchforge::fileref::{FileHash, FileRef};
use patchforge::xml::Document;

pub const PKG_DIR: &str = "coolpkg/1.0";
pub const DESC_REL: &str = "coolpkg/1.0/coolpkg.xml";

pub fn hash_of(bytes: &[u8]) -> String {
	FileHash::of_bytes(bytes).to_string()
}

/// Compress `payload` into `dir/name` and return the compressed file's
/// (size, hash) for descriptor attributes.
pub fn write_compressed(dir: &Path, name: &str, payload: &[u8]) -> (u64, String) {
	let plain = dir.join(format!("{}.plain", name));
	fs::write(&plain, payload).unwrap();
	delta::compress_file(&plain, &dir.join(name), Compression::best()).unwrap();
	fs::remove_file(&plain).unwrap();
	let file_ref = FileRef::from_file(dir, name).unwrap();
	(file_ref.size, file_ref.hash.to_string())
}

/// An install tree the way the packager leaves it before the very first
/// patch run: manifest, descriptor, import descriptor and the published
/// compressed archive. No base, no top, no patches yet.
pub fn seed_tree(root: &Path, payload: &[u8]) {
	let pkg = root.join(PKG_DIR);
	fs::create_dir_all(&pkg).unwrap();
	let (compressed_size, compressed_hash) = write_compressed(&pkg, "coolpkg.mf.1.pz", payload);

	fs::write(
		root.join(DESC_REL),
		format!(
			r#"<package name="coolpkg" platform="linux_amd64" version="1.0" seq="1">
  <uncompressed_archive filename="coolpkg.mf" size="{size}" hash="{hash}" />
  <compressed_archive filename="coolpkg.mf.1.pz" size="{csize}" hash="{chash}" />
</package>"#,
			size = payload.len(),
			hash = hash_of(payload),
			csize = compressed_size,
			chash = compressed_hash,
		),
	)
	.unwrap();

	fs::write(
		pkg.join("coolpkg.import.xml"),
		r#"<package name="coolpkg" platform="linux_amd64" version="1.0" seq="1" />"#,
	)
	.unwrap();

	fs::write(
		root.join("contents.xml"),
		format!(
			r#"<contents seq="1">
  <package name="coolpkg" platform="linux_amd64" version="1.0" filename="{desc}">
    <import filename="coolpkg/1.0/coolpkg.import.xml" />
  </package>
</contents>"#,
			desc = DESC_REL,
		),
	)
	.unwrap();
}

/// Simulate the packager authoring a new current version on top of an
/// already-published descriptor: the uncompressed and compressed archive
/// records move to the new payload and `patch_version` becomes
/// `last_patch_version`.
pub fn stage_new_version(root: &Path, payload: &[u8]) {
	let pkg = root.join(PKG_DIR);
	let (compressed_size, compressed_hash) = write_compressed(&pkg, "coolpkg.mf.pz", payload);

	let mut doc = Document::load(&root.join(DESC_REL)).unwrap();
	let last = doc.root.attr("patch_version").expect("tree was published before").to_owned();
	doc.root.remove_attr("patch_version");
	doc.root.set_attr("last_patch_version", last);

	let xarchive = doc.root.child_mut("uncompressed_archive").unwrap();
	xarchive.set_attr("size", payload.len().to_string());
	xarchive.set_attr("hash", hash_of(payload));

	let xcompressed = doc.root.child_mut("compressed_archive").unwrap();
	xcompressed.set_attr("filename", "coolpkg.mf.pz");
	xcompressed.set_attr("size", compressed_size.to_string());
	xcompressed.set_attr("hash", compressed_hash);

	doc.save().unwrap();
}
