use std::{
	fs,
	io,
	path::{Path, PathBuf},
};

use log::warn;
use petgraph::stable_graph::NodeIndex;

use crate::error::{Error, Result};
use crate::fileref::FileRef;
use crate::graph::NodeKey;
use crate::xml::{Document, Element, SeqValue};

/// Identifies a package family. `host_url` stays the sentinel (absent)
/// until cross-host patching is specified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageCoord {
	pub name: String,
	pub platform: Option<String>,
	pub version: Option<String>,
	pub host_url: Option<String>,
}

/// A single patchfile: the directed edge from one archive version to the
/// next, backed by a `.patch.pz` artifact in the owning package's directory.
#[derive(Debug, Clone)]
pub struct Patchfile {
	/// Index of the package whose descriptor declares this patch; the
	/// artifact lives in that package's directory.
	pub package: usize,
	pub coord: PackageCoord,
	/// The patch artifact itself.
	pub file: FileRef,
	/// The archive this patch applies to.
	pub source: FileRef,
	/// The archive this patch produces.
	pub target: FileRef,
}

impl Patchfile {
	/// Read a `<patch>` element. Attributes override the owning package's
	/// coordinates where present.
	pub fn load_xml(package: usize, package_coord: &PackageCoord, element: &Element) -> Result<Patchfile> {
		let mut coord = package_coord.clone();
		if let Some(name) = element.attr("name") {
			coord.name = name.to_owned();
		}
		if let Some(platform) = element.attr("platform") {
			coord.platform = Some(platform.to_owned());
		}
		if let Some(version) = element.attr("version") {
			coord.version = Some(version.to_owned());
		}
		if let Some(host) = element.attr("host") {
			return Err(Error::ForeignHost(host.to_owned()));
		}

		let file = FileRef::load_xml(element)?;
		let source = element
			.child("source")
			.map(FileRef::load_xml)
			.transpose()?
			.ok_or_else(|| bad_data("<patch> is missing its <source>"))?;
		let target = element
			.child("target")
			.map(FileRef::load_xml)
			.transpose()?
			.ok_or_else(|| bad_data("<patch> is missing its <target>"))?;

		Ok(Patchfile { package, coord, file, source, target })
	}

	/// Initialize an edge from a freshly authored artifact on disk.
	pub fn from_file(
		package: usize,
		coord: PackageCoord,
		dir: &Path,
		patch_name: &str,
		source: FileRef,
		target: FileRef,
	) -> Result<Patchfile> {
		let file = FileRef::from_file(dir, patch_name)?;
		Ok(Patchfile { package, coord, file, source, target })
	}

	/// Emit a `<patch>` element, writing only coordinates that differ from
	/// the owning package's.
	pub fn make_xml(&self, package_coord: &PackageCoord) -> Element {
		let mut xpatch = Element::new("patch");
		if self.coord.name != package_coord.name {
			xpatch.set_attr("name", self.coord.name.as_str());
		}
		if self.coord.platform != package_coord.platform {
			if let Some(platform) = &self.coord.platform {
				xpatch.set_attr("platform", platform.as_str());
			}
		}
		if self.coord.version != package_coord.version {
			if let Some(version) = &self.coord.version {
				xpatch.set_attr("version", version.as_str());
			}
		}
		self.file.store_xml(&mut xpatch);

		let mut xsource = Element::new("source");
		self.source.store_mini_xml(&mut xsource);
		xpatch.push(xsource);

		let mut xtarget = Element::new("target");
		self.target.store_mini_xml(&mut xtarget);
		xpatch.push(xtarget);

		xpatch
	}

	pub fn source_key(&self) -> NodeKey {
		NodeKey { coord: self.coord.clone(), hash: self.source.hash }
	}

	pub fn target_key(&self) -> NodeKey {
		NodeKey { coord: self.coord.clone(), hash: self.target.hash }
	}
}

/// One loaded package descriptor, with everything needed to rewrite it.
#[derive(Debug)]
pub struct Package {
	pub index: usize,
	/// Descriptor path as named in the manifest, relative to the install dir.
	pub desc_rel: String,
	/// Position of our `<package>` element among the manifest root's
	/// children, when loaded through it.
	pub manifest_index: Option<usize>,
	pub package_dir: PathBuf,
	pub coord: PackageCoord,
	/// The uncompressed newest authored archive.
	pub current: FileRef,
	/// The oldest archive retained on disk; anchors the patch chain. Stored
	/// compressed under `<filename>.pz`, hashed uncompressed.
	pub base: FileRef,
	/// The previously published newest archive.
	pub top: FileRef,
	pub compressed_filename: Option<String>,
	pub patch_version: u32,
	pub patches: Vec<Patchfile>,
	pub dirty: bool,
	doc: Document,
	pub current_node: Option<NodeIndex>,
	pub base_node: Option<NodeIndex>,
	pub top_node: Option<NodeIndex>,
}

impl Package {
	/// Read a package descriptor. With `do_processing` the on-disk tree may
	/// be massaged in preparation for building patches (cache-busting rename
	/// of the published archive, bootstrap copy of the base); without it the
	/// tree is never touched.
	pub fn read(
		install_dir: &Path,
		desc_rel: &str,
		manifest_index: Option<usize>,
		index: usize,
		do_processing: bool,
	) -> Result<Package> {
		let desc_path = install_dir.join(desc_rel);
		Package::read_inner(install_dir, desc_rel, manifest_index, index, do_processing)
			.map_err(|e| Error::desc(desc_path, e))
	}

	fn read_inner(
		install_dir: &Path,
		desc_rel: &str,
		manifest_index: Option<usize>,
		index: usize,
		do_processing: bool,
	) -> Result<Package> {
		let desc_path = install_dir.join(desc_rel);
		let package_dir = match Path::new(desc_rel).parent() {
			Some(parent) => install_dir.join(parent),
			None => install_dir.to_owned(),
		};
		let mut doc = Document::load(&desc_path)?;
		if doc.root.name != "package" {
			return Err(bad_data("descriptor root is not <package>"));
		}

		let coord = PackageCoord {
			name: doc
				.root
				.attr("name")
				.ok_or_else(|| bad_data("<package> carries no name"))?
				.to_owned(),
			platform: doc.root.attr("platform").map(str::to_owned),
			version: doc.root.attr("version").map(str::to_owned),
			host_url: None,
		};

		let mut dirty = false;

		let current = doc
			.root
			.child("uncompressed_archive")
			.map(FileRef::load_xml)
			.transpose()?
			.ok_or_else(|| bad_data("descriptor has no <uncompressed_archive>"))?;

		// Assume there is a new version this pass until the recorded top
		// proves otherwise.
		let mut is_new_version = true;
		let top = match doc.root.child("top_version") {
			Some(xtop) => {
				let top = FileRef::load_xml(xtop)?;
				if top.hash == current.hash {
					is_new_version = false;
				} else {
					dirty = true;
				}
				top
			},
			None => {
				dirty = true;
				current.clone()
			},
		};

		// `patch_version` refers to this particular instance of the archive.
		// `last_patch_version` means no patch has been built for it yet and
		// names the previous instance's number.
		let mut patch_version = 1;
		match doc.root.attr("patch_version") {
			Some(text) => {
				patch_version = parse_version(text)?;
			},
			None => {
				if let Some(text) = doc.root.attr("last_patch_version") {
					patch_version = parse_version(text)?;
					if is_new_version {
						patch_version += 1;
					}
				}
				dirty = true;
			},
		}

		// The published archive embeds the patch version in its name so its
		// URL changes with every publication.
		let mut compressed_filename = None;
		if let Some(xcompressed) = doc.root.child_mut("compressed_archive") {
			let loaded = FileRef::load_xml(xcompressed)?;
			compressed_filename = Some(loaded.filename.clone());
			if do_processing {
				let wanted = format!("{}.{}.pz", current.filename, patch_version);
				if wanted != loaded.filename {
					fs::rename(package_dir.join(&loaded.filename), package_dir.join(&wanted))?;
					let renamed = FileRef::from_file(&package_dir, &wanted)?;
					renamed.store_xml(xcompressed);
					compressed_filename = Some(wanted);
					dirty = true;
				}
			}
		}

		let base = match doc.root.child("base_version") {
			Some(xbase) => FileRef::load_xml(xbase)?,
			None => {
				// First publication: the current archive becomes the base.
				// Only the compressed form is kept on disk, but the recorded
				// hash is of the uncompressed bytes; the stored filename
				// omits the `.pz` suffix to signal this.
				let mut base = current.clone();
				base.filename.push_str(".base");
				if do_processing {
					if let Some(compressed) = &compressed_filename {
						fs::copy(
							package_dir.join(compressed),
							package_dir.join(format!("{}.pz", base.filename)),
						)?;
					}
				}
				dirty = true;
				base
			},
		};

		let mut patches = Vec::new();
		for xpatch in doc.root.children_named("patch") {
			patches.push(Patchfile::load_xml(index, &coord, xpatch)?);
		}

		Ok(Package {
			index,
			desc_rel: desc_rel.to_owned(),
			manifest_index,
			package_dir,
			coord,
			current,
			base,
			top,
			compressed_filename,
			patch_version,
			patches,
			dirty,
			doc,
			current_node: None,
			base_node: None,
			top_node: None,
		})
	}

	pub fn is_new_version(&self) -> bool {
		self.top.hash != self.current.hash
	}

	/// The sibling import descriptor's path, relative to the install dir.
	pub fn import_desc_rel(&self) -> String {
		match self.desc_rel.strip_suffix("xml") {
			Some(stem) => format!("{}import.xml", stem),
			None => format!("{}.import.xml", self.desc_rel),
		}
	}

	/// Rewrite the descriptor if anything changed, promoting the current
	/// version to top in storage. Returns the new seq for mirroring into the
	/// manifest, or `None` when nothing needed writing.
	pub fn write_desc(&mut self, install_dir: &Path) -> Result<Option<SeqValue>> {
		if !self.dirty {
			return Ok(None);
		}

		let root = &mut self.doc.root;
		let mut seq = SeqValue::load_xml(root, "seq");
		seq.bump();
		seq.store_xml(root, "seq");

		root.remove_children("base_version");
		root.remove_children("top_version");
		root.remove_children("patch");
		root.remove_attr("last_patch_version");
		root.set_attr("patch_version", self.patch_version.to_string());

		let mut xbase = Element::new("base_version");
		self.base.store_xml(&mut xbase);
		root.push(xbase);

		// The current version is the top version from here on.
		let mut xtop = Element::new("top_version");
		self.current.store_xml(&mut xtop);
		root.push(xtop);

		for patchfile in &self.patches {
			root.push(patchfile.make_xml(&self.coord));
		}

		self.doc.save()?;

		// The import descriptor only mirrors the seq.
		let import_path = install_dir.join(self.import_desc_rel());
		match Document::load(&import_path) {
			Ok(mut import_doc) => {
				seq.store_xml(&mut import_doc.root, "seq");
				import_doc.save()?;
			},
			Err(e) => warn!("couldn't read {}: {}", import_path.display(), e),
		}

		Ok(Some(seq))
	}
}

fn parse_version(text: &str) -> Result<u32> {
	text.parse()
		.map_err(|_| bad_data(&format!("unusable patch version {:?}", text)))
}

fn bad_data(message: impl ToString) -> Error {
	io::Error::new(io::ErrorKind::InvalidData, message.to_string()).into()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fileref::FileHash;

	fn write_tree(dir: &Path, descriptor: &str) {
		fs::create_dir_all(dir.join("pkg/1.0")).unwrap();
		fs::write(dir.join("pkg/1.0/pkg.xml"), descriptor).unwrap();
	}

	fn hash_of(bytes: &[u8]) -> String {
		FileHash::of_bytes(bytes).to_string()
	}

	#[test]
	fn bootstrap_synthesizes_base_and_top() {
		let dir = tempfile::tempdir().unwrap();
		let payload = b"archive v1";
		write_tree(
			dir.path(),
			&format!(
				r#"<package name="pkg" platform="linux" version="1.0" seq="1">
					<uncompressed_archive filename="pkg.mf" size="10" hash="{h}" />
					<compressed_archive filename="pkg.mf.1.pz" size="9" hash="{h}" />
				</package>"#,
				h = hash_of(payload)
			),
		);
		fs::write(dir.path().join("pkg/1.0/pkg.mf.1.pz"), b"compressed stand-in").unwrap();

		let package = Package::read(dir.path(), "pkg/1.0/pkg.xml", None, 0, true).unwrap();

		assert!(package.dirty);
		assert!(!package.is_new_version());
		assert_eq!(package.patch_version, 1);
		assert_eq!(package.base.filename, "pkg.mf.base");
		assert_eq!(package.base.hash, package.current.hash);
		assert!(dir.path().join("pkg/1.0/pkg.mf.base.pz").exists());
	}

	#[test]
	fn unchanged_descriptor_stays_clean() {
		let dir = tempfile::tempdir().unwrap();
		let payload = b"archive v1";
		write_tree(
			dir.path(),
			&format!(
				r#"<package name="pkg" version="1.0" seq="2" patch_version="3">
					<uncompressed_archive filename="pkg.mf" size="10" hash="{h}" />
					<compressed_archive filename="pkg.mf.3.pz" size="9" hash="{h}" />
					<base_version filename="pkg.mf.base" size="10" hash="{h}" />
					<top_version filename="pkg.mf" size="10" hash="{h}" />
				</package>"#,
				h = hash_of(payload)
			),
		);

		let mut package = Package::read(dir.path(), "pkg/1.0/pkg.xml", None, 0, true).unwrap();

		assert!(!package.dirty);
		assert_eq!(package.patch_version, 3);
		// Nothing dirty, nothing written.
		assert!(package.write_desc(dir.path()).unwrap().is_none());
	}

	#[test]
	fn last_patch_version_increments_on_new_version() {
		let dir = tempfile::tempdir().unwrap();
		let v1 = b"archive v1";
		let v2 = b"archive v2";
		write_tree(
			dir.path(),
			&format!(
				r#"<package name="pkg" version="1.0" seq="2" last_patch_version="1">
					<uncompressed_archive filename="pkg.mf" size="10" hash="{new}" />
					<compressed_archive filename="pkg.mf.pz" size="9" hash="{new}" />
					<base_version filename="pkg.mf.base" size="10" hash="{old}" />
					<top_version filename="pkg.mf" size="10" hash="{old}" />
				</package>"#,
				old = hash_of(v1),
				new = hash_of(v2)
			),
		);
		fs::write(dir.path().join("pkg/1.0/pkg.mf.pz"), b"compressed v2").unwrap();

		let package = Package::read(dir.path(), "pkg/1.0/pkg.xml", None, 0, true).unwrap();

		assert!(package.dirty);
		assert!(package.is_new_version());
		assert_eq!(package.patch_version, 2);
		// Cache-busting rename happened on disk and in the record.
		assert_eq!(package.compressed_filename.as_deref(), Some("pkg.mf.2.pz"));
		assert!(dir.path().join("pkg/1.0/pkg.mf.2.pz").exists());
		assert!(!dir.path().join("pkg/1.0/pkg.mf.pz").exists());
	}

	#[test]
	fn query_reads_never_touch_the_tree() {
		let dir = tempfile::tempdir().unwrap();
		let v1 = b"archive v1";
		let v2 = b"archive v2";
		write_tree(
			dir.path(),
			&format!(
				r#"<package name="pkg" version="1.0" seq="2" last_patch_version="1">
					<uncompressed_archive filename="pkg.mf" size="10" hash="{new}" />
					<compressed_archive filename="pkg.mf.pz" size="9" hash="{new}" />
					<top_version filename="pkg.mf" size="10" hash="{old}" />
				</package>"#,
				old = hash_of(v1),
				new = hash_of(v2)
			),
		);
		fs::write(dir.path().join("pkg/1.0/pkg.mf.pz"), b"compressed v2").unwrap();

		let package = Package::read(dir.path(), "pkg/1.0/pkg.xml", None, 0, false).unwrap();

		// Base synthesized in memory only, published archive left alone.
		assert_eq!(package.base.filename, "pkg.mf.base");
		assert!(!dir.path().join("pkg/1.0/pkg.mf.base.pz").exists());
		assert!(dir.path().join("pkg/1.0/pkg.mf.pz").exists());
	}

	#[test]
	fn rewrite_promotes_current_to_top() {
		let dir = tempfile::tempdir().unwrap();
		let v1 = b"archive v1";
		let v2 = b"archive v2";
		write_tree(
			dir.path(),
			&format!(
				r#"<package name="pkg" version="1.0" seq="4" last_patch_version="1">
					<uncompressed_archive filename="pkg.mf" size="10" hash="{new}" />
					<base_version filename="pkg.mf.base" size="10" hash="{old}" />
					<top_version filename="pkg.mf" size="10" hash="{old}" />
				</package>"#,
				old = hash_of(v1),
				new = hash_of(v2)
			),
		);

		let mut package = Package::read(dir.path(), "pkg/1.0/pkg.xml", None, 0, true).unwrap();
		let seq = package.write_desc(dir.path()).unwrap().expect("descriptor was dirty");
		assert_eq!(seq.to_string(), "5");

		let reread = Package::read(dir.path(), "pkg/1.0/pkg.xml", None, 0, false).unwrap();
		assert_eq!(reread.patch_version, 2);
		assert_eq!(reread.top.hash, reread.current.hash);
		assert!(!reread.is_new_version());

		let doc = Document::load(&dir.path().join("pkg/1.0/pkg.xml")).unwrap();
		assert_eq!(doc.root.attr("patch_version"), Some("2"));
		assert_eq!(doc.root.attr("last_patch_version"), None);
	}

	#[test]
	fn foreign_host_patches_are_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let payload = b"archive v1";
		write_tree(
			dir.path(),
			&format!(
				r#"<package name="pkg" version="1.0" seq="1" patch_version="2">
					<uncompressed_archive filename="pkg.mf" size="10" hash="{h}" />
					<base_version filename="pkg.mf.base" size="10" hash="{h}" />
					<top_version filename="pkg.mf" size="10" hash="{h}" />
					<patch filename="pkg.mf.2.patch.pz" size="3" hash="{h}" host="https://elsewhere.example">
						<source size="10" hash="{h}" />
						<target size="10" hash="{h}" />
					</patch>
				</package>"#,
				h = hash_of(payload)
			),
		);

		let err = Package::read(dir.path(), "pkg/1.0/pkg.xml", None, 0, false).unwrap_err();
		assert!(matches!(err, Error::DescriptorUnreadable { .. }));
	}
}
