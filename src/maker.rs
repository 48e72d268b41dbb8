use std::{
	collections::HashSet,
	fs,
	path::{Path, PathBuf},
};

use flate2::Compression;
use log::{debug, info, warn};
use petgraph::stable_graph::{DefaultIx, NodeIndex};

use crate::delta;
use crate::error::{Error, Result};
use crate::fileref::FileRef;
use crate::graph::PatchGraph;
use crate::package::{Package, Patchfile};
use crate::xml::{Document, SeqValue};

/// A publication session against one install tree: loads the manifest and
/// every descriptor, builds the patch graph, authors whatever patches the
/// tree is missing and rewrites the documents. One instance, one run.
pub struct PatchMaker {
	install_dir: PathBuf,
	graph: PatchGraph,
	packages: Vec<Package>,
	patch_filenames: HashSet<String>,
	contents: Option<Document>,
}

impl PatchMaker {
	pub fn new(install_dir: impl Into<PathBuf>) -> PatchMaker {
		PatchMaker {
			install_dir: install_dir.into(),
			graph: PatchGraph::default(),
			packages: Vec::new(),
			patch_filenames: HashSet::new(),
			contents: None,
		}
	}

	/// The whole workflow: read, wire, author missing patches (for every
	/// package, or just the named ones), rewrite, clean up.
	pub fn build_patches(&mut self, filter: Option<&[String]>) -> Result<()> {
		self.read_contents()?;
		self.build_patch_graph();
		match filter {
			Some(names) => self.process_some(names)?,
			None => self.process_all()?,
		}
		self.write_contents()?;
		self.shutdown();
		Ok(())
	}

	pub fn packages(&self) -> &[Package] {
		&self.packages
	}

	pub fn graph(&self) -> &PatchGraph {
		&self.graph
	}

	/// Re-create the archive for a node of the current graph.
	pub fn materialize(&mut self, node: NodeIndex<DefaultIx>) -> Result<PathBuf> {
		self.graph.materialize(node, &self.packages)
	}

	pub fn shutdown(&mut self) {
		self.graph.shutdown();
	}

	/// Parse the install-root manifest and load every listed descriptor,
	/// massaging package directories for publication as we go. Descriptors
	/// that fail to parse are skipped with a warning.
	pub fn read_contents(&mut self) -> Result<()> {
		let path = self.install_dir.join("contents.xml");
		let mut doc = match Document::load(&path) {
			Ok(doc) => doc,
			Err(e) => {
				warn!("couldn't read {}: {}", path.display(), e);
				return Err(Error::ManifestUnreadable(path));
			},
		};
		if doc.root.name != "contents" {
			return Err(Error::ManifestUnreadable(path));
		}

		let mut seq = SeqValue::load_xml(&doc.root, "seq");
		seq.bump();
		seq.store_xml(&mut doc.root, "seq");

		for child_index in 0..doc.root.children.len() {
			let child = &doc.root.children[child_index];
			if child.name != "package" {
				continue;
			}
			let solo = child.attr("solo").and_then(|s| s.parse::<i32>().ok()).unwrap_or(0) != 0;
			let filename = match child.attr("filename") {
				Some(filename) => filename.to_owned(),
				None => continue,
			};
			if solo {
				continue;
			}
			let index = self.packages.len();
			match Package::read(&self.install_dir, &filename, Some(child_index), index, true) {
				Ok(package) => self.packages.push(package),
				Err(e) => warn!("skipping {}: {}", filename, e),
			}
		}

		self.contents = Some(doc);
		Ok(())
	}

	/// Load a descriptor read-only (no renames, no bootstrap copies) and
	/// register its package. Used by the runtime chain query.
	pub fn read_package_desc(&mut self, desc_rel: &str) -> Result<usize> {
		let index = self.packages.len();
		let package = Package::read(&self.install_dir, desc_rel, None, index, false)?;
		self.packages.push(package);
		Ok(index)
	}

	/// Intern a node for every package's base, current and top, anchor them,
	/// and wire every descriptor-declared patch into the graph.
	pub fn build_patch_graph(&mut self) {
		self.patch_filenames.clear();

		for index in 0..self.packages.len() {
			let coord = self.packages[index].coord.clone();
			let current = self.packages[index].current.clone();
			let base = self.packages[index].base.clone();
			let top = self.packages[index].top.clone();

			let current_node = self.graph.intern(&coord, &current);
			self.graph.archive_mut(current_node).current_of = Some(index);
			self.graph.archive_mut(current_node).print_name = current.filename.clone();
			self.packages[index].current_node = Some(current_node);

			let base_node = self.graph.intern(&coord, &base);
			self.graph.archive_mut(base_node).base_of = Some(index);
			self.graph.archive_mut(base_node).print_name = base.filename.clone();
			self.packages[index].base_node = Some(base_node);

			let top_node = self.graph.intern(&coord, &top);
			self.graph.archive_mut(top_node).top_of = Some(index);
			self.packages[index].top_node = Some(top_node);

			for patchfile in self.packages[index].patches.clone() {
				self.record_patchfile(patchfile);
			}
		}
	}

	fn record_patchfile(&mut self, patchfile: Patchfile) {
		self.patch_filenames.insert(patchfile.file.filename.clone());
		self.graph.record(patchfile);
	}

	pub fn process_all(&mut self) -> Result<()> {
		for index in 0..self.packages.len() {
			self.process_package(index)?;
		}
		Ok(())
	}

	/// Author missing patches only for the named packages. Unknown names are
	/// reported and otherwise ignored.
	pub fn process_some(&mut self, names: &[String]) -> Result<()> {
		let mut remaining: Vec<&String> = names.iter().collect();
		for index in 0..self.packages.len() {
			let name = self.packages[index].coord.name.clone();
			if names.contains(&name) {
				self.process_package(index)?;
			}
			remaining.retain(|n| **n != name);
		}
		if !remaining.is_empty() {
			let remaining: Vec<&str> = remaining.iter().map(|n| n.as_str()).collect();
			warn!("unknown packages: {}", remaining.join(", "));
		}
		Ok(())
	}

	/// Author the one patch a package needs when its recorded top diverges
	/// from its current version.
	fn process_package(&mut self, index: usize) -> Result<()> {
		let (top, current) =
			match (self.packages[index].top_node, self.packages[index].current_node) {
				(Some(top), Some(current)) => (top, current),
				_ => return Ok(()),
			};
		if top == current {
			// Nothing new on top of the tree.
			return Ok(());
		}

		let patch_name = format!(
			"{}.{}.patch",
			self.packages[index].current.filename, self.packages[index].patch_version
		);
		assert!(
			!self.patch_filenames.contains(&patch_name),
			"patch name {} is already taken",
			patch_name
		);
		if !self.build_patch(top, current, index, &patch_name)? {
			warn!(
				"no source archive on disk for {}; {} gets no patch this round",
				self.graph.archive(top).print_name,
				self.packages[index].coord.name
			);
		}
		Ok(())
	}

	/// Build one patch edge `from -> to` and record it. `Ok(false)` means
	/// the source archive couldn't be produced at all, which is the one
	/// recoverable failure here; everything downstream of a half-authored
	/// artifact raises instead.
	fn build_patch(
		&mut self,
		from: NodeIndex<DefaultIx>,
		to: NodeIndex<DefaultIx>,
		index: usize,
		patch_name: &str,
	) -> Result<bool> {
		let orig = match self.graph.materialize(from, &self.packages) {
			Ok(path) => path,
			Err(Error::MissingSource(name)) => {
				debug!("no way to re-create {}", name);
				return Ok(false);
			},
			Err(e) => return Err(e),
		};
		let new = self.graph.materialize(to, &self.packages)?;

		info!(
			"building patch from {} to {}",
			self.graph.archive(from).print_name,
			self.graph.archive(to).print_name
		);

		let package_dir = self.packages[index].package_dir.clone();
		let pathname = package_dir.join(patch_name);
		if let Err(e) = delta::build(&orig, &new, &pathname) {
			warn!("delta build failed: {}", e);
			let _ = fs::remove_file(&pathname);
			return Err(Error::DeltaBuildFailure(pathname));
		}

		let compressed_name = format!("{}.pz", patch_name);
		let compressed = package_dir.join(&compressed_name);
		let _ = fs::remove_file(&compressed);
		if let Err(e) = delta::compress_file(&pathname, &compressed, Compression::best()) {
			warn!("compressing patch failed: {}", e);
			return Err(Error::CompressFailure(compressed));
		}
		fs::remove_file(&pathname)?;

		let patchfile = Patchfile::from_file(
			index,
			self.packages[index].coord.clone(),
			&package_dir,
			&compressed_name,
			self.graph.archive(from).file.clone(),
			self.graph.archive(to).file.clone(),
		)?;
		self.packages[index].patches.push(patchfile.clone());
		self.packages[index].dirty = true;
		self.record_patchfile(patchfile);

		Ok(true)
	}

	/// Rewrite every dirty descriptor, refresh its manifest entry (hashes
	/// and mirrored seq) and save the manifest.
	pub fn write_contents(&mut self) -> Result<()> {
		for index in 0..self.packages.len() {
			let seq = match self.packages[index].write_desc(&self.install_dir)? {
				Some(seq) => seq,
				None => continue,
			};
			let manifest_index = match self.packages[index].manifest_index {
				Some(manifest_index) => manifest_index,
				None => continue,
			};
			let desc_rel = self.packages[index].desc_rel.clone();
			let import_rel = self.packages[index].import_desc_rel();

			let desc_ref = FileRef::from_file(&self.install_dir, &desc_rel)?;
			let import_ref = if self.install_dir.join(&import_rel).exists() {
				Some(FileRef::from_file(&self.install_dir, &import_rel)?)
			} else {
				None
			};

			let doc = self.contents.as_mut().expect("contents were read before writing. qed");
			let entry = match doc.root.children.get_mut(manifest_index) {
				Some(entry) => entry,
				None => continue,
			};
			desc_ref.store_xml(entry);
			if let Some(import_ref) = import_ref {
				if let Some(ximport) = entry.child_mut("import") {
					import_ref.store_xml(ximport);
				}
			}
			seq.store_xml(entry, "seq");
		}

		match &self.contents {
			Some(doc) => doc.save()?,
			None => {
				return Err(Error::ManifestUnreadable(self.install_dir.join("contents.xml")))
			},
		}
		Ok(())
	}

	/// The runtime query: given a descriptor and the archive file a client
	/// already has, the patches that bring it to the current version.
	/// `None` when the descriptor is unreadable or no chain exists.
	pub fn get_patch_chain_to_current(
		&mut self,
		desc_rel: &str,
		have: &FileRef,
	) -> Result<Option<Vec<Patchfile>>> {
		let index = match self.read_package_desc(desc_rel) {
			Ok(index) => index,
			Err(e) => {
				warn!("{}", e);
				return Ok(None);
			},
		};
		self.build_patch_graph();

		let coord = self.packages[index].coord.clone();
		let from = self.graph.intern(&coord, have);
		let to = match self.packages[index].current_node {
			Some(node) => node,
			None => return Ok(None),
		};

		Ok(self.graph.shortest_chain(to, from).map(|chain| {
			chain.into_iter().map(|edge| self.graph.patchfile(edge).clone()).collect()
		}))
	}

	pub fn install_dir(&self) -> &Path {
		&self.install_dir
	}
}
