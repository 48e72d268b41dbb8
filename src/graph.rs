//! The patch graph: every distinct archive content is a node, every
//! patchfile a directed edge. Nodes and edges live in owning arenas here;
//! packages refer to them by index, so logical cycles in the patch history
//! never become ownership cycles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::warn;
use petgraph::stable_graph::{DefaultIx, EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tempfile::TempPath;

use crate::delta;
use crate::error::{Error, Result};
use crate::fileref::{FileHash, FileRef};
use crate::package::{Package, PackageCoord, Patchfile};

/// Interning key: hash within a package coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
	pub coord: PackageCoord,
	pub hash: FileHash,
}

/// One distinct archive content of one package family.
#[derive(Debug)]
pub struct ArchiveVersion {
	pub coord: PackageCoord,
	pub file: FileRef,
	/// Package (by index) whose current / base / top version this is.
	pub current_of: Option<usize>,
	pub base_of: Option<usize>,
	pub top_of: Option<usize>,
	pub print_name: String,
	/// Filled once the archive bytes have been re-created this session;
	/// deleted on shutdown.
	temp_file: Option<TempPath>,
}

impl ArchiveVersion {
	pub fn temp_file(&self) -> Option<&Path> {
		self.temp_file.as_deref()
	}
}

struct RecreatePlan {
	start_file: PathBuf,
	start_node: NodeIndex<DefaultIx>,
	/// Patches to apply in order, with the node each application produces.
	steps: Vec<(EdgeIndex<DefaultIx>, NodeIndex<DefaultIx>)>,
}

#[derive(Default)]
pub struct PatchGraph {
	graph: StableGraph<ArchiveVersion, Patchfile>,
	nodes: HashMap<NodeKey, NodeIndex<DefaultIx>>,
}

impl PatchGraph {
	/// Return the shared node for `(coord, file.hash)`, creating it on first
	/// sight.
	pub fn intern(&mut self, coord: &PackageCoord, file: &FileRef) -> NodeIndex<DefaultIx> {
		let key = NodeKey { coord: coord.clone(), hash: file.hash };
		if let Some(&index) = self.nodes.get(&key) {
			return index;
		}
		let print_name = if file.filename.is_empty() {
			file.hash.brief()
		} else {
			file.filename.clone()
		};
		let index = self.graph.add_node(ArchiveVersion {
			coord: coord.clone(),
			file: file.clone(),
			current_of: None,
			base_of: None,
			top_of: None,
			print_name,
			temp_file: None,
		});
		self.nodes.insert(key, index);
		index
	}

	pub fn get(&self, key: &NodeKey) -> Option<NodeIndex<DefaultIx>> {
		self.nodes.get(key).copied()
	}

	pub fn archive(&self, index: NodeIndex<DefaultIx>) -> &ArchiveVersion {
		&self.graph[index]
	}

	pub fn archive_mut(&mut self, index: NodeIndex<DefaultIx>) -> &mut ArchiveVersion {
		&mut self.graph[index]
	}

	pub fn patchfile(&self, edge: EdgeIndex<DefaultIx>) -> &Patchfile {
		&self.graph[edge]
	}

	pub fn node_count(&self) -> usize {
		self.graph.node_count()
	}

	pub fn edge_count(&self) -> usize {
		self.graph.edge_count()
	}

	/// Wire a patchfile into the graph, interning both endpoints.
	pub fn record(&mut self, patchfile: Patchfile) -> EdgeIndex<DefaultIx> {
		let from = self.intern(&patchfile.coord, &patchfile.source);
		let to = self.intern(&patchfile.coord, &patchfile.target);
		self.graph[to].print_name = patchfile.file.filename.clone();
		self.graph.add_edge(from, to, patchfile)
	}

	/// Incoming edges in descriptor-declared order. The adjacency lists
	/// iterate newest-first, and declared order decides search ties.
	fn incoming(&self, node: NodeIndex<DefaultIx>) -> Vec<EdgeIndex<DefaultIx>> {
		let mut edges: Vec<_> =
			self.graph.edges_directed(node, Direction::Incoming).map(|e| e.id()).collect();
		edges.reverse();
		edges
	}

	/// The shortest sequence of patches producing `target` when applied in
	/// order starting from `start`. `None` means no path; an empty sequence
	/// means the versions are the same.
	pub fn shortest_chain(
		&self,
		target: NodeIndex<DefaultIx>,
		start: NodeIndex<DefaultIx>,
	) -> Option<Vec<EdgeIndex<DefaultIx>>> {
		self.chain_between(target, start, &mut Vec::new())
	}

	fn chain_between(
		&self,
		node: NodeIndex<DefaultIx>,
		start: NodeIndex<DefaultIx>,
		visited: &mut Vec<NodeIndex<DefaultIx>>,
	) -> Option<Vec<EdgeIndex<DefaultIx>>> {
		if node == start {
			return Some(Vec::new());
		}
		if visited.contains(&node) {
			// Been here on this path already; don't loop.
			return None;
		}
		visited.push(node);
		let mut best: Option<Vec<EdgeIndex<DefaultIx>>> = None;
		for edge in self.incoming(node) {
			let (from, _) =
				self.graph.edge_endpoints(edge).expect("edge is from this graph. qed");
			if let Some(mut chain) = self.chain_between(from, start, visited) {
				chain.push(edge);
				if best.as_ref().map_or(true, |b| chain.len() < b.len()) {
					best = Some(chain);
				}
			}
		}
		visited.pop();
		best
	}

	/// Step one patch forward from `node` along the chain belonging to the
	/// given package coordinates.
	pub fn next_toward(
		&self,
		node: NodeIndex<DefaultIx>,
		coord: &PackageCoord,
	) -> Option<NodeIndex<DefaultIx>> {
		let mut outgoing: Vec<_> = self
			.graph
			.edges_directed(node, Direction::Outgoing)
			.map(|e| (e.id(), e.target()))
			.collect();
		outgoing.reverse();
		outgoing
			.into_iter()
			.find(|(edge, _)| self.graph[*edge].coord == *coord)
			.map(|(_, target)| target)
	}

	/// Compute how to re-create this node's archive: a starting file (an
	/// already-materialized temp, or an anchored compressed archive) plus
	/// the minimal list of patches to apply.
	fn recreate_plan(
		&self,
		node: NodeIndex<DefaultIx>,
		visited: &mut Vec<NodeIndex<DefaultIx>>,
		packages: &[Package],
	) -> Option<RecreatePlan> {
		if let Some(temp) = &self.graph[node].temp_file {
			return Some(RecreatePlan {
				start_file: temp.to_path_buf(),
				start_node: node,
				steps: Vec::new(),
			});
		}
		if visited.contains(&node) {
			return None;
		}
		visited.push(node);
		let plan = self.plan_through(node, visited, packages);
		visited.pop();
		plan
	}

	fn plan_through(
		&self,
		node: NodeIndex<DefaultIx>,
		visited: &mut Vec<NodeIndex<DefaultIx>>,
		packages: &[Package],
	) -> Option<RecreatePlan> {
		let archive = &self.graph[node];

		if let Some(package) = archive.current_of {
			let package = &packages[package];
			if let Some(compressed) = &package.compressed_filename {
				return Some(RecreatePlan {
					start_file: package.package_dir.join(compressed),
					start_node: node,
					steps: Vec::new(),
				});
			}
		}
		if let Some(package) = archive.base_of {
			let package = &packages[package];
			return Some(RecreatePlan {
				start_file: package.package_dir.join(format!("{}.pz", package.base.filename)),
				start_node: node,
				steps: Vec::new(),
			});
		}

		let mut best: Option<RecreatePlan> = None;
		for edge in self.incoming(node) {
			let (from, _) =
				self.graph.edge_endpoints(edge).expect("edge is from this graph. qed");
			if let Some(mut plan) = self.recreate_plan(from, visited, packages) {
				plan.steps.push((edge, node));
				if best.as_ref().map_or(true, |b| plan.steps.len() < b.steps.len()) {
					best = Some(plan);
				}
			}
		}
		best
	}

	/// Re-create this node's archive file on disk, decompressing the
	/// starting anchor and applying patches as needed. Every intermediate
	/// node keeps its temp file, so materializing it later is a cache hit.
	pub fn materialize(
		&mut self,
		node: NodeIndex<DefaultIx>,
		packages: &[Package],
	) -> Result<PathBuf> {
		let plan = match self.recreate_plan(node, &mut Vec::new(), packages) {
			Some(plan) => plan,
			None => return Err(Error::MissingSource(self.graph[node].print_name.clone())),
		};

		let mut prev = plan.start_file;
		if prev.extension().map_or(false, |e| e == "pz") {
			let temp = match delta::decompress_to_temp(&prev) {
				Ok(temp) => temp,
				Err(e) => {
					warn!("couldn't decompress {}: {}", prev.display(), e);
					return Err(Error::MissingSource(
						self.graph[plan.start_node].print_name.clone(),
					));
				},
			};
			prev = temp.to_path_buf();
			let slot = &mut self.graph[plan.start_node].temp_file;
			debug_assert!(slot.is_none(), "plan starts at materialized nodes directly");
			*slot = Some(temp);
		}

		for (edge, produced) in plan.steps {
			let patch_path = {
				let patchfile = &self.graph[edge];
				packages[patchfile.package].package_dir.join(&patchfile.file.filename)
			};
			let temp = delta::apply_to_temp(&patch_path, &prev).map_err(|e| {
				Error::ApplyFailure { path: patch_path.clone(), reason: e.to_string() }
			})?;
			prev = temp.to_path_buf();
			self.graph[produced].temp_file = Some(temp);
		}

		Ok(prev)
	}

	/// Remove every temp file created during the session.
	pub fn shutdown(&mut self) {
		let nodes: Vec<_> = self.graph.node_indices().collect();
		for node in nodes {
			if let Some(temp) = self.graph[node].temp_file.take() {
				if let Err(e) = temp.close() {
					warn!("couldn't remove temp file: {}", e);
				}
			}
		}
	}

	/// Graphviz rendering of the whole graph, labelled by print names and
	/// patch artifact names.
	pub fn to_dot(&self) -> String {
		use petgraph::dot::Dot;

		let mut display = petgraph::Graph::<String, String>::new();
		let mut mapped = HashMap::new();
		for node in self.graph.node_indices() {
			mapped.insert(node, display.add_node(self.graph[node].print_name.clone()));
		}
		for node in self.graph.node_indices() {
			for edge in self.graph.edges_directed(node, Direction::Outgoing) {
				display.add_edge(
					mapped[&node],
					mapped[&edge.target()],
					edge.weight().file.filename.clone(),
				);
			}
		}
		format!("{}", Dot::new(&display))
	}
}
