use anyhow::Context;
use flexi_logger::Logger;
use regex::Regex;
use std::path::PathBuf;
use structopt::{clap::AppSettings::*, StructOpt};

use crate::commands;

fn parse_regex(src: &str) -> Result<Regex, anyhow::Error> {
	Regex::new(src).context("Parsing Regex failed")
}

#[derive(StructOpt, Debug)]
#[structopt(setting(ColorAuto), setting(ColoredHelp))]
pub struct PackageSelectOptions {
	/// Only use the specfic set of packages
	///
	/// Apply only to the packages named as defined. This is mutually
	/// exclusive with skip.
	#[structopt(short, long)]
	pub packages: Vec<String>,
	/// Skip the package names matching ...
	///
	/// Provide one or many regular expression that, if the package name
	/// matches, means we skip that package. Mutually exclusive with
	/// `--packages`
	#[structopt(short, long, parse(try_from_str = parse_regex))]
	pub skip: Vec<Regex>,
}

#[derive(StructOpt, Debug)]
#[structopt(setting(ColorAuto), setting(ColoredHelp))]
pub enum Command {
	/// Build the patchfiles the install tree is missing
	///
	/// Read the contents manifest, wire every recorded archive version and
	/// patch into the patch graph, author one new patch for each package
	/// whose current version diverges from the recorded top, and rewrite
	/// the descriptors and manifest.
	Build {
		#[structopt(flatten)]
		pkg_opts: PackageSelectOptions,
		/// Write a graphviz dot of the patch graph to the given path.
		#[structopt(long = "dot-graph")]
		dot_graph: Option<PathBuf>,
	},
	/// Print the chain of patches from an archive file to the current version
	///
	/// The runtime query a downloader runs against a descriptor: given the
	/// archive file already on disk, which patches to fetch and apply, in
	/// order, to arrive at the package's current version.
	Chain {
		/// Path of the package descriptor, relative to the install dir
		desc: String,
		/// The archive file to start from
		#[structopt(parse(from_os_str))]
		file: PathBuf,
	},
}

#[derive(Debug, StructOpt)]
#[structopt(name = "patchforge", about = "Author binary patch chains over package install trees")]
#[structopt(setting(ColorAuto), setting(ColoredHelp))]
pub struct Opt {
	/// The path to the install directory
	///
	/// The folder holding `contents.xml` and the per-package descriptor
	/// directories.
	#[structopt(short, long, parse(from_os_str), default_value = "./")]
	pub install_dir: PathBuf,
	/// Specify the log levels.
	#[structopt(short, long, default_value = "warn")]
	pub log: String,

	#[structopt(subcommand)]
	pub cmd: Command,
}

pub fn run(args: Opt) -> Result<(), anyhow::Error> {
	let _ = Logger::try_with_str(args.log.clone())?.start()?;

	match args.cmd {
		Command::Build { pkg_opts, dot_graph } => {
			commands::build_patches(&args.install_dir, pkg_opts, dot_graph)
		},
		Command::Chain { desc, file } => commands::print_chain(&args.install_dir, &desc, &file),
	}
}
