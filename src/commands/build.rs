use log::trace;
use std::{
	fs,
	path::{Path, PathBuf},
};

use crate::cli::PackageSelectOptions;
use crate::maker::PatchMaker;

/// Run a full publication session over the install tree.
pub fn build_patches(
	install_dir: &Path,
	pkg_opts: PackageSelectOptions,
	dot_graph: Option<PathBuf>,
) -> Result<(), anyhow::Error> {
	let PackageSelectOptions { packages, skip } = pkg_opts;
	if !packages.is_empty() && !skip.is_empty() {
		anyhow::bail!("-p/--packages is mutually exlusive to using -s/--skip");
	}

	let mut maker = PatchMaker::new(install_dir);
	maker.read_contents()?;
	maker.build_patch_graph();

	let selected = if !packages.is_empty() {
		Some(packages)
	} else if !skip.is_empty() {
		let names = maker
			.packages()
			.iter()
			.map(|p| p.coord.name.clone())
			.filter(|name| !skip.iter().any(|r| r.is_match(name)))
			.collect::<Vec<_>>();
		trace!("going for matching against {:?}", names);
		Some(names)
	} else {
		None
	};

	match &selected {
		Some(names) => maker.process_some(names)?,
		None => maker.process_all()?,
	}

	if let Some(path) = dot_graph {
		fs::write(&path, maker.graph().to_dot())?;
	}

	maker.write_contents()?;

	let rewritten = maker.packages().iter().filter(|p| p.dirty).count();
	if rewritten == 0 {
		println!("Nothing changed. All good. Exiting.");
	} else {
		println!(
			"{:}",
			maker
				.packages()
				.iter()
				.filter(|p| p.dirty)
				.map(|p| format!("{} (patch version {})", p.coord.name, p.patch_version))
				.collect::<Vec<String>>()
				.join(", ")
		);
	}

	maker.shutdown();
	Ok(())
}
