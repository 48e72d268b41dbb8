use anyhow::Context;
use std::path::Path;

use crate::fileref::FileRef;
use crate::maker::PatchMaker;

/// Print the patches that bring an on-disk archive to the current version.
pub fn print_chain(install_dir: &Path, desc: &str, file: &Path) -> Result<(), anyhow::Error> {
	let dir = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
	let name = file
		.file_name()
		.and_then(|n| n.to_str())
		.ok_or_else(|| anyhow::anyhow!("unusable file name {:?}", file))?;
	let have = FileRef::from_file(dir, name).context("Hashing the archive failed")?;

	let mut maker = PatchMaker::new(install_dir);
	let chain = maker.get_patch_chain_to_current(desc, &have)?;
	maker.shutdown();

	match chain {
		None => anyhow::bail!("no patch chain from {} to the current version", name),
		Some(chain) => {
			if chain.is_empty() {
				println!("{} already is the current version", name);
			}
			for patchfile in &chain {
				println!(
					"{} ({} -> {})",
					patchfile.file.filename,
					patchfile.source.hash.brief(),
					patchfile.target.hash.brief()
				);
			}
		},
	}
	Ok(())
}
