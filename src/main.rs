use std::error::Error;
use structopt::StructOpt;

use patchforge::cli::{self, Opt};

fn main() -> Result<(), Box<dyn Error>> {
	Ok(cli::run(Opt::from_args())?)
}
