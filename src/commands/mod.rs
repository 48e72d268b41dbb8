mod build;
mod chain;

pub use build::build_patches;
pub use chain::print_chain;
