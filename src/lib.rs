//! Authoring and application of binary patch chains over a package install
//! tree: descriptors record every published archive version, patchfiles form
//! a directed graph between them, and each publication run manufactures the
//! patches the tree is missing.

pub mod cli;
pub mod commands;
pub mod delta;
pub mod error;
pub mod fileref;
pub mod graph;
pub mod maker;
pub mod package;
pub mod xml;

pub use error::{Error, Result};
pub use maker::PatchMaker;
