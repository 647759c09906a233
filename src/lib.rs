//! # vfspack Core Library
//!
//! This crate provides the core functionality for the `vfspack` tool.
//!
//! It is designed to be used by the `vfspack` command-line application, but
//! its public API can also be used to programmatically pack, inspect, and
//! unpack `.vfs` containers.
//!
//! ## Key Modules
//!
//! - [`index`]: The container format itself: layout constants, the entry
//!   table and its offset arithmetic.
//! - [`scanner`]: Recursive file discovery under the base directory.
//! - [`hash`]: SHA-512 digest recipes for entries and the whole index.
//! - [`writer`]: The two-pass memory-mapped writer.
//! - [`pack`]: The pipeline tying the stages together, plus the pollable
//!   [`pack::Packer`] used by the CLI.
//! - [`extract`]: Readers for listing and unpacking existing archives.
//! - [`logging`]: The queued log sink shared by every stage.

// This file declares all the modules in the library.

pub mod cli;
pub mod error;
pub use error::VfsError;

pub mod extract;
pub mod hash;
pub mod index;
pub mod logging;
pub mod pack;
pub mod scanner;
pub mod writer;
