//! defrun: recipe-driven container launcher.
//!
//! Reads Singularity-style definition files, materializes their setup steps
//! and metadata into a root filesystem, and launches the run hook with
//! forwarded arguments.

pub mod cli;
pub mod core;
pub mod transport;
