//! warden-core
//!
//! Core library for static CFG reconstruction and CFI boundary interception.
//!
//! This crate defines the graph model (blocks, functions, edges), the
//! per-module control-flow graph, the interprocedural resolver that stitches
//! graphs across function and module boundaries, the graph differ, and the
//! boundary-interception protocol spoken with the privileged runtime monitor.
//!
//! The goal is to keep all substantive logic here so it is fully testable and
//! reusable from multiple frontends (CLI, instrumentation loaders, etc.).
//! Disassembly itself is an external collaborator: callers feed this crate a
//! stream of already-decoded basic blocks.

pub mod boundary;
pub mod diff;
#[cfg(feature = "elf-exports")]
pub mod exports;
pub mod graph;
pub mod manifest;
pub mod model;
pub mod resolve;
pub mod store;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
