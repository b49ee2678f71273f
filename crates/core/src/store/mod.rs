//! Graph persistence: a versioned JSON envelope around [`ModuleGraph`].
//!
//! The on-disk layout must round-trip every entity and invariant of the
//! graph model. The envelope carries an explicit format version, checked on
//! load, so a file written by a newer tool fails loudly instead of being
//! silently misinterpreted.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::ModuleGraph;

/// Latest graph-file format this crate knows how to read and write.
const CURRENT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported graph file format version {found}; this build reads version {supported}")]
    UnsupportedFormatVersion { found: u32, supported: u32 },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    format_version: u32,
    graph: ModuleGraph,
}

/// Serialize a module graph to `path` as pretty JSON.
pub fn save_cfg_to_file(graph: &ModuleGraph, path: impl AsRef<Path>) -> StoreResult<()> {
    let file = GraphFile { format_version: CURRENT_FORMAT_VERSION, graph: graph.clone() };
    let json = serde_json::to_string_pretty(&file)?;
    fs::write(path, json)?;
    Ok(())
}

/// Load a previously serialized module graph.
pub fn load_cfg_from_file(path: impl AsRef<Path>) -> StoreResult<ModuleGraph> {
    let json = fs::read_to_string(path)?;
    let file: GraphFile = serde_json::from_str(&json)?;
    if file.format_version != CURRENT_FORMAT_VERSION {
        return Err(StoreError::UnsupportedFormatVersion {
            found: file.format_version,
            supported: CURRENT_FORMAT_VERSION,
        });
    }
    Ok(file.graph)
}
