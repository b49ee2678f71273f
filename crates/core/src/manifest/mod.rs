//! Wrap manifest: the artifact published at load time for the interception
//! stub.
//!
//! The stub needs two things to decide, at runtime, whether a given call
//! originates from monitored target code: the target executable's code
//! range, and the set of wrapped library entry points. Only exported
//! functions are admitted: the compiler is free to repurpose scratch
//! registers for hidden argument passing in locally optimized call
//! sequences, so wrapping internal static helpers can corrupt a live hidden
//! argument. That restriction is policy, not something the stub remediates.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::ModuleGraph;
use crate::model::{Addr, CodeRange};

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported manifest version {found}; this build reads version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("target graph \"{0}\" has an empty code range; set it before publishing")]
    EmptyTargetRange(String),
}

/// One wrapped library entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapEntry {
    pub address: Addr,
    pub name: String,
}

/// Everything the boundary-interception stub consumes at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapManifest {
    pub manifest_version: u32,
    /// Name of the monitored target executable.
    pub target_module: String,
    /// The target's code-address bounds, half-open. A caller return address
    /// inside this range marks a crossing from target code into the library.
    pub target_range: CodeRange,
    /// The wrapped library and its fingerprint, when known.
    pub library: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_hash: Option<String>,
    /// Wrapped entry points, ordered by address. Exported functions only.
    pub entries: Vec<WrapEntry>,
}

impl WrapManifest {
    /// Build a manifest from the target executable's graph and a library's
    /// export table.
    pub fn build(
        target: &ModuleGraph,
        library: impl Into<String>,
        exports: &BTreeMap<Addr, String>,
    ) -> Result<Self, ManifestError> {
        let range = target.code_range();
        if range.is_empty() {
            return Err(ManifestError::EmptyTargetRange(target.module_name().to_string()));
        }
        Ok(Self {
            manifest_version: MANIFEST_VERSION,
            target_module: target.module_name().to_string(),
            target_range: range,
            library: library.into(),
            library_hash: None,
            entries: exports
                .iter()
                .map(|(addr, name)| WrapEntry { address: *addr, name: name.clone() })
                .collect(),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let json = fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&json)?;
        if manifest.manifest_version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                found: manifest.manifest_version,
                supported: MANIFEST_VERSION,
            });
        }
        Ok(manifest)
    }
}
