//! Graph differ: structural comparison of two module graphs.
//!
//! Used both to validate a statically built graph against one reconstructed
//! from an independent source, and to detect edges exercised at runtime that
//! were never predicted statically, the CFI violation signal consumed by
//! the privileged monitor or an offline auditor.
//!
//! Edges match exactly on the `(source, target, kind)` triple, except for
//! edges crossing into a shared library: a graph whose resolution inside
//! libraries is coarser may only know "control entered library L", so those
//! edges match on the (source address, target module identity) key instead.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::graph::ModuleGraph;
use crate::model::Edge;

/// Outcome of comparing two module graphs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub left_module: String,
    pub right_module: String,
    pub left_binary_hash: Option<String>,
    pub right_binary_hash: Option<String>,
    /// Edges of the left graph with no exact or masked counterpart on the
    /// right.
    pub missing_in_right: Vec<Edge>,
    /// And the symmetric walk.
    pub missing_in_left: Vec<Edge>,
    pub generated_at: String,
}

impl DiffReport {
    pub fn is_clean(&self) -> bool {
        self.missing_in_right.is_empty() && self.missing_in_left.is_empty()
    }

    pub fn mismatch_count(&self) -> usize {
        self.missing_in_right.len() + self.missing_in_left.len()
    }
}

/// Walk both edge sets and report structural discrepancies.
pub fn compare_edges(left: &ModuleGraph, right: &ModuleGraph) -> DiffReport {
    DiffReport {
        left_module: left.module_name().to_string(),
        right_module: right.module_name().to_string(),
        left_binary_hash: left.binary_hash().map(str::to_string),
        right_binary_hash: right.binary_hash().map(str::to_string),
        missing_in_right: unmatched(left, right),
        missing_in_left: unmatched(right, left),
        generated_at: Utc::now().to_rfc3339(),
    }
}

fn unmatched(from: &ModuleGraph, against: &ModuleGraph) -> Vec<Edge> {
    from.edges().filter(|e| !has_equivalent(against, e)).cloned().collect()
}

fn has_equivalent(graph: &ModuleGraph, edge: &Edge) -> bool {
    match &edge.target_module {
        Some(lib) => graph
            .edges_from(edge.source)
            .any(|e| e.target_module.as_deref() == Some(lib.as_str())),
        None => graph.edges_from(edge.source).any(|e| e.key() == edge.key()),
    }
}
