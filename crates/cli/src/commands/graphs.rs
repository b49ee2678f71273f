use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use warden_core::diff::compare_edges;
use warden_core::graph::ModuleGraph;
use warden_core::store::load_cfg_from_file;

fn load_graph(path: &str) -> Result<ModuleGraph> {
    load_cfg_from_file(path).with_context(|| format!("Failed to load graph from {path}"))
}

/// Print size and structure metrics for one serialized graph.
pub fn stats_command(graph_path: &str, json: bool) -> Result<()> {
    let graph = load_graph(graph_path)?;
    let ats = graph.count_ats();
    let range = graph.code_range();

    let (mut dummies, mut plt) = (0usize, 0usize);
    graph.foreach_function(|fun| {
        if fun.is_dummy() {
            dummies += 1;
        }
        if fun.plt {
            plt += 1;
        }
    });

    if json {
        let value = serde_json::json!({
            "module": graph.module_name(),
            "is_library": graph.is_library(),
            "code_range": { "start": range.start, "end": range.end },
            "single_entry": graph.single_entry(),
            "entry_points": graph.entry_points().count(),
            "basic_blocks": graph.count_basic_blocks(),
            "functions": graph.count_functions(),
            "dummy_functions": dummies,
            "plt_functions": plt,
            "edges": graph.count_edges(),
            "edges_coarse_grained": graph.count_edges_coarse_grained(),
            "icall_sites": ats.icall_sites,
            "icall_targets": ats.icall_targets,
            "icall_edges": ats.icall_edges,
            "binary_hash": graph.binary_hash(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Module: {}", graph.module_name());
    println!("  Library: {}", graph.is_library());
    println!("  Code range: {:#x}..{:#x}", range.start, range.end);
    println!(
        "  Entry points: {} (single entry: {})",
        graph.entry_points().count(),
        graph.single_entry()
    );
    println!("  Basic blocks: {}", graph.count_basic_blocks());
    println!("  Functions: {} ({} dummy, {} plt)", graph.count_functions(), dummies, plt);
    println!("  Edges: {} ({} coarse-grained)", graph.count_edges(), graph.count_edges_coarse_grained());
    println!(
        "  Indirect calls: {} sites, {} targets, {} edges",
        ats.icall_sites, ats.icall_targets, ats.icall_edges
    );
    if let Some(hash) = graph.binary_hash() {
        println!("  Binary hash: {hash}");
    }

    Ok(())
}

/// Compare two serialized graphs and report edge mismatches.
pub fn diff_command(
    left_path: &str,
    right_path: &str,
    out: Option<&str>,
    json: bool,
) -> Result<()> {
    let left = load_graph(left_path)?;
    let right = load_graph(right_path)?;

    let report = compare_edges(&left, &right);

    if let Some(out_path) = out {
        let serialized = serde_json::to_string_pretty(&report)
            .context("Failed to serialize diff report to JSON")?;
        fs::write(Path::new(out_path), serialized)
            .with_context(|| format!("Failed to write diff report to {out_path}"))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Comparing {} against {}", report.left_module, report.right_module);
        if report.left_binary_hash.is_some() && report.left_binary_hash != report.right_binary_hash
        {
            println!("  note: graphs were built from different binaries");
        }
        println!("  Missing in right: {}", report.missing_in_right.len());
        for edge in &report.missing_in_right {
            println!("    {:#x} -> {:#x} ({:?})", edge.source, edge.target, edge.kind);
        }
        println!("  Missing in left: {}", report.missing_in_left.len());
        for edge in &report.missing_in_left {
            println!("    {:#x} -> {:#x} ({:?})", edge.source, edge.target, edge.kind);
        }
    }

    if !report.is_clean() {
        bail!("{} edge mismatches between {} and {}", report.mismatch_count(), left_path, right_path);
    }
    println!("Graphs agree (modulo library-entry masking).");
    Ok(())
}
