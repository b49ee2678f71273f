use std::path::Path;

use anyhow::{anyhow, Context, Result};
use crate::{module_name_from_path, sha256_file};
use warden_core::exports::read_elf_exports;
use warden_core::manifest::WrapManifest;
use warden_core::store::load_cfg_from_file;

/// List the exported functions and PLT ranges of an ELF shared object.
pub fn exports_command(binary: &str, json: bool) -> Result<()> {
    let path = Path::new(binary);
    if !path.is_file() {
        return Err(anyhow!("Binary file does not exist: {}", path.display()));
    }

    let map = read_elf_exports(path)
        .with_context(|| format!("Failed to read exports from {}", path.display()))?;

    if json {
        let value = serde_json::json!({
            "binary": binary,
            "exports": map
                .exports
                .iter()
                .map(|(addr, name)| serde_json::json!({ "address": addr, "name": name }))
                .collect::<Vec<_>>(),
            "plt": map
                .plt
                .iter()
                .map(|r| serde_json::json!({ "start": r.start, "end": r.end }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Exports of {} ({}):", binary, map.exports.len());
    if map.exports.is_empty() {
        println!("  (none)");
    }
    for (addr, name) in &map.exports {
        println!("  {addr:#x}  {name}");
    }
    println!("PLT ranges ({}):", map.plt.len());
    for range in &map.plt {
        println!("  {:#x}..{:#x}", range.start, range.end);
    }

    Ok(())
}

/// Build and write the wrap manifest for the interception stub.
pub fn wrap_set_command(
    target_graph_path: &str,
    library: &str,
    name: Option<String>,
    out: &str,
) -> Result<()> {
    let target = load_cfg_from_file(target_graph_path)
        .with_context(|| format!("Failed to load target graph from {target_graph_path}"))?;

    let lib_path = Path::new(library);
    if !lib_path.is_file() {
        return Err(anyhow!("Library file does not exist: {}", lib_path.display()));
    }

    let exports = read_elf_exports(lib_path)
        .with_context(|| format!("Failed to read exports from {}", lib_path.display()))?;
    if exports.exports.is_empty() {
        return Err(anyhow!(
            "{} exports no functions; nothing to wrap (internal helpers are never wrapped)",
            lib_path.display()
        ));
    }

    let lib_name = name.unwrap_or_else(|| module_name_from_path(lib_path));
    let mut manifest = WrapManifest::build(&target, lib_name.as_str(), &exports.exports)
        .context("Failed to build wrap manifest")?;
    manifest.library_hash = Some(sha256_file(lib_path)?);

    manifest.save(out).with_context(|| format!("Failed to write manifest to {out}"))?;

    println!("Wrote wrap manifest:");
    println!("  Target: {} ({:#x}..{:#x})", manifest.target_module, manifest.target_range.start, manifest.target_range.end);
    println!("  Library: {}", manifest.library);
    println!("  Wrapped entries: {}", manifest.entries.len());
    println!("  Out: {out}");

    Ok(())
}
