//! Interprocedural resolution across function and module boundaries.
//!
//! The [`ModuleRegistry`] holds every loaded [`ModuleGraph`] by name and
//! routes target addresses to the graph whose image range contains them.
//! Cross-module relations never hold references into another graph; edges
//! record the target module by name and are owned by the graph whose
//! resolution pass created them.
//!
//! Resolution is a single append-only pass per module: every call site ends
//! up with at least one outgoing call edge and a paired return path, even
//! when the callee is opaque (a dummy). Unresolvable targets are never
//! fatal; they surface as dummy or library-dummy placeholder functions.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::graph::ModuleGraph;
use crate::model::{Addr, Edge, EdgeKind, Terminator};

/// Error type for resolver operations.
///
/// Absent *targets* are handled by synthesizing placeholders; these errors
/// only cover misuse of the resolver itself (unknown module names, call
/// sites that were never fed in as blocks).
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no module graph registered under name \"{0}\"")]
    UnknownModule(String),
    #[error("no basic block at control-transfer site {0:#x}")]
    UnknownSite(Addr),
}

/// Registry of loaded module graphs plus per-module export tables.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleGraph>,
    /// address -> exported name, per library module. Fed by the external
    /// symbol source; consulted when naming library dummies.
    exports: BTreeMap<String, BTreeMap<Addr, String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, graph: ModuleGraph) {
        self.modules.insert(graph.module_name().to_string(), graph);
    }

    pub fn get(&self, module: &str) -> Option<&ModuleGraph> {
        self.modules.get(module)
    }

    pub fn get_mut(&mut self, module: &str) -> Option<&mut ModuleGraph> {
        self.modules.get_mut(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleGraph> {
        self.modules.values()
    }

    /// Record the export table (address -> name) for a module.
    pub fn register_exports(&mut self, module: impl Into<String>, table: BTreeMap<Addr, String>) {
        self.exports.insert(module.into(), table);
    }

    pub fn export_name(&self, module: &str, addr: Addr) -> Option<&str> {
        self.exports.get(module).and_then(|t| t.get(&addr)).map(String::as_str)
    }

    /// Name of the module whose image range contains `addr`.
    pub fn module_for_addr(&self, addr: Addr) -> Option<&str> {
        self.modules
            .values()
            .find(|g| g.addr_in_cfg(addr))
            .map(|g| g.module_name())
    }

    /// Resolve every statically-known control transfer of `module` in one
    /// pass over its blocks.
    pub fn resolve_module(&mut self, module: &str) -> Result<(), ResolveError> {
        let sites: Vec<(Addr, Terminator)> = {
            let graph = self
                .modules
                .get(module)
                .ok_or_else(|| ResolveError::UnknownModule(module.to_string()))?;
            let mut sites = Vec::with_capacity(graph.count_basic_blocks());
            graph.foreach_block(|bb| {
                if !bb.placeholder {
                    sites.push((bb.start, bb.terminator));
                }
            });
            sites
        };

        for (start, terminator) in sites {
            match terminator {
                Terminator::Fallthrough => self.link_fallthrough(module, start)?,
                Terminator::Jump { target: Some(t), conditional } => {
                    if self.jump_is_interprocedural(module, start, t)? {
                        self.handle_interprocedural_jmp(module, start, t, EdgeKind::InterJump)?;
                    } else {
                        self.link_branch(module, start, t)?;
                    }
                    if conditional {
                        self.link_fallthrough(module, start)?;
                    }
                }
                // Indirect transfers have no static target; observed targets
                // are fed back through handle_interprocedural by the caller.
                Terminator::Jump { target: None, .. } => {}
                Terminator::Call { target: Some(t) } => {
                    self.handle_interprocedural_call(module, start, t)?;
                }
                Terminator::Call { target: None } => {}
                Terminator::Return => {}
            }
        }
        Ok(())
    }

    /// Dispatch on the transfer kind: calls synthesize the paired return
    /// path, everything else becomes a single direct edge.
    pub fn handle_interprocedural(
        &mut self,
        module: &str,
        site_start: Addr,
        target: Addr,
        kind: EdgeKind,
    ) -> Result<(), ResolveError> {
        match kind {
            EdgeKind::Call => self.handle_interprocedural_call(module, site_start, target),
            _ => self.handle_interprocedural_jmp(module, site_start, target, kind),
        }
    }

    /// Resolve a call from the block starting at `site_start` to `target`.
    ///
    /// Creates the call edge plus the matching return edge(s): one per
    /// return-terminated exit block of the callee, or exactly one synthetic
    /// return edge when the callee is a dummy whose body was never
    /// disassembled. Idempotent; re-resolving the same site is a no-op.
    pub fn handle_interprocedural_call(
        &mut self,
        module: &str,
        site_start: Addr,
        target: Addr,
    ) -> Result<(), ResolveError> {
        let (site_last, fallthrough) = self.site_info(module, site_start)?;
        let callee_module = self
            .module_for_addr(target)
            .unwrap_or(module)
            .to_string();
        let cross = callee_module != module;

        let (callee_is_lib, lib_name) = {
            let graph = self
                .modules
                .get(&callee_module)
                .ok_or_else(|| ResolveError::UnknownModule(callee_module.clone()))?;
            let is_lib = graph.is_library();
            let name = if is_lib {
                self.export_name(&callee_module, target).map(str::to_string)
            } else {
                None
            };
            (is_lib, name)
        };

        let exits = {
            let graph = self
                .modules
                .get_mut(&callee_module)
                .ok_or_else(|| ResolveError::UnknownModule(callee_module.clone()))?;
            let exits = resolve_callee(graph, target, lib_name);
            if graph.is_library() {
                // Library entry points are discovered as they are first
                // targeted.
                graph.add_entry_point(target);
            }
            exits
        };

        let tag = if cross && callee_is_lib { Some(callee_module) } else { None };
        let src_graph = self
            .modules
            .get_mut(module)
            .ok_or_else(|| ResolveError::UnknownModule(module.to_string()))?;
        src_graph.ensure_block_at(fallthrough);
        src_graph.add_edge(site_last, target, EdgeKind::Call, tag);
        for exit in exits {
            src_graph.add_edge(exit, fallthrough, EdgeKind::Return, None);
        }
        Ok(())
    }

    /// Resolve a tail jump: same target resolution as a call, but a single
    /// direct edge and no synthesized return, since a tail jump does not
    /// come back to the jumping function.
    pub fn handle_interprocedural_jmp(
        &mut self,
        module: &str,
        site_start: Addr,
        target: Addr,
        kind: EdgeKind,
    ) -> Result<(), ResolveError> {
        let (site_last, _) = self.site_info(module, site_start)?;
        let callee_module = self
            .module_for_addr(target)
            .unwrap_or(module)
            .to_string();
        let cross = callee_module != module;

        let (callee_is_lib, lib_name) = {
            let graph = self
                .modules
                .get(&callee_module)
                .ok_or_else(|| ResolveError::UnknownModule(callee_module.clone()))?;
            let is_lib = graph.is_library();
            let name = if is_lib {
                self.export_name(&callee_module, target).map(str::to_string)
            } else {
                None
            };
            (is_lib, name)
        };

        {
            let graph = self
                .modules
                .get_mut(&callee_module)
                .ok_or_else(|| ResolveError::UnknownModule(callee_module.clone()))?;
            resolve_callee(graph, target, lib_name);
            if graph.is_library() {
                graph.add_entry_point(target);
            }
        }

        let tag = if cross && callee_is_lib { Some(callee_module) } else { None };
        let src_graph = self
            .modules
            .get_mut(module)
            .ok_or_else(|| ResolveError::UnknownModule(module.to_string()))?;
        src_graph.add_edge(site_last, target, kind, tag);
        Ok(())
    }

    /// Masked edge lookup: when `dst` falls inside a library module, any
    /// edge from `src` into that library matches, regardless of the exact
    /// target address. The comparison key is (source address, target module
    /// identity). Exact matches are preferred when present.
    pub fn find_edge_mask_lib(&self, module: &str, src: Addr, dst: Addr) -> Option<&Edge> {
        let graph = self.modules.get(module)?;
        if let Some(edge) = graph.find_edge(src, dst) {
            return Some(edge);
        }
        let lib = self.module_for_addr(dst)?;
        if !self.modules.get(lib).map(ModuleGraph::is_library).unwrap_or(false) {
            return None;
        }
        graph.edges_from(src).find(|e| e.target_module.as_deref() == Some(lib))
    }

    /// A jump leaves its function when the target falls outside the owning
    /// function's address span (or outside the module image entirely).
    fn jump_is_interprocedural(
        &self,
        module: &str,
        site_start: Addr,
        target: Addr,
    ) -> Result<bool, ResolveError> {
        let graph = self
            .modules
            .get(module)
            .ok_or_else(|| ResolveError::UnknownModule(module.to_string()))?;
        if !graph.code_range().is_empty() && !graph.addr_in_cfg(target) {
            return Ok(true);
        }
        let site = graph.find_bb(site_start).ok_or(ResolveError::UnknownSite(site_start))?;
        Ok(match site.function {
            Some(base) => graph
                .function_span(base)
                .map(|span| !span.contains(target))
                .unwrap_or(true),
            // Unattributed site: only a known local block counts as
            // intraprocedural.
            None => graph.find_bb(target).is_none(),
        })
    }

    fn link_fallthrough(&mut self, module: &str, site_start: Addr) -> Result<(), ResolveError> {
        let (site_last, next) = self.site_info(module, site_start)?;
        let graph = self
            .modules
            .get_mut(module)
            .ok_or_else(|| ResolveError::UnknownModule(module.to_string()))?;
        graph.ensure_block_at(next);
        graph.add_edge(site_last, next, EdgeKind::Fallthrough, None);
        Ok(())
    }

    fn link_branch(&mut self, module: &str, site_start: Addr, target: Addr) -> Result<(), ResolveError> {
        let (site_last, _) = self.site_info(module, site_start)?;
        let graph = self
            .modules
            .get_mut(module)
            .ok_or_else(|| ResolveError::UnknownModule(module.to_string()))?;
        graph.ensure_block_at(target);
        graph.add_edge(site_last, target, EdgeKind::Branch, None);
        Ok(())
    }

    /// (last-instruction address, fallthrough address) of a transfer site.
    fn site_info(&self, module: &str, site_start: Addr) -> Result<(Addr, Addr), ResolveError> {
        let graph = self
            .modules
            .get(module)
            .ok_or_else(|| ResolveError::UnknownModule(module.to_string()))?;
        let bb = graph.find_bb(site_start).ok_or(ResolveError::UnknownSite(site_start))?;
        Ok((bb.last_insn, bb.end()))
    }
}

/// Reuse the function at `target` or synthesize a dummy (library-dummy when
/// a name is known), then report the callee's modeled return points: the
/// last-instruction addresses of its return-terminated blocks, or the
/// placeholder entry itself for a dummy.
fn resolve_callee(graph: &mut ModuleGraph, target: Addr, lib_name: Option<String>) -> Vec<Addr> {
    if graph.find_function(target).is_none() {
        match lib_name {
            Some(name) => {
                graph.create_lib_dummy_function(name, target);
            }
            None => {
                graph.create_dummy_function(target);
            }
        }
    }
    let mut exits = Vec::new();
    if let Some(fun) = graph.find_function(target) {
        if fun.is_dummy() {
            exits.push(target);
        } else {
            for start in &fun.blocks {
                if let Some(bb) = graph.find_bb(*start) {
                    if matches!(bb.terminator, Terminator::Return) {
                        exits.push(bb.last_insn);
                    }
                }
            }
        }
    }
    exits
}
