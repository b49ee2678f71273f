//! The per-module control-flow graph.
//!
//! A [`ModuleGraph`] owns every basic block, function, and edge of one binary
//! image (the executable or one shared library). Blocks and functions live in
//! address-keyed maps and refer to each other by address only, so the whole
//! aggregate serializes as plain data and never holds intra-graph references.
//!
//! Graphs are append-only: entities are created on demand during a single
//! resolution pass and never deleted, then the graph is read-only for
//! comparison and serialization.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{Addr, AtStats, BasicBlock, CodeRange, Edge, EdgeKind, Function, FunctionKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleGraph {
    module_name: String,
    range: CodeRange,
    is_library: bool,

    /// Entry points of the module: the executable's start address, or one
    /// per exported function for a library.
    entry_points: BTreeSet<Addr>,
    /// Holds iff `entry_points` has exactly one element.
    single_entry_point: bool,

    functions: BTreeMap<Addr, Function>,
    /// Blocks by start address; the owning store.
    start2bb: BTreeMap<Addr, BasicBlock>,
    /// Last-instruction address to block start address.
    last2bb: BTreeMap<Addr, Addr>,
    /// Edges grouped by source (last-instruction) address, deduplicated by
    /// the `(source, target, kind)` triple plus the target-module tag.
    edges: BTreeMap<Addr, Vec<Edge>>,

    /// Fingerprint of the binary this graph was built from, when known.
    binary_hash: Option<String>,
}

impl ModuleGraph {
    /// Graph for an executable, rooted at a single known entry block.
    pub fn from_root(module_name: impl Into<String>, root: BasicBlock) -> Self {
        let mut graph = Self::named(module_name);
        let entry = root.start;
        graph.add_block(root);
        graph.add_entry_point(entry);
        graph
    }

    /// Graph created lazily from a module name; entry points are discovered
    /// incrementally as exported functions are first targeted.
    pub fn named(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            range: CodeRange::new(0, 0),
            is_library: false,
            entry_points: BTreeSet::new(),
            single_entry_point: false,
            functions: BTreeMap::new(),
            start2bb: BTreeMap::new(),
            last2bb: BTreeMap::new(),
            edges: BTreeMap::new(),
            binary_hash: None,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn set_code_range(&mut self, range: CodeRange) {
        self.range = range;
    }

    pub fn code_range(&self) -> CodeRange {
        self.range
    }

    /// Bounds test over the half-open `[start, end)` image range.
    pub fn addr_in_cfg(&self, addr: Addr) -> bool {
        self.range.contains(addr)
    }

    pub fn set_is_library(&mut self, is_library: bool) {
        self.is_library = is_library;
    }

    pub fn is_library(&self) -> bool {
        self.is_library
    }

    pub fn set_binary_hash(&mut self, hash: impl Into<String>) {
        self.binary_hash = Some(hash.into());
    }

    pub fn binary_hash(&self) -> Option<&str> {
        self.binary_hash.as_deref()
    }

    pub fn add_entry_point(&mut self, addr: Addr) {
        self.entry_points.insert(addr);
        self.single_entry_point = self.entry_points.len() == 1;
    }

    pub fn single_entry(&self) -> bool {
        self.single_entry_point
    }

    pub fn entry_points(&self) -> impl Iterator<Item = Addr> + '_ {
        self.entry_points.iter().copied()
    }

    /// Ingest a block from the disassembler stream.
    ///
    /// A placeholder previously created for a forward reference is upgraded
    /// in place, keeping its function attribution. A real block already
    /// stored at the same start address wins; graphs are append-only.
    pub fn add_block(&mut self, mut bb: BasicBlock) {
        let start = bb.start;
        match self.start2bb.get_mut(&start) {
            Some(existing) if existing.placeholder && !bb.placeholder => {
                self.last2bb.remove(&existing.last_insn);
                bb.function = bb.function.or(existing.function);
                *existing = bb;
            }
            Some(_) => return,
            None => {
                self.start2bb.insert(start, bb);
            }
        }
        let (last_insn, function) = {
            let stored = &self.start2bb[&start];
            (stored.last_insn, stored.function)
        };
        self.last2bb.insert(last_insn, start);
        if let Some(base) = function {
            if let Some(fun) = self.functions.get_mut(&base) {
                fun.blocks.insert(start);
            }
        }
    }

    /// Create the block at `addr` as a placeholder if nothing is stored there.
    pub fn ensure_block_at(&mut self, addr: Addr) -> &BasicBlock {
        if !self.start2bb.contains_key(&addr) {
            let bb = BasicBlock::placeholder_at(addr);
            self.last2bb.insert(bb.last_insn, bb.start);
            self.start2bb.insert(addr, bb);
        }
        &self.start2bb[&addr]
    }

    pub fn find_bb(&self, start_address: Addr) -> Option<&BasicBlock> {
        self.start2bb.get(&start_address)
    }

    pub fn find_bb_by_last_insn_address(&self, last_insn_address: Addr) -> Option<&BasicBlock> {
        self.last2bb.get(&last_insn_address).and_then(|start| self.start2bb.get(start))
    }

    /// Create a normal function at `base` if none exists. Idempotent; an
    /// existing function of any kind keeps its identity.
    pub fn add_function(&mut self, base: Addr, name: Option<String>) -> &Function {
        self.functions.entry(base).or_insert_with(|| {
            let mut fun = Function::new(base, FunctionKind::Normal);
            fun.name = name;
            fun
        });
        &self.functions[&base]
    }

    pub fn find_function(&self, base_address: Addr) -> Option<&Function> {
        self.functions.get(&base_address)
    }

    /// Attribute an existing block to an existing function. Both sides of
    /// the relation are kept in sync; unknown addresses are ignored.
    pub fn attach_block_to_function(&mut self, block_start: Addr, base: Addr) {
        let (Some(bb), Some(fun)) =
            (self.start2bb.get_mut(&block_start), self.functions.get_mut(&base))
        else {
            return;
        };
        bb.function = Some(base);
        fun.blocks.insert(block_start);
    }

    /// Placeholder function for a call/jump target whose body was never
    /// disassembled. Idempotent: a second call for the same address returns
    /// the existing function, whatever its kind.
    pub fn create_dummy_function(&mut self, base_address: Addr) -> &Function {
        self.create_dummy_with_kind(base_address, FunctionKind::Dummy)
    }

    /// Library-dummy: a placeholder standing in for a specific exported
    /// function of a linked library, keyed additionally by name.
    pub fn create_lib_dummy_function(
        &mut self,
        name: impl Into<String>,
        base_address: Addr,
    ) -> &Function {
        self.create_dummy_with_kind(base_address, FunctionKind::LibraryDummy { name: name.into() })
    }

    fn create_dummy_with_kind(&mut self, base: Addr, kind: FunctionKind) -> &Function {
        if !self.functions.contains_key(&base) {
            let mut fun = Function::new(base, kind);
            self.ensure_block_at(base);
            // A block already owned by another function keeps its owner; the
            // dummy then owns no blocks. Happens when a transfer targets the
            // interior of a known function.
            if let Some(bb) = self.start2bb.get_mut(&base) {
                if bb.function.is_none() {
                    bb.function = Some(base);
                    fun.blocks.insert(base);
                }
            }
            self.functions.insert(base, fun);
        }
        &self.functions[&base]
    }

    /// Named dynamic-linking trampoline, known to be PLT from the start.
    pub fn create_plt_function(&mut self, name: impl Into<String>, base_address: Addr) -> &Function {
        let name = name.into();
        if !self.functions.contains_key(&base_address) {
            let mut fun = Function::new(base_address, FunctionKind::Normal);
            fun.name = Some(name);
            fun.plt = true;
            self.ensure_block_at(base_address);
            // Same ownership rule as for dummies: never reassign a block that
            // already belongs to a function.
            if let Some(bb) = self.start2bb.get_mut(&base_address) {
                if bb.function.is_none() {
                    bb.function = Some(base_address);
                    fun.blocks.insert(base_address);
                }
            }
            self.functions.insert(base_address, fun);
        }
        &self.functions[&base_address]
    }

    pub fn find_lib_dummy_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.values().find(|f| f.lib_dummy_name() == Some(name))
    }

    /// One-way reclassification once relocation information identifies the
    /// function as a dynamic-linking stub. Silent no-op when no function
    /// exists at `base_address`; PLT status is metadata, not structure.
    pub fn mark_function_as_plt(&mut self, base_address: Addr) {
        if let Some(fun) = self.functions.get_mut(&base_address) {
            fun.plt = true;
        }
    }

    /// Flag functions that are targets of indirect-call edges as
    /// address-taken. Targets in other modules are left to their own graphs.
    pub fn mark_at_functions(&mut self) {
        let targets: Vec<Addr> = self
            .icall_edges()
            .filter(|e| e.target_module.is_none())
            .map(|e| self.owning_function_base(e.target).unwrap_or(e.target))
            .collect();
        for base in targets {
            if let Some(fun) = self.functions.get_mut(&base) {
                fun.address_taken = true;
            }
        }
    }

    /// Add an edge, deduplicated by the full identity: the `(source, target,
    /// kind)` triple plus the target-module tag. Returns true when the edge
    /// is new. Callers must have created both endpoint blocks first (the
    /// resolver does).
    pub fn add_edge(
        &mut self,
        source: Addr,
        target: Addr,
        kind: EdgeKind,
        target_module: Option<String>,
    ) -> bool {
        let bucket = self.edges.entry(source).or_default();
        if bucket
            .iter()
            .any(|e| e.target == target && e.kind == kind && e.target_module == target_module)
        {
            return false;
        }
        bucket.push(Edge { source, target, kind, target_module });
        true
    }

    /// Exact lookup: any edge between the given source and destination.
    pub fn find_edge(&self, src: Addr, dst: Addr) -> Option<&Edge> {
        self.edges.get(&src).and_then(|bucket| bucket.iter().find(|e| e.target == dst))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values().flatten()
    }

    pub fn edges_from(&self, src: Addr) -> impl Iterator<Item = &Edge> {
        self.edges.get(&src).into_iter().flatten()
    }

    /// Ordered visitation of every stored block.
    pub fn foreach_block(&self, mut f: impl FnMut(&BasicBlock)) {
        for bb in self.start2bb.values() {
            f(bb);
        }
    }

    /// Ordered visitation of every function.
    pub fn foreach_function(&self, mut f: impl FnMut(&Function)) {
        for fun in self.functions.values() {
            f(fun);
        }
    }

    /// Address span covered by a function's blocks, `[lowest start, highest
    /// end)`. None for unknown functions or ones without blocks.
    pub fn function_span(&self, base: Addr) -> Option<CodeRange> {
        let fun = self.functions.get(&base)?;
        let mut span: Option<CodeRange> = None;
        for start in &fun.blocks {
            let Some(bb) = self.start2bb.get(start) else { continue };
            let end = bb.end().max(bb.start + 1);
            span = Some(match span {
                None => CodeRange::new(bb.start, end),
                Some(s) => CodeRange::new(s.start.min(bb.start), s.end.max(end)),
            });
        }
        span
    }

    pub fn count_basic_blocks(&self) -> usize {
        self.start2bb.len()
    }

    pub fn count_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn count_edges(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Edge count collapsed by destination function rather than destination
    /// block. Cross-module destinations collapse by target address.
    pub fn count_edges_coarse_grained(&self) -> usize {
        let mut coarse: BTreeSet<(Addr, Addr)> = BTreeSet::new();
        for edge in self.edges() {
            let dst = if edge.target_module.is_some() {
                edge.target
            } else {
                self.owning_function_base(edge.target).unwrap_or(edge.target)
            };
            coarse.insert((edge.source, dst));
        }
        coarse.len()
    }

    /// Indirect-call metrics: sites, distinct targets, edges.
    pub fn count_ats(&self) -> AtStats {
        let icall_sites = self
            .start2bb
            .values()
            .filter(|bb| !bb.placeholder && bb.terminator.is_indirect_call())
            .count();
        let mut targets: BTreeSet<Addr> = BTreeSet::new();
        let mut icall_edges = 0;
        for edge in self.icall_edges() {
            icall_edges += 1;
            let dst = if edge.target_module.is_some() {
                edge.target
            } else {
                self.owning_function_base(edge.target).unwrap_or(edge.target)
            };
            targets.insert(dst);
        }
        AtStats { icall_sites, icall_targets: targets.len(), icall_edges }
    }

    /// Call edges whose source block ends in an indirect call.
    fn icall_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges().filter(move |e| {
            e.kind == EdgeKind::Call
                && self
                    .find_bb_by_last_insn_address(e.source)
                    .is_some_and(|bb| bb.terminator.is_indirect_call())
        })
    }

    /// Function owning the block that starts at `addr`, falling back to a
    /// function based exactly at `addr`.
    fn owning_function_base(&self, addr: Addr) -> Option<Addr> {
        self.start2bb
            .get(&addr)
            .and_then(|bb| bb.function)
            .or_else(|| self.functions.get(&addr).map(|f| f.base))
    }
}
