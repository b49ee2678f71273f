//! Graph primitives: basic blocks, functions, and edges.
//!
//! These are passive, address-keyed records. Ownership and lookup live in
//! [`crate::graph::ModuleGraph`]; cross-module relations are expressed as
//! `(module name, address)` pairs rather than references, so the records stay
//! plain serde data.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Virtual address inside a loaded binary image.
pub type Addr = u64;

/// Half-open address interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRange {
    pub start: Addr,
    pub end: Addr,
}

impl CodeRange {
    pub fn new(start: Addr, end: Addr) -> Self {
        Self { start, end }
    }

    /// `start` is in range, `end` is the first address out of range.
    pub fn contains(&self, addr: Addr) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Classification of a block's final instruction, as delivered by the
/// external disassembler. A `None` target marks an indirect transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminator {
    /// Straight-line fall into the next block.
    Fallthrough,
    Jump {
        target: Option<Addr>,
        conditional: bool,
    },
    Call {
        target: Option<Addr>,
    },
    Return,
}

impl Terminator {
    /// True for a call whose target is only known at runtime.
    pub fn is_indirect_call(&self) -> bool {
        matches!(self, Terminator::Call { target: None })
    }
}

/// A maximal straight-line instruction run.
///
/// Identified by its start address and, separately, by the address of its
/// last instruction. A block may be created before its owning function is
/// known (forward references, dummy entry points) and reattributed later;
/// such blocks are zero-sized placeholders until the disassembler delivers
/// the real record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub start: Addr,
    pub last_insn: Addr,
    pub size: u64,
    pub terminator: Terminator,
    /// Base address of the owning function, once resolved.
    pub function: Option<Addr>,
    /// Stand-in for a block that has not been disassembled yet.
    pub placeholder: bool,
}

impl BasicBlock {
    pub fn new(start: Addr, last_insn: Addr, size: u64, terminator: Terminator) -> Self {
        Self { start, last_insn, size, terminator, function: None, placeholder: false }
    }

    /// Zero-sized stand-in for a forward reference or a dummy entry point.
    pub fn placeholder_at(addr: Addr) -> Self {
        Self {
            start: addr,
            last_insn: addr,
            size: 0,
            terminator: Terminator::Fallthrough,
            function: None,
            placeholder: true,
        }
    }

    /// First address past the block; for a call site this is the fallthrough
    /// address execution returns to.
    pub fn end(&self) -> Addr {
        self.start + self.size
    }
}

/// Function classification. The variants are mutually exclusive; PLT status
/// is a separate late-bound attribute on [`Function`] because relocation
/// information arrives after function creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Normal,
    /// Referenced as a call/jump target but never disassembled.
    Dummy,
    /// Placeholder for a named exported function of a linked library.
    LibraryDummy { name: String },
}

/// A function: a base (entry) address owning an ordered set of basic blocks.
///
/// Identity is invariant once created; the block set only grows. Dummy and
/// library-dummy functions own nothing but their placeholder entry block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub base: Addr,
    pub kind: FunctionKind,
    /// Symbol name, when one is known (normal and PLT functions).
    pub name: Option<String>,
    /// Marked after the fact once relocation information identifies this
    /// function as a dynamic-linking trampoline.
    pub plt: bool,
    /// Target of at least one indirect call edge.
    pub address_taken: bool,
    /// Start addresses of member blocks, ordered.
    pub blocks: BTreeSet<Addr>,
}

impl Function {
    pub fn new(base: Addr, kind: FunctionKind) -> Self {
        Self { base, kind, name: None, plt: false, address_taken: false, blocks: BTreeSet::new() }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self.kind, FunctionKind::Dummy | FunctionKind::LibraryDummy { .. })
    }

    pub fn lib_dummy_name(&self) -> Option<&str> {
        match &self.kind {
            FunctionKind::LibraryDummy { name } => Some(name),
            _ => None,
        }
    }
}

/// Kind of control-flow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Fallthrough,
    Branch,
    Call,
    Return,
    /// Interprocedural (tail) jump; transfers without a paired return.
    InterJump,
}

/// Directed edge between two basic blocks: last-instruction address of the
/// source to start address of the destination.
///
/// Identity is the `(source, target, kind)` triple plus the target-module
/// tag; requesting the same identity twice yields the existing edge.
/// `target_module` is set when the destination lives in another module graph
/// that is a shared library; such edges participate in masked (library-entry)
/// matching during comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: Addr,
    pub target: Addr,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_module: Option<String>,
}

impl Edge {
    pub fn new(source: Addr, target: Addr, kind: EdgeKind) -> Self {
        Self { source, target, kind, target_module: None }
    }

    pub fn key(&self) -> (Addr, Addr, EdgeKind) {
        (self.source, self.target, self.kind)
    }
}

/// Indirect-call ("address-taken") metrics for one module graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AtStats {
    /// Call sites whose target is only known at runtime.
    pub icall_sites: usize,
    /// Distinct functions reached by indirect-call edges.
    pub icall_targets: usize,
    /// Call edges originating at indirect call sites.
    pub icall_edges: usize,
}
