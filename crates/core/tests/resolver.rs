use std::collections::BTreeMap;

use warden_core::graph::ModuleGraph;
use warden_core::model::{Addr, BasicBlock, CodeRange, EdgeKind, Terminator};
use warden_core::resolve::{ModuleRegistry, ResolveError};

fn block(start: Addr, last: Addr, size: u64, terminator: Terminator) -> BasicBlock {
    BasicBlock::new(start, last, size, terminator)
}

/// Executable graph: `main` at 0x1000 calls `helper` at 0x1100, then
/// returns. The fallthrough block after the call is already disassembled.
fn app_graph() -> ModuleGraph {
    let mut graph = ModuleGraph::from_root(
        "app",
        block(0x1000, 0x1008, 12, Terminator::Call { target: Some(0x1100) }),
    );
    graph.set_code_range(CodeRange::new(0x1000, 0x2000));

    graph.add_function(0x1000, Some("main".into()));
    graph.attach_block_to_function(0x1000, 0x1000);
    graph.add_block(block(0x100c, 0x1010, 8, Terminator::Return));
    graph.attach_block_to_function(0x100c, 0x1000);

    graph.add_function(0x1100, Some("helper".into()));
    graph.add_block(block(0x1100, 0x1108, 12, Terminator::Return));
    graph.attach_block_to_function(0x1100, 0x1100);

    graph
}

fn lib_graph() -> ModuleGraph {
    let mut graph = ModuleGraph::named("libfoo");
    graph.set_is_library(true);
    graph.set_code_range(CodeRange::new(0x7000, 0x8000));
    graph
}

fn lib_exports() -> BTreeMap<Addr, String> {
    BTreeMap::from([(0x7100, "foo".to_string())])
}

#[test]
fn call_creates_paired_return_edges() {
    let mut registry = ModuleRegistry::new();
    registry.insert(app_graph());
    registry.resolve_module("app").expect("resolve");

    let app = registry.get("app").expect("app graph");
    let call = app.find_edge(0x1008, 0x1100).expect("call edge");
    assert_eq!(call.kind, EdgeKind::Call);
    assert!(call.target_module.is_none(), "intra-module call carries no module tag");

    // helper's single exit block returns to the fallthrough after the call.
    let ret = app.find_edge(0x1108, 0x100c).expect("return edge");
    assert_eq!(ret.kind, EdgeKind::Return);
}

#[test]
fn unknown_callee_becomes_dummy_with_synthetic_return() {
    let mut graph = app_graph();
    // A second call site targeting an address nothing was disassembled at.
    graph.add_block(block(0x1400, 0x1408, 12, Terminator::Call { target: Some(0x1800) }));

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.resolve_module("app").expect("resolve");

    let app = registry.get("app").expect("app graph");
    let callee = app.find_function(0x1800).expect("dummy callee");
    assert!(callee.is_dummy());

    assert!(app.find_edge(0x1008 + 0x400, 0x1800).is_some(), "call edge");
    // Exactly one synthetic return edge, from the dummy's placeholder.
    let ret = app.find_edge(0x1800, 0x140c).expect("synthetic return edge");
    assert_eq!(ret.kind, EdgeKind::Return);
    let synthetic_returns =
        app.edges_from(0x1800).filter(|e| e.kind == EdgeKind::Return).count();
    assert_eq!(synthetic_returns, 1);
}

#[test]
fn external_target_outside_all_modules_gets_local_dummy() {
    let mut graph = app_graph();
    graph.add_block(block(0x1400, 0x1408, 12, Terminator::Call { target: Some(0x9999) }));

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.resolve_module("app").expect("resolve");

    let app = registry.get("app").expect("app graph");
    let callee = app.find_function(0x9999).expect("dummy for external code");
    assert!(callee.is_dummy());
    assert!(callee.lib_dummy_name().is_none());
    assert!(app.find_edge(0x9999, 0x140c).is_some(), "synthetic return edge");
}

#[test]
fn library_call_creates_named_dummy_and_entry_point() {
    let mut graph = app_graph();
    graph.add_block(block(0x1400, 0x1408, 12, Terminator::Call { target: Some(0x7100) }));

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.insert(lib_graph());
    registry.register_exports("libfoo", lib_exports());
    registry.resolve_module("app").expect("resolve");

    let lib = registry.get("libfoo").expect("lib graph");
    let dummy = lib.find_lib_dummy_by_name("foo").expect("library dummy");
    assert_eq!(dummy.base, 0x7100);
    assert_eq!(lib.entry_points().collect::<Vec<_>>(), vec![0x7100]);
    assert!(lib.single_entry(), "first discovered export is the only entry");

    let app = registry.get("app").expect("app graph");
    let call = app.find_edge(0x1408, 0x7100).expect("call edge");
    assert_eq!(call.target_module.as_deref(), Some("libfoo"));
    // Opaque callee: one synthetic return edge back to the fallthrough.
    assert!(app.find_edge(0x7100, 0x140c).is_some());
}

#[test]
fn library_call_without_known_export_name_gets_generic_dummy() {
    let mut graph = app_graph();
    graph.add_block(block(0x1400, 0x1408, 12, Terminator::Call { target: Some(0x7500) }));

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.insert(lib_graph());
    registry.register_exports("libfoo", lib_exports());
    registry.resolve_module("app").expect("resolve");

    let lib = registry.get("libfoo").expect("lib graph");
    let dummy = lib.find_function(0x7500).expect("dummy");
    assert!(dummy.is_dummy());
    assert!(dummy.lib_dummy_name().is_none());
}

#[test]
fn tail_jump_creates_single_direct_edge() {
    let mut graph = app_graph();
    // A block of main tail-jumping into helper.
    graph.add_block(block(
        0x1014,
        0x1018,
        8,
        Terminator::Jump { target: Some(0x1100), conditional: false },
    ));
    graph.attach_block_to_function(0x1014, 0x1000);

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.resolve_module("app").expect("resolve");

    let app = registry.get("app").expect("app graph");
    let jump = app.find_edge(0x1018, 0x1100).expect("tail jump edge");
    assert_eq!(jump.kind, EdgeKind::InterJump);
    // A tail jump does not return to the jumping function.
    assert!(app.find_edge(0x1108, 0x101c).is_none(), "no return edge to jump fallthrough");
}

#[test]
fn tail_jump_into_function_interior_leaves_ownership_alone() {
    let mut graph = ModuleGraph::named("app");
    graph.set_code_range(CodeRange::new(0x1000, 0x2000));
    graph.add_function(0x1000, Some("jumper".into()));
    graph.add_block(block(
        0x1000,
        0x1008,
        12,
        Terminator::Jump { target: Some(0x1108), conditional: false },
    ));
    graph.attach_block_to_function(0x1000, 0x1000);

    graph.add_function(0x1100, Some("victim".into()));
    graph.add_block(block(0x1100, 0x1104, 8, Terminator::Fallthrough));
    graph.add_block(block(0x1108, 0x110c, 8, Terminator::Return));
    graph.attach_block_to_function(0x1100, 0x1100);
    graph.attach_block_to_function(0x1108, 0x1100);

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.resolve_module("app").expect("resolve");

    let app = registry.get("app").expect("app graph");
    let jump = app.find_edge(0x1008, 0x1108).expect("tail jump edge");
    assert_eq!(jump.kind, EdgeKind::InterJump);

    // The interior block stays with its owning function.
    let bb = app.find_bb(0x1108).expect("interior block");
    assert_eq!(bb.function, Some(0x1100));
    let victim = app.find_function(0x1100).expect("victim");
    assert!(victim.blocks.contains(&0x1108));

    // The synthesized target function owns nothing of the victim.
    let dummy = app.find_function(0x1108).expect("dummy at jump target");
    assert!(dummy.is_dummy());
    assert!(dummy.blocks.is_empty());
}

#[test]
fn conditional_jump_inside_function_stays_intraprocedural() {
    let mut graph = ModuleGraph::named("app");
    graph.set_code_range(CodeRange::new(0x1000, 0x2000));
    graph.add_function(0x1000, Some("loop_fn".into()));
    graph.add_block(block(
        0x1000,
        0x1008,
        12,
        Terminator::Jump { target: Some(0x1010), conditional: true },
    ));
    graph.add_block(block(0x100c, 0x100c, 4, Terminator::Fallthrough));
    graph.add_block(block(0x1010, 0x1014, 8, Terminator::Return));
    graph.attach_block_to_function(0x1000, 0x1000);
    graph.attach_block_to_function(0x100c, 0x1000);
    graph.attach_block_to_function(0x1010, 0x1000);

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.resolve_module("app").expect("resolve");

    let app = registry.get("app").expect("app graph");
    let branch = app.find_edge(0x1008, 0x1010).expect("branch edge");
    assert_eq!(branch.kind, EdgeKind::Branch);
    let fallthrough = app.find_edge(0x1008, 0x100c).expect("fallthrough edge");
    assert_eq!(fallthrough.kind, EdgeKind::Fallthrough);
    // No function was synthesized for an intraprocedural target.
    assert_eq!(app.count_functions(), 1);
}

#[test]
fn re_resolving_changes_nothing() {
    let mut graph = app_graph();
    graph.add_block(block(0x1400, 0x1408, 12, Terminator::Call { target: Some(0x7100) }));

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.insert(lib_graph());
    registry.register_exports("libfoo", lib_exports());

    registry.resolve_module("app").expect("first resolve");
    let edges = registry.get("app").expect("app").count_edges();
    let functions = registry.get("app").expect("app").count_functions();
    let lib_functions = registry.get("libfoo").expect("lib").count_functions();

    registry.resolve_module("app").expect("second resolve");
    let app = registry.get("app").expect("app");
    assert_eq!(app.count_edges(), edges);
    assert_eq!(app.count_functions(), functions);
    assert_eq!(registry.get("libfoo").expect("lib").count_functions(), lib_functions);
}

#[test]
fn masked_lookup_matches_any_entry_of_the_same_library() {
    let mut graph = app_graph();
    graph.add_block(block(0x1400, 0x1408, 12, Terminator::Call { target: Some(0x7100) }));

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.insert(lib_graph());
    registry.register_exports("libfoo", lib_exports());
    registry.resolve_module("app").expect("resolve");

    // Exact hit.
    assert!(registry.find_edge_mask_lib("app", 0x1408, 0x7100).is_some());
    // Different address in the same library: masked hit.
    assert!(registry.find_edge_mask_lib("app", 0x1408, 0x7fff).is_some());
    // Address in no known library: miss.
    assert!(registry.find_edge_mask_lib("app", 0x1408, 0x6000).is_none());
    // Different source: miss even with masking.
    assert!(registry.find_edge_mask_lib("app", 0x1008, 0x7fff).is_none());
}

#[test]
fn observed_indirect_targets_are_fed_back_through_dispatch() {
    let mut graph = app_graph();
    // An indirect call site; its targets only become known at runtime.
    graph.add_block(block(0x1400, 0x1408, 12, Terminator::Call { target: None }));

    let mut registry = ModuleRegistry::new();
    registry.insert(graph);
    registry.resolve_module("app").expect("resolve");

    // Static resolution leaves the site without outgoing edges.
    assert!(registry.get("app").expect("app").edges_from(0x1408).next().is_none());

    registry
        .handle_interprocedural("app", 0x1400, 0x1100, EdgeKind::Call)
        .expect("observed call target");
    registry
        .handle_interprocedural("app", 0x1400, 0x1800, EdgeKind::InterJump)
        .expect("observed jump target");

    let app = registry.get("app").expect("app graph");
    let call = app.find_edge(0x1408, 0x1100).expect("observed call edge");
    assert_eq!(call.kind, EdgeKind::Call);
    // The call got its paired return edge, the jump did not.
    assert!(app.find_edge(0x1108, 0x140c).is_some());
    let jump = app.find_edge(0x1408, 0x1800).expect("observed jump edge");
    assert_eq!(jump.kind, EdgeKind::InterJump);
    assert!(app.edges_from(0x1800).next().is_none());
}

#[test]
fn unknown_module_and_site_are_reported() {
    let mut registry = ModuleRegistry::new();
    registry.insert(app_graph());

    assert!(matches!(
        registry.resolve_module("nope"),
        Err(ResolveError::UnknownModule(_))
    ));
    assert!(matches!(
        registry.handle_interprocedural_call("app", 0x4444, 0x1100),
        Err(ResolveError::UnknownSite(0x4444))
    ));
}
