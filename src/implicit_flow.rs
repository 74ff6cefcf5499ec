use crate::runtime_api::EntryPoint;
use crate::site::{CallArg, InstrPos, InstrumentationSite, Placement};
use crate::type_info::{self, ScalarKind};
use llvm_ir::{Function, Instruction, Name, Operand, Terminator};
use llvm_ir_analysis::DominatorTree;
use log::debug;

/// Is this a boolean-like value: the 1-bit result of a comparison, or the
/// 8-bit form booleans take in memory?
fn is_boolean_like(op: &Operand) -> bool {
    matches!(
        type_info::operand_kind(op),
        Some(ScalarKind::Integer(1)) | Some(ScalarKind::Integer(8))
    )
}

/// Plan the implicit-flow edges for one function, after direct
/// instrumentation.
///
/// A value computed only along one side of a branch depends on that
/// branch's condition even without a data dependency. For every
/// boolean-like store and every conditional branch, the nearest enclosing
/// conditional is found through the immediate dominator of the containing
/// block; when the dominator block ends in a conditional branch, an edge is
/// recorded between its condition and the dependent value. The walk only
/// runs in functions containing at least one boolean-like store, which
/// bounds its cost to functions where a control-dependent boolean can exist
/// at all.
pub(crate) fn plan_dominator_edges(
    func: &Function,
    domtree: &DominatorTree,
    sites: &mut Vec<InstrumentationSite>,
) {
    let found_bool_store = func.basic_blocks.iter().any(|bb| {
        bb.instrs.iter().any(|inst| match inst {
            Instruction::Store(store) => is_boolean_like(&store.value),
            _ => false,
        })
    });
    if !found_bool_store {
        return;
    }
    for bb in &func.basic_blocks {
        for (i, inst) in bb.instrs.iter().enumerate() {
            if let Instruction::Store(store) = inst {
                if is_boolean_like(&store.value) {
                    plan_edge(func, domtree, &bb.name, InstrPos::Instr(i), &store.value, sites);
                }
            }
        }
        if let Terminator::CondBr(condbr) = &bb.term {
            plan_edge(func, domtree, &bb.name, InstrPos::Term, &condbr.condition, sites);
        }
    }
}

/// Emit one dominator edge for `value` at the given anchor, if the
/// immediate dominator of its block ends in a conditional branch.
fn plan_edge(
    func: &Function,
    domtree: &DominatorTree,
    block: &Name,
    pos: InstrPos,
    value: &Operand,
    sites: &mut Vec<InstrumentationSite>,
) {
    let idom = match domtree.idom(block) {
        Some(idom) => idom,
        None => return,
    };
    let dom_bb = match func.basic_blocks.iter().find(|bb| &bb.name == idom) {
        Some(bb) => bb,
        None => return,
    };
    let cond = match &dom_bb.term {
        Terminator::CondBr(condbr) => &condbr.condition,
        _ => return,
    };
    debug!(
        "dominator edge in {:?}: block {} depends on the branch ending {}",
        func.name, block, idom
    );
    sites.push(InstrumentationSite {
        block: block.clone(),
        pos,
        placement: Placement::Before,
        callee: EntryPoint::LogDominator,
        args: vec![CallArg::Int(cond.clone()), CallArg::Int(value.clone())],
        capture: None,
    });
}
