use llvm_ir::{Function, Name, Terminator};

/// A stamp written to the per-function scratch cell just before an
/// unconditional branch, recording where that branch came from.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct BranchStamp {
    pub block: Name,
    pub line: u64,
    pub column: u64,
}

/// Plan for attributing a structured-return function's result to the last
/// unconditional branch taken before returning.
///
/// The function's logical result is written through a hidden out-parameter,
/// so the return instruction's own location is uninformative. One 64-bit
/// scratch cell, zero-initialized at function entry, is overwritten at every
/// unconditional branch with the packed location of that branch; the return
/// site reads it back and attributes the out-parameter there.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct LastBranchPlan {
    pub stamps: Vec<BranchStamp>,
}

/// Pack a source position into the scratch-cell representation.
pub fn pack_branch_loc(line: u64, column: u64) -> u64 {
    (line << 32) | (column & 0xFFFF_FFFF)
}

/// Split a scratch-cell value back into `(line, column)`.
pub fn unpack_branch_loc(packed: u64) -> (u64, u64) {
    (packed >> 32, packed & 0xFFFF_FFFF)
}

/// Collect the scratch-cell stamps for `func`: one per unconditional branch
/// whose location resolves.
pub(crate) fn collect_stamps(func: &Function) -> LastBranchPlan {
    let mut stamps = Vec::new();
    for bb in &func.basic_blocks {
        if let Terminator::Br(br) = &bb.term {
            if let Some(loc) = &br.debugloc {
                stamps.push(BranchStamp {
                    block: bb.name.clone(),
                    line: loc.line as u64,
                    column: loc.col.map(|c| c as u64).unwrap_or(0),
                });
            }
        }
    }
    LastBranchPlan { stamps }
}
