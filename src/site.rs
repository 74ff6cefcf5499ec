use crate::runtime_api::EntryPoint;
use crate::strings::StrId;
use itertools::Itertools;
use llvm_ir::{Name, Operand};
use std::fmt;

/// Where within a basic block a site anchors.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum InstrPos {
    /// The `n`th instruction of the block.
    Instr(usize),
    /// The block terminator.
    Term,
}

/// Where the emitted call lands relative to its anchor.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Placement {
    Before,
    After,
}

/// Binds the return value of a two-phase `taint_store` call to the
/// `set_taint_label` call that applies it after the store.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct CaptureId(pub(crate) u32);

/// One materialized argument of a planned runtime call.
#[derive(PartialEq, Clone, Debug)]
pub enum CallArg {
    /// An existing pointer value, cast to `i8*`.
    Ptr(Operand),
    /// The anchor instruction's own pointer result, cast to `i8*`.
    PtrResult(Name),
    /// An existing integer or floating-point value, widened or truncated to
    /// `i64` (floats by truncating conversion).
    Int(Operand),
    /// The anchor instruction's own scalar result, widened to `i64`.
    IntResult(Name),
    /// A fresh re-read through this pointer, passed as `i64`. Used where
    /// the anchor's own result cannot be referenced before it exists.
    ReloadedInt(Operand),
    /// Immediate.
    U64(u64),
    /// Interned string constant.
    Str(StrId),
    /// The label captured from the paired two-phase call.
    Captured(CaptureId),
    /// Runtime-computed line of the last taken unconditional branch
    /// (scratch cell high half).
    ScratchLine,
    /// Runtime-computed column of the last taken unconditional branch
    /// (scratch cell low half).
    ScratchCol,
}

/// A single instrumentation decision: which runtime entry point to call,
/// where, and with what arguments.
#[derive(PartialEq, Clone, Debug)]
pub struct InstrumentationSite {
    pub block: Name,
    pub pos: InstrPos,
    pub placement: Placement,
    pub callee: EntryPoint,
    pub args: Vec<CallArg>,
    /// Set when this call's return value is consumed by a later site.
    pub capture: Option<CaptureId>,
}

impl fmt::Display for InstrumentationSite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let args = self.args.iter().map(|a| format!("{:?}", a)).join(", ");
        write!(
            f,
            "{} {:?} in block {}: {}({})",
            match self.placement {
                Placement::Before => "before",
                Placement::After => "after",
            },
            self.pos,
            self.block,
            self.callee.symbol(),
            args
        )
    }
}
