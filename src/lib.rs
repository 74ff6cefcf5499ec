mod config;
mod driver;
mod implicit_flow;
mod labels;
mod last_branch;
mod plan;
mod policy;
mod runtime;
mod runtime_api;
mod site;
mod source_loc;
mod strings;
mod type_info;

pub use crate::config::Config;
pub use crate::labels::{Label, LabelRange, SourceLabelAllocator, MAX_LABELS};
pub use crate::last_branch::{pack_branch_loc, unpack_branch_loc, BranchStamp, LastBranchPlan};
pub use crate::plan::{FunctionPlan, InstrumentationPlan};
pub use crate::runtime::{LabelLog, RecordLocation, RuntimeConfig, ShadowMemory, TaintRuntime};
pub use crate::runtime_api::{AbiType, EntryPoint, FuncHandle, RuntimeRegistry, Signature};
pub use crate::site::{CallArg, CaptureId, InstrPos, InstrumentationSite, Placement};
pub use crate::source_loc::SourceLocation;
pub use crate::strings::{InternedStrings, StrId};

use llvm_ir::Module;

/// The main function in this crate. Given an LLVM module, decides every
/// runtime call the module needs for dynamic taint tracking and returns the
/// resulting `InstrumentationPlan`.
///
/// The plan is self-contained: per-function call sites in visitation order,
/// the interned string constants they share, the declared runtime entry
/// points, and the global-constructor registration for `taint_start`. A
/// host emitter materializes the plan as IR; the calls it emits target the
/// `TaintRuntime` propagation contract.
pub fn instrument_module(module: &Module, config: &Config) -> InstrumentationPlan {
    driver::ModuleInstrumenter::run(module, config)
}
