use crate::config::Config;
use crate::last_branch::{self, LastBranchPlan};
use crate::runtime_api::EntryPoint;
use crate::site::{CallArg, CaptureId, InstrPos, InstrumentationSite, Placement};
use crate::source_loc::{FunctionContext, SourceLocation};
use crate::strings::InternedStrings;
use crate::type_info::{self, ScalarKind};
use either::Either;
use llvm_ir::debugloc::DebugLoc;
use llvm_ir::function::ParameterAttribute;
use llvm_ir::instruction::{Alloca, Call, GetElementPtr, Load, Store};
use llvm_ir::terminator::{Invoke, Ret};
use llvm_ir::{Constant, Function, Instruction, Module, Name, Operand, Terminator, Type};
use log::debug;

/// Walks one function's instructions and decides the runtime calls for it.
///
/// All state here is scoped to the function being visited; the driver
/// creates one engine per eligible function and `run` consumes it, so no
/// cache can leak across functions.
pub(crate) struct FunctionInstrumenter<'m, 'a> {
    module: &'m Module,
    config: &'a Config,
    strings: &'a mut InternedStrings,
    func: &'m Function,
    ctx: FunctionContext,
    sites: Vec<InstrumentationSite>,
    next_capture: u32,
}

impl<'m, 'a> FunctionInstrumenter<'m, 'a> {
    pub fn new(
        module: &'m Module,
        config: &'a Config,
        strings: &'a mut InternedStrings,
        func: &'m Function,
    ) -> Self {
        Self {
            module,
            config,
            strings,
            func,
            ctx: FunctionContext::new(),
            sites: Vec::new(),
            next_capture: 0,
        }
    }

    /// Visit every instruction and terminator once, in block order.
    /// Returns the planned sites, plus the last-branch plan when this
    /// function returns through an out-parameter.
    pub fn run(mut self) -> (Vec<InstrumentationSite>, Option<LastBranchPlan>) {
        let mut last_branch = None;
        let func = self.func; // allows borrowing the blocks alongside `self`
        for bb in &func.basic_blocks {
            for (i, inst) in bb.instrs.iter().enumerate() {
                self.visit_instruction(&bb.name, i, inst);
            }
            self.visit_terminator(&bb.name, &bb.term, &mut last_branch);
        }
        (self.sites, last_branch)
    }

    fn visit_instruction(&mut self, block: &Name, index: usize, inst: &Instruction) {
        if self.config.debug {
            debug!("planning {:?}", inst);
        }
        match inst {
            Instruction::GetElementPtr(gep) => self.visit_gep(block, index, gep),
            Instruction::Load(load) => self.visit_load(block, index, load),
            Instruction::Store(store) => self.visit_store(block, index, store),
            Instruction::Alloca(alloca) => self.visit_alloca(block, index, alloca),
            Instruction::Call(call) => self.visit_call(block, index, call),
            _ => {}, // no instrumentation decision for the remaining kinds
        }
    }

    fn visit_terminator(
        &mut self,
        block: &Name,
        term: &Terminator,
        last_branch: &mut Option<LastBranchPlan>,
    ) {
        match term {
            Terminator::Ret(ret) => self.visit_ret(block, ret, last_branch),
            Terminator::Invoke(invoke) => self.visit_invoke(block, invoke),
            _ => {},
        }
    }

    fn visit_gep(&mut self, block: &Name, index: usize, gep: &GetElementPtr) {
        let pos = InstrPos::Instr(index);
        self.log_operand_label(block, pos, &gep.debugloc, &gep.address, "getelementptr");
        for idx in &gep.indices {
            if let Operand::ConstantOperand(c) = idx {
                if matches!(c.as_ref(), Constant::Int { .. }) {
                    continue;
                }
            }
            self.log_operand_label(block, pos, &gep.debugloc, idx, "getelementptr");
        }
    }

    fn visit_load(&mut self, block: &Name, index: usize, load: &Load) {
        let pos = InstrPos::Instr(index);
        self.log_operand_label(block, pos, &load.debugloc, &load.address, "load");
        if let Some(ScalarKind::Integer(_)) = type_info::pointee_kind(&load.address) {
            // The load's own result does not dominate an insertion point
            // before the load; log a fresh re-read of the pointee instead.
            // The raw address label and the value label can legitimately
            // differ, so both are logged.
            if let Some(loc) = self.resolve_location(&load.debugloc, None) {
                let opcode = self.strings.intern("load");
                let mut args = vec![CallArg::ReloadedInt(load.address.clone()), CallArg::Str(opcode)];
                args.extend(self.location_args(&loc).iter().cloned());
                self.push_site(block, pos, Placement::Before, EntryPoint::LogLabel, args, None);
            }
        }
        if let Some(loc) = &load.debugloc {
            self.ctx.record(load.dest.clone(), loc.clone());
        }
    }

    fn visit_store(&mut self, block: &Name, index: usize, store: &Store) {
        self.log_operand_label(block, InstrPos::Instr(index), &store.debugloc, &store.value, "store");
        self.plan_taint_store(block, index, store);
    }

    /// The two-phase store hook. Phase one runs before the store and
    /// returns the label to apply; phase two runs after the store and
    /// applies it, so the plain memory write in between cannot clobber the
    /// label.
    fn plan_taint_store(&mut self, block: &Name, index: usize, store: &Store) {
        let bits = match type_info::operand_kind(&store.value) {
            Some(ScalarKind::Integer(bits)) => bits,
            _ => return,
        };
        // the store's own location only; no cache fallback here
        let loc = match &store.debugloc {
            Some(loc) => SourceLocation::from_debugloc(loc, &self.func.name),
            None => return,
        };
        if self.config.is_excluded_path(&loc.path) {
            return;
        }
        let size = bits as u64 / 8;
        let capture = CaptureId(self.next_capture);
        self.next_capture += 1;
        let mut args = vec![
            CallArg::Ptr(store.address.clone()),
            CallArg::Int(store.value.clone()),
            CallArg::U64(size),
        ];
        args.extend(self.location_args(&loc).iter().cloned());
        self.push_site(
            block,
            InstrPos::Instr(index),
            Placement::Before,
            EntryPoint::TaintStore,
            args,
            Some(capture),
        );
        self.push_site(
            block,
            InstrPos::Instr(index),
            Placement::After,
            EntryPoint::SetTaintLabel,
            vec![
                CallArg::Ptr(store.address.clone()),
                CallArg::U64(size),
                CallArg::Captured(capture),
            ],
            None,
        );
    }

    /// Only aggregate locals are instrumented, to bound overhead; the
    /// runtime treats the allocation as a taint-clearing event.
    fn visit_alloca(&mut self, block: &Name, index: usize, alloca: &Alloca) {
        if !type_info::is_aggregate(&alloca.allocated_type) {
            return;
        }
        if let Some(name) = type_info::aggregate_name(&alloca.allocated_type) {
            if self.config.is_library_aggregate(name) {
                debug!("skipping library-internal alloca of {:?}", name);
                return;
            }
        }
        let size = match type_info::alloc_size_bytes(&alloca.allocated_type, self.module, self.config) {
            Some(size) => size,
            None => return,
        };
        let function = self.strings.intern(&self.func.name);
        self.push_site(
            block,
            InstrPos::Instr(index),
            Placement::After,
            EntryPoint::TaintAlloca,
            vec![
                CallArg::PtrResult(alloca.dest.clone()),
                CallArg::U64(size),
                CallArg::Str(function),
            ],
            None,
        );
    }

    fn visit_call(&mut self, block: &Name, index: usize, call: &Call) {
        if let Some(name) = callee_name(call) {
            if name.starts_with("llvm.") {
                self.visit_intrinsic(block, index, call, name);
                return;
            }
        }
        self.plan_taint_ctor(
            block,
            InstrPos::Instr(index),
            &call.debugloc,
            call.arguments.first().map(|(op, _)| op),
        );
        // track the taint of the call's own result
        if let Some(dest) = &call.dest {
            if let Some(kind) = callee_result_kind(call) {
                self.log_result_label(block, InstrPos::Instr(index), &call.debugloc, dest, kind, "call");
            }
        }
    }

    fn visit_intrinsic(&mut self, block: &Name, index: usize, call: &Call, name: &str) {
        if name.starts_with("llvm.memcpy") {
            self.plan_memcpy(block, index, call);
        } else if name.starts_with("llvm.dbg.value") {
            if let Some((op, _)) = call.arguments.first() {
                if type_info::operand_kind(op) == Some(ScalarKind::Pointer) {
                    self.log_operand_label(block, InstrPos::Instr(index), &call.debugloc, op, "call");
                }
            }
        }
        // lifetime-end and the remaining intrinsics are deliberate no-ops
    }

    /// The runtime owns per-byte propagation for bulk copies; the pass only
    /// forwards the region descriptor.
    fn plan_memcpy(&mut self, block: &Name, index: usize, call: &Call) {
        let loc = match &call.debugloc {
            Some(loc) => SourceLocation::from_debugloc(loc, &self.func.name),
            None => return,
        };
        if self.config.is_excluded_path(&loc.path) {
            return;
        }
        let (dest, src, len) = match (call.arguments.get(0), call.arguments.get(1), call.arguments.get(2)) {
            (Some((dest, _)), Some((src, _)), Some((len, _))) => (dest, src, len),
            _ => return,
        };
        let mut args = vec![
            CallArg::Ptr(dest.clone()),
            CallArg::Ptr(src.clone()),
            CallArg::Int(len.clone()),
        ];
        args.extend(self.location_args(&loc).iter().cloned());
        self.push_site(
            block,
            InstrPos::Instr(index),
            Placement::Before,
            EntryPoint::Memcpy,
            args,
            None,
        );
    }

    /// Construction-in-place: the callee writes its result through the
    /// pointer first argument, so seed or forward taint for that region
    /// before the call runs.
    fn plan_taint_ctor(
        &mut self,
        block: &Name,
        pos: InstrPos,
        own_loc: &Option<DebugLoc>,
        first_arg: Option<&Operand>,
    ) {
        let dest = match first_arg {
            Some(op) => op,
            None => return,
        };
        if type_info::operand_kind(dest) != Some(ScalarKind::Pointer) {
            return;
        }
        let loc = match own_loc {
            Some(loc) => SourceLocation::from_debugloc(loc, &self.func.name),
            None => return,
        };
        if self.config.is_excluded_path(&loc.path) {
            return;
        }
        let size = match type_info::pointee_alloc_size(dest, self.module, self.config) {
            Some(size) if size > self.config.min_ctor_region_bytes => size,
            _ => return,
        };
        let mut args = vec![CallArg::Ptr(dest.clone()), CallArg::U64(size)];
        args.extend(self.location_args(&loc).iter().cloned());
        self.push_site(block, pos, Placement::Before, EntryPoint::TaintCtor, args, None);
    }

    fn visit_ret(&mut self, block: &Name, ret: &Ret, last_branch: &mut Option<LastBranchPlan>) {
        if let Some(op) = &ret.return_operand {
            if type_info::operand_kind(op) == Some(ScalarKind::Pointer) {
                self.log_operand_label(block, InstrPos::Term, &ret.debugloc, op, "ret");
            }
        }
        if has_sret_param(self.func) {
            // the real result went through the out-parameter, not the
            // return value
            self.plan_last_branch_ret(block, last_branch);
        }
    }

    /// Attribute the out-parameter result to the last unconditional branch
    /// taken, not to the return instruction itself.
    fn plan_last_branch_ret(&mut self, block: &Name, last_branch: &mut Option<LastBranchPlan>) {
        let param = match self.func.parameters.first() {
            Some(param) => param,
            None => return,
        };
        let path = function_path(self.func).unwrap_or_default();
        if self.config.is_excluded_path(&path) {
            return;
        }
        if last_branch.is_none() {
            *last_branch = Some(last_branch::collect_stamps(self.func));
        }
        let result = Operand::LocalOperand {
            name: param.name.clone(),
            ty: param.ty.clone(),
        };
        let opcode = self.strings.intern("ret_ptr");
        let path = self.strings.intern(&path);
        let function = self.strings.intern(&self.func.name);
        self.push_site(
            block,
            InstrPos::Term,
            Placement::Before,
            EntryPoint::LogLabelPtr,
            vec![
                CallArg::Ptr(result),
                CallArg::Str(opcode),
                CallArg::Str(path),
                CallArg::ScratchLine,
                CallArg::ScratchCol,
                CallArg::Str(function),
            ],
            None,
        );
    }

    fn visit_invoke(&mut self, block: &Name, invoke: &Invoke) {
        if !invoke_has_sret_callee(self.module, invoke) {
            return;
        }
        self.plan_taint_ctor(
            block,
            InstrPos::Term,
            &invoke.debugloc,
            invoke.arguments.first().map(|(op, _)| op),
        );
    }

    /// Plan a label-logging call for an existing value. Pointer values log
    /// through shadow memory (`log_label_ptr`); integer and floating-point
    /// values log directly (`log_label`); anything else logs nothing.
    fn log_operand_label(
        &mut self,
        block: &Name,
        pos: InstrPos,
        own_loc: &Option<DebugLoc>,
        value: &Operand,
        opcode: &str,
    ) {
        let loc = match self.resolve_location(own_loc, operand_name(value)) {
            Some(loc) => loc,
            None => return,
        };
        match type_info::operand_kind(value) {
            Some(ScalarKind::Pointer) => {
                let opcode = self.strings.intern(&format!("{}_ptr", opcode));
                let mut args = vec![CallArg::Ptr(value.clone()), CallArg::Str(opcode)];
                args.extend(self.location_args(&loc).iter().cloned());
                self.push_site(block, pos, Placement::Before, EntryPoint::LogLabelPtr, args, None);
            },
            Some(ScalarKind::Integer(_)) | Some(ScalarKind::Float) => {
                let opcode = self.strings.intern(opcode);
                let mut args = vec![CallArg::Int(value.clone()), CallArg::Str(opcode)];
                args.extend(self.location_args(&loc).iter().cloned());
                self.push_site(block, pos, Placement::Before, EntryPoint::LogLabel, args, None);
            },
            None => {},
        }
    }

    /// Plan a label-logging call for the anchor's own result, placed after
    /// the anchor so the result exists at the call.
    fn log_result_label(
        &mut self,
        block: &Name,
        pos: InstrPos,
        own_loc: &Option<DebugLoc>,
        result: &Name,
        kind: ScalarKind,
        opcode: &str,
    ) {
        let loc = match self.resolve_location(own_loc, Some(result)) {
            Some(loc) => loc,
            None => return,
        };
        match kind {
            ScalarKind::Pointer => {
                let opcode = self.strings.intern(&format!("{}_ptr", opcode));
                let mut args = vec![CallArg::PtrResult(result.clone()), CallArg::Str(opcode)];
                args.extend(self.location_args(&loc).iter().cloned());
                self.push_site(block, pos, Placement::After, EntryPoint::LogLabelPtr, args, None);
            },
            ScalarKind::Integer(_) | ScalarKind::Float => {
                let opcode = self.strings.intern(opcode);
                let mut args = vec![CallArg::IntResult(result.clone()), CallArg::Str(opcode)];
                args.extend(self.location_args(&loc).iter().cloned());
                self.push_site(block, pos, Placement::After, EntryPoint::LogLabel, args, None);
            },
        }
    }

    /// Resolve the location to attribute to a site, suppressing excluded
    /// library paths entirely.
    fn resolve_location(
        &self,
        own: &Option<DebugLoc>,
        value_hint: Option<&Name>,
    ) -> Option<SourceLocation> {
        let loc = self.ctx.resolve(own, value_hint)?;
        let resolved = SourceLocation::from_debugloc(&loc, &self.func.name);
        if self.config.is_excluded_path(&resolved.path) {
            return None;
        }
        Some(resolved)
    }

    /// The trailing (path, line, column, function) argument group shared by
    /// the located entry points.
    fn location_args(&mut self, loc: &SourceLocation) -> [CallArg; 4] {
        [
            CallArg::Str(self.strings.intern(&loc.path)),
            CallArg::U64(loc.line),
            CallArg::U64(loc.column),
            CallArg::Str(self.strings.intern(&loc.function)),
        ]
    }

    fn push_site(
        &mut self,
        block: &Name,
        pos: InstrPos,
        placement: Placement,
        callee: EntryPoint,
        args: Vec<CallArg>,
        capture: Option<CaptureId>,
    ) {
        self.sites.push(InstrumentationSite {
            block: block.clone(),
            pos,
            placement,
            callee,
            args,
            capture,
        });
    }
}

fn operand_name(op: &Operand) -> Option<&Name> {
    match op {
        Operand::LocalOperand { name, .. } => Some(name),
        _ => None,
    }
}

/// Name of the directly called function, when the callee is a named global.
fn callee_name(call: &Call) -> Option<&str> {
    match &call.function {
        Either::Right(Operand::ConstantOperand(cref)) => match cref.as_ref() {
            Constant::GlobalReference { name: Name::Name(name), .. } => Some(name.as_str()),
            _ => None,
        },
        _ => None,
    }
}

/// Scalar kind of the value a call produces, from the callee's type.
fn callee_result_kind(call: &Call) -> Option<ScalarKind> {
    let func_ty = match &call.function {
        Either::Right(Operand::ConstantOperand(cref)) => match cref.as_ref() {
            Constant::GlobalReference { ty, .. } => ty.clone(),
            _ => return None,
        },
        Either::Right(Operand::LocalOperand { ty, .. }) => match ty.as_ref() {
            Type::PointerType { pointee_type, .. } => pointee_type.clone(),
            _ => return None,
        },
        _ => return None,
    };
    match func_ty.as_ref() {
        Type::FuncType { result_type, .. } => type_info::scalar_kind(result_type),
        _ => None,
    }
}

/// Does this function receive its result through a structured-return
/// (hidden out-parameter) first argument?
pub(crate) fn has_sret_param(func: &Function) -> bool {
    func.parameters
        .first()
        .map(|p| p.attributes.iter().any(|a| matches!(a, ParameterAttribute::SRet)))
        .unwrap_or(false)
}

/// Does the invoked callee declare a structured-return first parameter?
/// The call-site attributes are checked first, then the callee definition
/// when it is in this module.
fn invoke_has_sret_callee(module: &Module, invoke: &Invoke) -> bool {
    if let Some((_, attrs)) = invoke.arguments.first() {
        if attrs.iter().any(|a| matches!(a, ParameterAttribute::SRet)) {
            return true;
        }
    }
    match &invoke.function {
        Either::Right(Operand::ConstantOperand(cref)) => match cref.as_ref() {
            Constant::GlobalReference { name: Name::Name(name), .. } => module
                .get_func_by_name(name.as_str())
                .map(has_sret_param)
                .unwrap_or(false),
            _ => false,
        },
        _ => false,
    }
}

/// Source path of a function, from its own debug metadata.
pub(crate) fn function_path(func: &Function) -> Option<String> {
    func.debugloc
        .as_ref()
        .map(crate::source_loc::SourceLocation::path_of)
}
