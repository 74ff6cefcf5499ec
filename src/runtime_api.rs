use std::collections::HashMap;

/// Argument and return types of the runtime ABI, as the emitter sees them.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum AbiType {
    Void,
    /// `i8*`
    BytePtr,
    /// `i8*` holding NUL-terminated string data
    Str,
    /// `i64`
    Int64,
    /// The label type
    Label,
}

/// Signature of a runtime entry point.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Signature {
    pub params: &'static [AbiType],
    pub ret: AbiType,
}

/// The closed set of runtime entry points the pass may call.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum EntryPoint {
    /// Global constructor; runtime initialization, called before any other
    /// entry point.
    TaintStart,
    /// Records that a label influenced a branch (currently advisory).
    LogConditionalBranch,
    /// Logs a scalar value's taint relationship at a source location.
    LogLabel,
    /// Logs a pointer's taint relationship; the runtime resolves the label
    /// by reading shadow memory at the pointer.
    LogLabelPtr,
    /// Two-phase store hook; returns the label to apply after the store.
    TaintStore,
    /// Clears, and for larger regions re-seeds, taint for a freshly
    /// allocated aggregate.
    TaintAlloca,
    /// Seeds or forwards taint for an in-place-constructed region.
    TaintCtor,
    /// Applies a label run uniformly across a byte range.
    SetTaintLabel,
    /// Per-byte label propagation between two regions.
    Memcpy,
    /// Records an implicit control-dependency edge between two labels.
    LogDominator,
    /// Seeds taint from the program's command-line arguments.
    TaintArgv,
}

impl EntryPoint {
    /// The fixed table declared for every module before any instruction is
    /// visited. `TaintArgv` is absent: it is declared on demand, only for
    /// modules containing the program entry point.
    pub const FIXED_TABLE: [EntryPoint; 10] = [
        EntryPoint::TaintStart,
        EntryPoint::LogConditionalBranch,
        EntryPoint::LogLabel,
        EntryPoint::LogLabelPtr,
        EntryPoint::TaintStore,
        EntryPoint::TaintAlloca,
        EntryPoint::TaintCtor,
        EntryPoint::SetTaintLabel,
        EntryPoint::Memcpy,
        EntryPoint::LogDominator,
    ];

    /// The external symbol this entry point is declared as. All runtime
    /// symbols share the `__taint_` prefix, so the driver's
    /// self-instrumentation filter is a prefix test.
    pub fn symbol(self) -> &'static str {
        match self {
            EntryPoint::TaintStart => "__taint_start",
            EntryPoint::LogConditionalBranch => "__taint_log_conditional_branch",
            EntryPoint::LogLabel => "__taint_log_label",
            EntryPoint::LogLabelPtr => "__taint_log_label_ptr",
            EntryPoint::TaintStore => "__taint_store",
            EntryPoint::TaintAlloca => "__taint_alloca",
            EntryPoint::TaintCtor => "__taint_ctor",
            EntryPoint::SetTaintLabel => "__taint_set_label",
            EntryPoint::Memcpy => "__taint_memcpy",
            EntryPoint::LogDominator => "__taint_log_dominator",
            EntryPoint::TaintArgv => "__taint_argv",
        }
    }

    pub fn signature(self) -> Signature {
        use AbiType::*;
        match self {
            EntryPoint::TaintStart => Signature { params: &[], ret: Void },
            EntryPoint::LogConditionalBranch => Signature { params: &[Label], ret: Void },
            EntryPoint::LogLabel => Signature {
                params: &[Int64, Str, Str, Int64, Int64, Str],
                ret: Void,
            },
            EntryPoint::LogLabelPtr => Signature {
                params: &[BytePtr, Str, Str, Int64, Int64, Str],
                ret: Void,
            },
            EntryPoint::TaintStore => Signature {
                params: &[BytePtr, Int64, Int64, Str, Int64, Int64, Str],
                ret: Label,
            },
            EntryPoint::TaintAlloca => Signature {
                params: &[BytePtr, Int64, Str],
                ret: Label,
            },
            EntryPoint::TaintCtor => Signature {
                params: &[BytePtr, Int64, Str, Int64, Int64, Str],
                ret: Label,
            },
            EntryPoint::SetTaintLabel => Signature {
                params: &[BytePtr, Int64, Label],
                ret: Void,
            },
            EntryPoint::Memcpy => Signature {
                params: &[BytePtr, BytePtr, Int64, Str, Int64, Int64, Str],
                ret: Void,
            },
            EntryPoint::LogDominator => Signature { params: &[Int64, Int64], ret: Void },
            EntryPoint::TaintArgv => Signature { params: &[Int64, BytePtr], ret: Void },
        }
    }
}

/// Handle to a declared runtime function, stable for the life of a module
/// pass.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct FuncHandle(pub(crate) u32);

/// Declares the runtime call targets used by the pass, once per module.
///
/// Declaration is idempotent: re-declaring an entry point is a no-op that
/// returns the handle created the first time. Every other component assumes
/// the fixed table exists before the first instruction is visited; the
/// driver guarantees this by calling `declare_all` up front.
#[derive(Default)]
pub struct RuntimeRegistry {
    handles: HashMap<EntryPoint, FuncHandle>,
    declared: Vec<EntryPoint>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare one entry point, returning the existing handle if it was
    /// already declared in this module.
    pub fn declare(&mut self, entry: EntryPoint) -> FuncHandle {
        if let Some(&handle) = self.handles.get(&entry) {
            return handle;
        }
        let handle = FuncHandle(self.declared.len() as u32);
        self.handles.insert(entry, handle);
        self.declared.push(entry);
        handle
    }

    /// Declare the fixed entry-point table.
    pub fn declare_all(&mut self) {
        for &entry in EntryPoint::FIXED_TABLE.iter() {
            self.declare(entry);
        }
    }

    /// The handle for an entry point, if it has been declared.
    pub fn handle(&self, entry: EntryPoint) -> Option<FuncHandle> {
        self.handles.get(&entry).copied()
    }

    /// Entry points in declaration order.
    pub fn declared(&self) -> &[EntryPoint] {
        &self.declared
    }
}
