use crate::last_branch::LastBranchPlan;
use crate::runtime_api::{EntryPoint, FuncHandle, RuntimeRegistry};
use crate::site::InstrumentationSite;
use crate::strings::{InternedStrings, StrId};
use std::collections::HashMap;

/// Everything planned for one function.
pub struct FunctionPlan {
    /// Planned runtime calls, in visitation order.
    pub sites: Vec<InstrumentationSite>,
    /// Present when the function returns through an out-parameter and its
    /// unconditional branches stamp the attribution scratch cell.
    pub last_branch: Option<LastBranchPlan>,
}

impl FunctionPlan {
    /// The sites targeting one particular entry point.
    pub fn sites_calling(&self, callee: EntryPoint) -> impl Iterator<Item = &InstrumentationSite> {
        self.sites.iter().filter(move |site| site.callee == callee)
    }
}

/// The complete instrumentation decision for one module: which functions
/// get which runtime calls, the string constants those calls share, and the
/// declared runtime API.
pub struct InstrumentationPlan {
    pub(crate) functions: HashMap<String, FunctionPlan>,
    pub(crate) strings: InternedStrings,
    pub(crate) registry: RuntimeRegistry,
    pub(crate) ctors: Vec<FuncHandle>,
}

impl InstrumentationPlan {
    /// The plan for a function, or `None` if the function was filtered out.
    pub fn function_plan(&self, name: &str) -> Option<&FunctionPlan> {
        self.functions.get(name)
    }

    /// Names of all functions selected for instrumentation.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(|name| name.as_str())
    }

    /// Was this function selected for instrumentation at all?
    pub fn is_instrumented(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// The content of an interned string argument.
    pub fn string(&self, id: StrId) -> &str {
        self.strings.get(id)
    }

    /// The module's interned string table.
    pub fn strings(&self) -> &InternedStrings {
        &self.strings
    }

    /// The declared runtime entry points.
    pub fn registry(&self) -> &RuntimeRegistry {
        &self.registry
    }

    /// Handles to append to the module's global constructors, in order.
    pub fn global_ctors(&self) -> &[FuncHandle] {
        &self.ctors
    }

    /// Total number of planned sites across all functions.
    pub fn site_count(&self) -> usize {
        self.functions.values().map(|f| f.sites.len()).sum()
    }
}
