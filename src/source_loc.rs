use llvm_ir::debugloc::DebugLoc;
use llvm_ir::Name;
use std::collections::HashMap;

/// A resolved source position for a program point.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SourceLocation {
    pub path: String,
    pub line: u64,
    pub column: u64,
    pub function: String,
}

impl SourceLocation {
    /// The `directory/filename` join for a debug location.
    pub(crate) fn path_of(loc: &DebugLoc) -> String {
        match &loc.directory {
            Some(dir) if !dir.is_empty() => format!("{}/{}", dir, loc.filename),
            _ => loc.filename.clone(),
        }
    }

    pub(crate) fn from_debugloc(loc: &DebugLoc, function: &str) -> Self {
        Self {
            path: Self::path_of(loc),
            line: loc.line as u64,
            column: loc.col.map(|c| c as u64).unwrap_or(0),
            function: function.to_owned(),
        }
    }
}

/// Per-function scratch state for the pass: a cache from value identity to
/// the debug location where that value was produced.
///
/// Loads populate the cache for their result, so a later instruction
/// referencing the loaded value without debug metadata of its own can still
/// be attributed. The context never outlives the function being visited.
#[derive(Default)]
pub(crate) struct FunctionContext {
    value_locations: HashMap<Name, DebugLoc>,
}

impl FunctionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember where `value` was produced.
    pub fn record(&mut self, value: Name, loc: DebugLoc) {
        self.value_locations.insert(value, loc);
    }

    /// Resolve a location for a program point: the point's own debug
    /// metadata wins; otherwise fall back to the recorded location of the
    /// value the point operates on.
    pub fn resolve(&self, own: &Option<DebugLoc>, value: Option<&Name>) -> Option<DebugLoc> {
        if let Some(loc) = own {
            return Some(loc.clone());
        }
        value.and_then(|name| self.value_locations.get(name).cloned())
    }
}
