use log::warn;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Compile-time configuration for the instrumentation pass.
#[non_exhaustive]
pub struct Config {
    /// Functions which should never be instrumented, by exact name.
    /// Typically populated from on-disk ignore lists; see
    /// `read_ignore_lists`.
    pub ignore_functions: HashSet<String>,
    /// Source-path prefixes whose internal flows are deliberately not
    /// instrumented. Any site whose resolved path starts with one of these
    /// roots is dropped.
    pub excluded_path_roots: Vec<String>,
    /// Name prefix shared by all runtime entry points. Functions with this
    /// prefix are never instrumented.
    pub runtime_function_prefix: String,
    /// Name of the program entry point. It is instrumented even without
    /// debug metadata, and receives the one-time argv seeding call.
    pub entry_function: String,
    /// Aggregate type-name prefixes treated as library-internal; allocas of
    /// these types are not instrumented.
    pub library_aggregate_prefixes: Vec<String>,
    /// Mangled-name prefixes identifying anonymous-namespace functions,
    /// which are skipped entirely.
    pub anonymous_namespace_prefixes: Vec<String>,
    /// Construction-in-place calls are only instrumented when the pointee
    /// allocation size exceeds this many bytes.
    pub min_ctor_region_bytes: u64,
    /// Byte width of a pointer on the target.
    pub pointer_size_bytes: u64,
    /// When set, the pass declares the runtime API but plans no sites.
    pub bypass: bool,
    /// Verbose per-instruction logging while planning.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_functions: HashSet::new(),
            excluded_path_roots: vec!["/cxx_lib".into()],
            runtime_function_prefix: "__taint_".into(),
            entry_function: "main".into(),
            library_aggregate_prefixes: vec!["class.std".into(), "struct".into()],
            anonymous_namespace_prefixes: vec![
                "_ZN12_GLOBAL__N_".into(),
                "_ZNK12_GLOBAL__N_".into(),
            ],
            min_ctor_region_bytes: 1,
            pointer_size_bytes: 8,
            bypass: false,
            debug: false,
        }
    }
}

impl Config {
    /// A default `Config` with the debug and bypass toggles taken from the
    /// `TAINT_DEBUG` and `TAINT_NO_INSTRUMENT` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.debug = std::env::var_os("TAINT_DEBUG").is_some();
        config.bypass = std::env::var_os("TAINT_NO_INSTRUMENT").is_some();
        config
    }

    /// Read function names from the given ignore-list files into
    /// `ignore_functions`. Each line names one function; blank lines and
    /// `#` comments are skipped. Unreadable files are reported and skipped.
    pub fn read_ignore_lists(&mut self, paths: impl IntoIterator<Item = impl AsRef<Path>>) {
        for path in paths {
            let path = path.as_ref();
            let contents = match fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("Failed to read ignore list {:?}: {}", path, e);
                    continue;
                },
            };
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                self.ignore_functions.insert(line.to_owned());
            }
        }
    }

    /// Is this path under one of the excluded library roots?
    pub fn is_excluded_path(&self, path: &str) -> bool {
        self.excluded_path_roots.iter().any(|root| path.starts_with(root.as_str()))
    }

    /// Is this aggregate type name reserved as library-internal?
    pub fn is_library_aggregate(&self, type_name: &str) -> bool {
        self.library_aggregate_prefixes
            .iter()
            .any(|prefix| type_name.starts_with(prefix.as_str()))
    }
}
