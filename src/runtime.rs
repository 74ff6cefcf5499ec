use crate::labels::{Label, SourceLabelAllocator, MAX_LABELS};
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Byte-granular label storage for the instrumented program's memory.
///
/// The storage itself lives outside this crate; the runtime only requires
/// these two operations and serializes access through its own lock.
pub trait ShadowMemory {
    /// The label of the byte at `addr`.
    fn read_label(&self, addr: u64) -> Label;
    /// Apply `label` to `size` bytes starting at `addr`.
    fn set_label(&mut self, label: Label, addr: u64, size: u64);
}

/// Source position attached to a runtime record.
#[derive(Clone, Copy, Debug)]
pub struct RecordLocation<'a> {
    pub path: &'a str,
    pub line: u64,
    pub column: u64,
    pub function: &'a str,
}

/// Append-only, line-oriented record sink.
///
/// A sink that failed to open degrades to a no-op rather than crashing the
/// instrumented program; consumers read records in file order, which is the
/// only ordering guarantee.
pub struct LabelLog {
    out: Option<Box<dyn Write + Send>>,
}

impl LabelLog {
    /// Open a log at `path`. On failure, reports to stderr and returns a
    /// disabled sink.
    pub fn to_path(path: &Path) -> Self {
        match File::create(path) {
            Ok(file) => Self {
                out: Some(Box::new(BufWriter::new(file))),
            },
            Err(e) => {
                eprintln!("Cannot open label log file {:?}: {}", path, e);
                Self::disabled()
            },
        }
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Some(Box::new(writer)),
        }
    }

    pub fn disabled() -> Self {
        Self { out: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.out.is_some()
    }

    fn label_record(&mut self, label: Label, opcode: &str, loc: &RecordLocation) {
        if let Some(out) = &mut self.out {
            let _ = writeln!(
                out,
                "- {{ kind: label, label: {}, opcode: {}, path: {}, line: {}, column: {}, function: {} }}",
                label, opcode, loc.path, loc.line, loc.column, loc.function
            );
            let _ = out.flush();
        }
    }

    fn update_record(&mut self, cause: &str, old_label: Label, new_label: Label, loc: &RecordLocation) {
        if let Some(out) = &mut self.out {
            let _ = writeln!(
                out,
                "- {{ kind: update, cause: {}, old_label: {}, new_label: {}, path: {}, line: {}, column: {}, function: {} }}",
                cause, old_label, new_label, loc.path, loc.line, loc.column, loc.function
            );
            let _ = out.flush();
        }
    }

    fn dominator_record(&mut self, dominator: Label, dependent: Label) {
        if let Some(out) = &mut self.out {
            let _ = writeln!(
                out,
                "- {{ kind: dominator, dominator: {}, dominates: {} }}",
                dominator, dependent
            );
            let _ = out.flush();
        }
    }

    fn event(&mut self, msg: &str) {
        if let Some(out) = &mut self.out {
            let _ = writeln!(out, "[*] {}", msg);
            let _ = out.flush();
        }
    }
}

/// Run-time configuration, read from the environment at startup.
#[non_exhaustive]
pub struct RuntimeConfig {
    /// Destination of the label log. `None` disables it.
    pub label_log: Option<PathBuf>,
    /// Destination of the secondary event log. `None` disables it.
    pub event_log: Option<PathBuf>,
    /// Also log untainted (label 0) events.
    pub log_untainted: bool,
    /// Verbose propagation diagnostics.
    pub debug: bool,
    /// Paths whose stores never create or move labels.
    pub excluded_path_roots: Vec<String>,
    /// Total number of labels available before exhaustion aborts.
    pub label_capacity: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            label_log: Some(PathBuf::from("label.log")),
            event_log: None,
            log_untainted: false,
            debug: false,
            excluded_path_roots: vec!["/cxx_lib".into()],
            label_capacity: MAX_LABELS,
        }
    }
}

impl RuntimeConfig {
    /// Read `TAINT_LABEL_LOG`, `TAINT_EVENT_LOG`, `TAINT_LOG_UNTAINTED` and
    /// `TAINT_DEBUG` from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(path) = std::env::var_os("TAINT_LABEL_LOG") {
            config.label_log = Some(PathBuf::from(path));
        }
        if let Some(path) = std::env::var_os("TAINT_EVENT_LOG") {
            config.event_log = Some(PathBuf::from(path));
        }
        config.log_untainted = std::env::var_os("TAINT_LOG_UNTAINTED").is_some();
        config.debug = std::env::var_os("TAINT_DEBUG").is_some();
        config
    }
}

struct RuntimeState<S> {
    shadow: S,
    sources: SourceLabelAllocator,
    label_log: LabelLog,
    event_log: LabelLog,
}

/// The process-wide taint propagation runtime the planned calls target.
///
/// Every entry point is inert until `start()` runs and after `shutdown()`;
/// racing threads initialize exactly once through the atomic flag. All
/// mutable state sits behind one lock, since instrumented stores, loads and
/// copies run concurrently across the program's threads.
pub struct TaintRuntime<S> {
    started: AtomicBool,
    shut_down: AtomicBool,
    log_untainted: bool,
    debug: bool,
    excluded_path_roots: Vec<String>,
    state: Mutex<RuntimeState<S>>,
}

impl<S: ShadowMemory> TaintRuntime<S> {
    /// Build a runtime over the given shadow storage, opening the sinks the
    /// configuration names. Entry points stay inert until `start()`.
    pub fn new(config: RuntimeConfig, shadow: S) -> Self {
        let label_log = match &config.label_log {
            Some(path) => LabelLog::to_path(path),
            None => LabelLog::disabled(),
        };
        let event_log = match &config.event_log {
            Some(path) => LabelLog::to_path(path),
            None => LabelLog::disabled(),
        };
        Self::with_sinks(config, shadow, label_log, event_log)
    }

    /// Build a runtime with explicit sinks instead of the configured paths.
    pub fn with_sinks(config: RuntimeConfig, shadow: S, label_log: LabelLog, event_log: LabelLog) -> Self {
        Self {
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            log_untainted: config.log_untainted,
            debug: config.debug,
            excluded_path_roots: config.excluded_path_roots,
            state: Mutex::new(RuntimeState {
                shadow,
                sources: SourceLabelAllocator::new(config.label_capacity),
                label_log,
                event_log,
            }),
        }
    }

    /// `taint_start`: global-constructor entry point. Returns `true` for
    /// the caller that actually performed initialization.
    pub fn start(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    /// Flush and disable all logging. Runs its work at most once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.lock();
        // dropping the sinks flushes any buffered records
        state.label_log = LabelLog::disabled();
        state.event_log = LabelLog::disabled();
    }

    fn is_active(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shut_down.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<RuntimeState<S>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_excluded_path(&self, path: &str) -> bool {
        self.excluded_path_roots.iter().any(|root| path.starts_with(root.as_str()))
    }

    /// `log_label`: record a scalar value's taint relationship.
    pub fn log_label(&self, label: Label, opcode: &str, loc: &RecordLocation) {
        if !self.is_active() {
            return;
        }
        let mut state = self.lock();
        if label > 0 || self.log_untainted {
            state.label_log.label_record(label, opcode, loc);
        }
    }

    /// `log_label_ptr`: resolve the label by reading shadow memory at the
    /// pointer, then record it.
    pub fn log_label_ptr(&self, ptr: u64, opcode: &str, loc: &RecordLocation) {
        if !self.is_active() || ptr == 0 {
            return;
        }
        let mut state = self.lock();
        let label = state.shadow.read_label(ptr);
        if label > 0 || self.log_untainted {
            state.label_log.label_record(label, opcode, loc);
        }
    }

    /// `log_conditional_branch`: advisory only; kept so the declared
    /// signature table and the runtime stay in step.
    pub fn log_conditional_branch(&self, _label: Label) {}

    /// `taint_store`: phase one of the two-phase store hook. Returns the
    /// label the paired `set_taint_label` call applies after the store.
    ///
    /// A tainted destination receiving an untainted value keeps its old
    /// label, so a plain overwrite never clears taint. Re-seeding every
    /// such store would exhaust the label budget.
    pub fn taint_store(
        &self,
        addr: u64,
        _value: u64,
        size: u64,
        value_label: Label,
        loc: &RecordLocation,
    ) -> Label {
        if !self.is_active() {
            return 0;
        }
        let mut state = self.lock();
        let dest_label = state.shadow.read_label(addr);
        if dest_label > 0 && value_label == 0 {
            if self.is_excluded_path(loc.path) {
                // no label movement inside excluded library code
                return dest_label;
            }
            state.shadow.set_label(dest_label, addr, size);
            state.label_log.label_record(dest_label, "store", loc);
            return dest_label;
        }
        if value_label > 0 || self.log_untainted {
            state.label_log.label_record(value_label, "store", loc);
        }
        // the plain store already carries the value's own label
        0
    }

    /// `set_taint_label`: apply a contiguous label run across a byte range.
    /// Label 0 and null addresses are no-ops.
    pub fn set_taint_label(&self, addr: u64, size: u64, start_label: Label) {
        if !self.is_active() || addr == 0 || start_label == 0 {
            return;
        }
        let mut state = self.lock();
        for i in 0..size {
            state.shadow.set_label(start_label + i as Label, addr + i, 1);
        }
    }

    /// `taint_alloca`: a fresh aggregate starts untainted. Larger regions
    /// are additionally re-bound as sources so flows out of them can be
    /// attributed.
    pub fn taint_alloca(&self, addr: u64, size: u64, function: &str) -> Label {
        if !self.is_active() {
            return 0;
        }
        let mut state = self.lock();
        if self.debug {
            let old = state.shadow.read_label(addr);
            debug!(
                "alloca at {:#x} (size {}) in {:?} clears label {}",
                addr, size, function, old
            );
        }
        state.shadow.set_label(0, addr, size);
        // small locals churn too fast to be worth a label range each
        if size <= 8 {
            return 0;
        }
        let origin = format!("alloca({:#x},size={})", addr, size);
        match state.sources.create_source(&origin, size) {
            Some(range) => {
                for i in 0..size {
                    state.shadow.set_label(range.first + i as Label, addr + i, 1);
                }
                state.event_log.event(&format!(
                    "Create taint source by alloca: address={:#x}, size={}, label={}:{}",
                    addr, size, range.first, range.last
                ));
                range.first
            },
            None => 0,
        }
    }

    /// `taint_ctor`: seed or forward taint for an in-place-constructed
    /// region. An already-labeled destination keeps its label; re-seeding
    /// would overtaint regions handed down from an outer frame.
    pub fn taint_ctor(&self, addr: u64, size: u64, loc: &RecordLocation) -> Label {
        if !self.is_active() || addr == 0 {
            return 0;
        }
        let mut state = self.lock();
        let dest_label = state.shadow.read_label(addr);
        if dest_label > 0 {
            state.label_log.label_record(dest_label, "ctor", loc);
            return dest_label;
        }
        let origin = format!("ctor({:#x},size={})", addr, size);
        match state.sources.create_source(&origin, size) {
            Some(range) => {
                for i in 0..size {
                    state.shadow.set_label(range.first + i as Label, addr + i, 1);
                }
                state.event_log.event(&format!(
                    "Create taint source by ctor: address={:#x}, size={}, label={}:{}",
                    addr, size, range.first, range.last
                ));
                state.label_log.label_record(range.first, "ctor", loc);
                range.first
            },
            None => 0,
        }
    }

    /// `memcpy`: per-byte label propagation from `src` to `dest`. Every
    /// overwritten tainted destination byte produces an `update` record.
    pub fn memcpy(&self, dest: u64, src: u64, n: u64, loc: &RecordLocation) {
        if !self.is_active() {
            return;
        }
        let mut state = self.lock();
        if self.debug {
            debug!("memcpy dest={:#x} src={:#x} n={:#x}", dest, src, n);
        }
        for i in 0..n {
            let src_label = state.shadow.read_label(src + i);
            if src_label == 0 {
                continue;
            }
            let dest_label = state.shadow.read_label(dest + i);
            state.shadow.set_label(src_label, dest + i, 1);
            if dest_label > 0 {
                state.label_log.update_record("memcpy", dest_label, src_label, loc);
            }
        }
    }

    /// `log_dominator`: record an implicit control-dependency edge. Only
    /// meaningful when both sides actually carry taint.
    pub fn log_dominator(&self, dominator_label: Label, dependent_label: Label) {
        if !self.is_active() || dominator_label == 0 || dependent_label == 0 {
            return;
        }
        let mut state = self.lock();
        state.label_log.dominator_record(dominator_label, dependent_label);
    }

    /// `taint_argv`: bind each argument's byte region as a taint source,
    /// before any other instrumented code runs. Regions are `(addr, len)`
    /// pairs, one per argv element.
    pub fn taint_argv(&self, regions: &[(u64, u64)]) {
        if !self.is_active() {
            return;
        }
        let mut state = self.lock();
        for (i, &(addr, len)) in regions.iter().enumerate() {
            let origin = format!("argv[{}]", i);
            if let Some(range) = state.sources.create_source(&origin, len) {
                for b in 0..len {
                    state.shadow.set_label(range.first + b as Label, addr + b, 1);
                }
                state.event_log.event(&format!(
                    "Create taint source by argv: index={}, address={:#x}, size={}",
                    i, addr, len
                ));
            }
        }
    }

    /// The label of the byte at `addr`.
    pub fn read_label(&self, addr: u64) -> Label {
        self.lock().shadow.read_label(addr)
    }

    /// Inspect the shadow collaborator.
    pub fn with_shadow<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock().shadow)
    }

    /// Number of taint sources bound so far.
    pub fn source_count(&self) -> usize {
        self.lock().sources.source_count()
    }
}
