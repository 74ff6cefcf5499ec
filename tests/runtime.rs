use llvm_taint_pass::{
    Label, LabelLog, LabelRange, RecordLocation, RuntimeConfig, ShadowMemory,
    SourceLabelAllocator, TaintRuntime,
};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Sparse shadow memory double, with a counter for per-byte set operations.
#[derive(Default)]
struct MapShadow {
    labels: HashMap<u64, Label>,
    sets: u64,
}

impl ShadowMemory for MapShadow {
    fn read_label(&self, addr: u64) -> Label {
        self.labels.get(&addr).copied().unwrap_or(0)
    }

    fn set_label(&mut self, label: Label, addr: u64, size: u64) {
        for i in 0..size {
            self.sets += 1;
            if label == 0 {
                self.labels.remove(&(addr + i));
            } else {
                self.labels.insert(addr + i, label);
            }
        }
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

const LOC: RecordLocation = RecordLocation {
    path: "src/parse.c",
    line: 42,
    column: 7,
    function: "parse",
};

const LIB_LOC: RecordLocation = RecordLocation {
    path: "/cxx_lib/bits/basic_string.h",
    line: 1024,
    column: 9,
    function: "_ZNSt12basic_string6assignEv",
};

fn started_runtime() -> (TaintRuntime<MapShadow>, SharedBuf) {
    started_runtime_with(RuntimeConfig::default())
}

fn started_runtime_with(config: RuntimeConfig) -> (TaintRuntime<MapShadow>, SharedBuf) {
    let buf = SharedBuf::default();
    let rt = TaintRuntime::with_sinks(
        config,
        MapShadow::default(),
        LabelLog::to_writer(buf.clone()),
        LabelLog::disabled(),
    );
    rt.start();
    (rt, buf)
}

#[test]
fn label_conserving_store_keeps_the_destination_label() {
    let (rt, log) = started_runtime();
    // destination previously tainted with labels 9..=12
    rt.set_taint_label(0x1000, 4, 9);

    // an untainted value is stored over it
    let returned = rt.taint_store(0x1000, 0xAB, 4, 0, &LOC);
    assert_eq!(returned, 9);

    // phase two re-applies the returned label across the full width, so
    // the post-write label equals the returned label
    rt.set_taint_label(0x1000, 4, returned);
    assert_eq!(rt.read_label(0x1000), 9);

    let contents = log.contents();
    assert!(contents.contains("- { kind: label, label: 9, opcode: store, path: src/parse.c"));
}

#[test]
fn storing_a_tainted_value_returns_zero() {
    let (rt, log) = started_runtime();
    // the data-flow layer already carries the value's label through the
    // plain store; phase two must be a no-op
    let returned = rt.taint_store(0x2000, 1, 4, 5, &LOC);
    assert_eq!(returned, 0);
    assert!(log.contents().contains("label: 5"));
}

#[test]
fn fully_untainted_stores_log_nothing_by_default() {
    let (rt, log) = started_runtime();
    assert_eq!(rt.taint_store(0x3000, 1, 4, 0, &LOC), 0);
    assert!(log.contents().is_empty());
}

#[test]
fn log_untainted_toggle_records_label_zero_events() {
    let mut config = RuntimeConfig::default();
    config.log_untainted = true;
    let (rt, log) = started_runtime_with(config);
    rt.taint_store(0x3000, 1, 4, 0, &LOC);
    assert!(log.contents().contains("label: 0"));
}

#[test]
fn excluded_paths_never_move_labels_in_the_store_hook() {
    let (rt, log) = started_runtime();
    rt.set_taint_label(0x1000, 4, 9);
    let sets_before = rt.with_shadow(|s| s.sets);
    let returned = rt.taint_store(0x1000, 0, 4, 0, &LIB_LOC);
    // the old label is still returned, but nothing was written or logged
    assert_eq!(returned, 9);
    assert_eq!(rt.with_shadow(|s| s.sets), sets_before);
    assert!(log.contents().is_empty());
}

#[test]
fn set_taint_label_applies_a_contiguous_run() {
    let (rt, _) = started_runtime();
    rt.set_taint_label(0x4000, 3, 100);
    assert_eq!(rt.read_label(0x4000), 100);
    assert_eq!(rt.read_label(0x4001), 101);
    assert_eq!(rt.read_label(0x4002), 102);
    // label 0 is a no-op, not a clear
    rt.set_taint_label(0x4000, 3, 0);
    assert_eq!(rt.read_label(0x4000), 100);
}

#[test]
fn alloca_clears_small_regions_without_seeding() {
    let (rt, _) = started_runtime();
    rt.set_taint_label(0x5000, 4, 77);
    let label = rt.taint_alloca(0x5000, 4, "f");
    assert_eq!(label, 0);
    assert_eq!(rt.read_label(0x5000), 0);
    assert_eq!(rt.source_count(), 0);
}

#[test]
fn alloca_reseeds_larger_regions() {
    let (rt, _) = started_runtime();
    rt.set_taint_label(0x6000, 16, 3);
    let label = rt.taint_alloca(0x6000, 16, "f");
    assert!(label > 0);
    assert_eq!(rt.read_label(0x6000), label);
    assert_eq!(rt.read_label(0x6000 + 15), label + 15);
    assert_eq!(rt.source_count(), 1);
}

#[test]
fn ctor_seeds_then_forwards_the_existing_label() {
    let (rt, log) = started_runtime();
    let first = rt.taint_ctor(0x7000, 8, &LOC);
    assert!(first > 0);
    assert_eq!(rt.read_label(0x7000), first);

    // a second construction over the same region forwards, not re-seeds
    let second = rt.taint_ctor(0x7000, 8, &LOC);
    assert_eq!(second, first);
    assert_eq!(rt.source_count(), 1);
    assert_eq!(
        log.contents().lines().filter(|l| l.contains("opcode: ctor")).count(),
        2
    );
}

#[test]
fn ctor_of_a_null_destination_is_skipped() {
    let (rt, _) = started_runtime();
    assert_eq!(rt.taint_ctor(0, 8, &LOC), 0);
    assert_eq!(rt.source_count(), 0);
}

#[test]
fn memcpy_propagates_each_tainted_byte_once() {
    let (rt, log) = started_runtime();
    rt.set_taint_label(0x8000, 8, 100); // tainted source
    rt.set_taint_label(0x9002, 1, 50); // two previously tainted
    rt.set_taint_label(0x9005, 1, 60); // destination bytes

    let sets_before = rt.with_shadow(|s| s.sets);
    rt.memcpy(0x9000, 0x8000, 8, &LOC);
    assert_eq!(rt.with_shadow(|s| s.sets) - sets_before, 8);
    for i in 0..8u64 {
        assert_eq!(rt.read_label(0x9000 + i), 100 + i as Label);
    }

    let contents = log.contents();
    let updates: Vec<&str> = contents.lines().filter(|l| l.contains("kind: update")).collect();
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|l| l.contains("cause: memcpy")));
    assert!(contents.contains("old_label: 50, new_label: 102"));
    assert!(contents.contains("old_label: 60, new_label: 105"));
}

#[test]
fn memcpy_of_untainted_bytes_is_inert() {
    let (rt, log) = started_runtime();
    let sets_before = rt.with_shadow(|s| s.sets);
    rt.memcpy(0x9000, 0x8000, 16, &LOC);
    assert_eq!(rt.with_shadow(|s| s.sets), sets_before);
    assert!(log.contents().is_empty());
}

#[test]
fn dominator_records_need_both_labels() {
    let (rt, log) = started_runtime();
    rt.log_dominator(0, 5);
    rt.log_dominator(5, 0);
    assert!(log.contents().is_empty());
    rt.log_dominator(3, 5);
    assert_eq!(
        log.contents(),
        "- { kind: dominator, dominator: 3, dominates: 5 }\n"
    );
}

#[test]
fn log_label_ptr_reads_the_label_through_shadow() {
    let (rt, log) = started_runtime();
    rt.set_taint_label(0xA000, 1, 33);
    rt.log_label_ptr(0xA000, "load_ptr", &LOC);
    rt.log_label_ptr(0, "load_ptr", &LOC); // null pointer: skipped
    let contents = log.contents();
    assert_eq!(contents.lines().count(), 1);
    assert!(contents.contains("label: 33, opcode: load_ptr"));
}

#[test]
fn argv_seeding_labels_every_argument_byte() {
    let (rt, _) = started_runtime();
    rt.taint_argv(&[(0xB000, 5), (0xC000, 3)]);
    assert_eq!(rt.source_count(), 2);
    for i in 0..5 {
        assert!(rt.read_label(0xB000 + i) > 0);
    }
    // per-byte labels, so adjacent bytes are distinguishable
    assert_ne!(rt.read_label(0xB000), rt.read_label(0xB001));
    // the two arguments come from different ranges
    assert_ne!(rt.read_label(0xB000), rt.read_label(0xC000));
}

#[test]
fn entry_points_are_inert_until_started() {
    let buf = SharedBuf::default();
    let rt = TaintRuntime::with_sinks(
        RuntimeConfig::default(),
        MapShadow::default(),
        LabelLog::to_writer(buf.clone()),
        LabelLog::disabled(),
    );
    rt.set_taint_label(0x1000, 4, 9);
    assert_eq!(rt.taint_ctor(0x1000, 8, &LOC), 0);
    assert_eq!(rt.read_label(0x1000), 0);
    assert!(buf.contents().is_empty());

    assert!(rt.start());
    assert!(!rt.start()); // only the first initialization counts
    rt.set_taint_label(0x1000, 4, 9);
    assert_eq!(rt.read_label(0x1000), 9);
}

#[test]
fn shutdown_silences_logging_once_and_for_all() {
    let (rt, log) = started_runtime();
    rt.log_dominator(1, 2);
    rt.shutdown();
    rt.shutdown(); // second shutdown is a no-op
    rt.log_dominator(3, 4);
    let contents = log.contents();
    assert!(contents.contains("dominator: 1"));
    assert!(!contents.contains("dominator: 3"));
}

#[test]
fn unopenable_log_degrades_to_a_disabled_sink() {
    let log = LabelLog::to_path(Path::new("/nonexistent-dir-for-taint-tests/label.log"));
    assert!(!log.is_enabled());
}

#[test]
#[should_panic(expected = "label space exhausted")]
fn label_exhaustion_aborts() {
    let mut config = RuntimeConfig::default();
    config.label_capacity = 4;
    let rt = TaintRuntime::with_sinks(
        config,
        MapShadow::default(),
        LabelLog::disabled(),
        LabelLog::disabled(),
    );
    rt.start();
    rt.taint_ctor(0xD000, 8, &LOC); // needs 8 labels, only 4 exist
}

#[test]
#[should_panic(expected = "out of range")]
fn source_index_out_of_range_aborts() {
    let mut sources = SourceLabelAllocator::new(100);
    sources.create_source("argv[0]", 4);
    sources.origin(3);
}

#[test]
fn source_ranges_are_contiguous_and_remember_their_origins() {
    let mut sources = SourceLabelAllocator::new(1000);
    let a = sources.create_source("argv[0]", 4).unwrap();
    let b = sources.create_source("ctor(0x7000,size=2)", 2).unwrap();
    assert_eq!(a, LabelRange { first: 1, last: 4 });
    assert_eq!(b, LabelRange { first: 5, last: 6 });
    assert_eq!(sources.origin(0), "argv[0]");
    assert_eq!(sources.origin(1), "ctor(0x7000,size=2)");
    assert_eq!(sources.labels_used(), 6);
    assert!(sources.create_source("empty", 0).is_none());
}
