// Integration tests for trace replay and history navigation

use std::fs;
use std::io::Write;

use memsim::config::SimulatorConfig;
use memsim::memory::MemoryError;
use memsim::replay::{Diagnostic, ReplayEngine, ReplayError};
use memsim::trace::{parse_trace, SourceLocation};

const TRACE: &str = "\
range 0 0x10000 0x100
%p = malloc 16 zero
store %p \"hi\"
load %p 4
%s = alloca 4
storeint %s 0x01020304 4
loadint %s 4
memchr %p 0x69 16
strlen %p
release %p
load %p 1
";

fn engine_for(source: &str, config: &SimulatorConfig) -> ReplayEngine {
    let program = parse_trace(source).expect("Parsing failed");
    ReplayEngine::new(program, config).expect("Engine creation failed")
}

#[test]
fn test_replay_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TRACE.as_bytes()).unwrap();
    let source = fs::read_to_string(file.path()).unwrap();

    let mut engine = engine_for(&source, &SimulatorConfig::default());
    let err = engine.run().unwrap_err();

    let ReplayError::Signal(diagnostic) = err else {
        panic!("expected a fatal signal, got {:?}", err);
    };
    assert_eq!(diagnostic.name, "IllegalLoad");
    assert_eq!(diagnostic.location, SourceLocation::new(11, 1));
    assert_eq!(engine.diagnostic(), Some(&diagnostic));
    assert!(engine.is_finished());

    assert_eq!(
        engine.output().get_output(),
        vec![
            "%p = 0xc000",
            "store 0xc000: 2 bytes",
            "load 0xc000: 68 69 00 00",
            "%s = 0x8000",
            "storeint 0x8000: 0x1020304 (4 bytes)",
            "loadint 0x8000: 0x1020304 (16909060)",
            "memchr 0xc000 0x69: found at 0xc001",
            "strlen 0xc000: 2",
            "release 0xc000",
            "error: IllegalLoad at line 11, column 1: Memory read violation at 0xc000",
        ]
    );
    assert!(engine.output().lines.last().unwrap().is_error);
}

#[test]
fn test_history_navigation() {
    let mut engine = engine_for(TRACE, &SimulatorConfig::default());
    let _ = engine.run();

    // Initial state, ten good statements, and the failing one
    assert_eq!(engine.total_snapshots(), 12);
    assert_eq!(engine.history_position(), 11);
    assert!(engine.at_diagnostic());

    engine.rewind_to_start().unwrap();
    assert_eq!(engine.history_position(), 0);
    assert_eq!(engine.executed(), 0);
    assert!(engine.output().lines.is_empty());
    assert!(engine.memory().allocations().is_empty());
    assert!(matches!(
        engine.step_backward(),
        Err(ReplayError::History { .. })
    ));

    engine.step_forward().unwrap();
    assert_eq!(engine.output().lines.len(), 1);
    assert_eq!(engine.bindings().get("p"), Some(&0xc000));
    assert_eq!(engine.current_location(), SourceLocation::new(2, 1));
    assert_eq!(engine.memory().allocations().len(), 1);

    // After `release %p` the block is gone, before it the bytes are there
    for _ in 0..8 {
        engine.step_forward().unwrap();
    }
    assert_eq!(engine.current_location().line, 10);
    assert!(engine.memory().allocation_at(0xc000).is_none());
    engine.step_backward().unwrap();
    assert_eq!(engine.memory().tree().peek_range(0xc000, 2), vec![Some(b'h'), Some(b'i')]);
    assert!(!engine.at_diagnostic());

    engine.jump_to_end().unwrap();
    assert_eq!(engine.history_position(), 11);
    assert!(matches!(
        engine.step_forward(),
        Err(ReplayError::History { .. })
    ));
}

#[test]
fn test_diagnostics_reach_the_sink() {
    let source = "alloc 0x1000 16 unknown malloc\nfree 0x1000 alloca\n";
    let mut engine = engine_for(source, &SimulatorConfig::default());

    let mut sink: Vec<Diagnostic> = Vec::new();
    assert!(engine.run_with_sink(&mut sink).is_err());

    assert_eq!(sink.len(), 1);
    assert_eq!(sink[0].name, "IllegalFree");
    assert_eq!(sink[0].location, SourceLocation::new(2, 1));
    assert_eq!(
        sink[0].message,
        MemoryError::IllegalFree { address: 0x1000 }.to_string()
    );
}

#[test]
fn test_unbound_name() {
    let mut engine = engine_for("load %nowhere 1\n", &SimulatorConfig::default());
    let err = engine.run().unwrap_err();

    let ReplayError::Signal(diagnostic) = err else {
        panic!("expected a fatal signal, got {:?}", err);
    };
    assert_eq!(diagnostic.name, "UnboundName");
    assert!(diagnostic.message.contains("%nowhere"));
}

#[test]
fn test_clean_replay() {
    let source = "\
alloc 0x1000 16 uninit malloc
memset 0x1000 0x41 16
memchr 0x1000 0x41 16
memchr 0x1000 0x42 16
alloc 0x2000 16 uninit malloc
memmove 0x1000 0x2000 16
load 0x2000 2
free 0x1000 malloc
frame push
frame pop
";
    let mut engine = engine_for(source, &SimulatorConfig::default());
    engine.run().unwrap();

    assert!(engine.is_finished());
    assert!(engine.diagnostic().is_none());
    assert_eq!(engine.total_snapshots(), 11);

    let output = engine.output().get_output();
    assert_eq!(output[0], "alloc 0x1000: 16 bytes, Malloc, Uninit");
    assert_eq!(output[2], "memchr 0x1000 0x41: found at 0x1000");
    assert_eq!(output[3], "memchr 0x1000 0x42: not found");
    assert_eq!(output[6], "load 0x2000: 41 41");
    assert_eq!(output[9], "frame pop: depth 1");
}

#[test]
fn test_config_geometry_without_range_line() {
    let config = SimulatorConfig {
        memory_power: 16,
        chunk_size: 0x100,
        ..SimulatorConfig::default()
    };
    let mut engine = engine_for("%p = malloc 4\n", &config);
    engine.run().unwrap();
    assert_eq!(engine.bindings().get("p"), Some(&0xc000));
}

#[test]
fn test_bad_range_line() {
    let program = parse_trace("range 0 0x300 0x100\n").unwrap();
    assert!(matches!(
        ReplayEngine::new(program, &SimulatorConfig::default()),
        Err(ReplayError::Geometry(MemoryError::InvalidGeometry { .. }))
    ));
}

#[test]
fn test_snapshot_budget() {
    let config = SimulatorConfig {
        snapshot_limit: 1,
        ..SimulatorConfig::default()
    };
    let mut engine = engine_for("%p = malloc 16\n", &config);

    assert!(matches!(
        engine.run(),
        Err(ReplayError::SnapshotLimit(_))
    ));
    assert_eq!(engine.total_snapshots(), 1);
}

#[test]
fn test_trace_allocations_share_the_heap() {
    let source = "\
range 0 0x10000 0x100
alloc 0xc000 16 zero malloc
store 0xc000 \"keep\"
%p = malloc 16
load 0xc000 4
free 0xc000 malloc
";
    let mut engine = engine_for(source, &SimulatorConfig::default());
    engine.run().unwrap();

    let output = engine.output().get_output();
    assert_eq!(output[2], "%p = 0xc100");
    assert_eq!(output[3], "load 0xc000: 6b 65 65 70");

    let live = engine.memory().allocations();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].start, 0xc100);
    assert!(engine.memory().allocation_at(0xc000).is_none());
}
