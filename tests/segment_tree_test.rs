// Integration tests for the segment tree memory model

use memsim::memory::{AllocStatus, FillState, MemoryError, Segment, SegmentTree};

const CHUNK: u64 = 4096;

fn four_gib() -> SegmentTree {
    SegmentTree::new(0, 1 << 32, CHUNK).expect("valid geometry")
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

#[test]
fn test_concrete_scenario() {
    let mut tree = four_gib();
    let data: Vec<u8> = (1..=16).collect();

    tree.allocate(0x1000, 16, FillState::Unknown, AllocStatus::Malloc)
        .unwrap();
    tree.store(0x1000, &data).unwrap();

    match tree.get(0x1000).unwrap() {
        Segment::Bytes(bytes) => assert_eq!(bytes, &data[..]),
        other => panic!("expected raw bytes, got {:?}", other),
    }

    // Only the path to 0x1000 (and its siblings) is materialized
    let stats = tree.stats();
    assert!(stats.nodes <= 64, "tree is not sparse: {:?}", stats);
    assert_eq!(stats.buffers, 1);
    assert_eq!(stats.allocations, 1);

    tree.free(0x1000, AllocStatus::Malloc).unwrap();
    assert_eq!(
        tree.get(0x1000).unwrap_err(),
        MemoryError::IllegalLoad { address: 0x1000 }
    );
    assert_eq!(
        tree.free(0x1000, AllocStatus::Malloc).unwrap_err(),
        MemoryError::IllegalFree { address: 0x1000 }
    );
}

#[test]
fn test_allocation_bounds() {
    let width = 1u64 << 20;
    for size in [0, 1, 16, CHUNK, CHUNK + 1, 2 * CHUNK, width / 2 + 1, width] {
        let mut tree = SegmentTree::new(0, width, CHUNK).unwrap();
        tree.allocate(0, size, FillState::Unknown, AllocStatus::Malloc)
            .unwrap_or_else(|e| panic!("allocation of {} failed: {}", size, e));
        assert!(tree.get(0).is_ok(), "load after allocating {} bytes", size);
    }

    for size in [width + 1, width * 2, u64::MAX] {
        let mut tree = SegmentTree::new(0, width, CHUNK).unwrap();
        assert!(matches!(
            tree.allocate(0, size, FillState::Unknown, AllocStatus::Malloc),
            Err(MemoryError::OutOfMemory { .. })
        ));
    }
}

#[test]
fn test_allocation_past_the_end() {
    let mut tree = four_gib();
    let err = tree
        .allocate((1 << 32) - CHUNK, 2 * CHUNK, FillState::Unknown, AllocStatus::Malloc)
        .unwrap_err();
    assert_eq!(
        err,
        MemoryError::OutOfMemory {
            requested: 2 * CHUNK,
            available: CHUNK,
        }
    );
}

#[test]
fn test_unsupported_allocations() {
    let mut tree = four_gib();

    // Not on a chunk boundary
    assert!(matches!(
        tree.allocate(0x1008, 8, FillState::Unknown, AllocStatus::Malloc),
        Err(MemoryError::Unsupported { address: 0x1008, .. })
    ));
    // Crosses the node it would have to live in
    assert!(matches!(
        tree.allocate(0x1000, 2 * CHUNK, FillState::Unknown, AllocStatus::Malloc),
        Err(MemoryError::Unsupported { .. })
    ));
    assert!(matches!(
        tree.allocate(0x1000, 16, FillState::Unknown, AllocStatus::Unallocated),
        Err(MemoryError::Unsupported { .. })
    ));
}

#[test]
fn test_store_load_round_trip() {
    let mut tree = four_gib();
    let n = 64u64;
    tree.allocate(0x1000, n, FillState::Uninit, AllocStatus::Malloc)
        .unwrap();

    for (offset, len) in [(0, 64), (0, 1), (5, 10), (63, 1), (32, 32)] {
        let buf = pattern(len);
        tree.store(0x1000 + offset, &buf).unwrap();
        assert_eq!(tree.read(0x1000 + offset, len as u64).unwrap(), buf);
    }
}

#[test]
fn test_round_trip_across_leaves() {
    let mut tree = four_gib();
    tree.allocate(0x4000, 3 * CHUNK, FillState::Uninit, AllocStatus::Malloc)
        .unwrap();

    let buf = pattern(5000);
    tree.store(0x4000 + 3000, &buf).unwrap();
    assert_eq!(tree.read(0x4000 + 3000, 5000).unwrap(), buf);
}

#[test]
fn test_split_write() {
    let mut tree = four_gib();
    let a = 0x2000;
    tree.allocate(a, 2 * CHUNK, FillState::Unknown, AllocStatus::Malloc)
        .unwrap();

    let buf = pattern(CHUNK as usize);
    tree.store(a + CHUNK / 2, &buf).unwrap();

    let all = tree.read(a, 2 * CHUNK).unwrap();
    let half = (CHUNK / 2) as usize;
    assert!(all[..half].iter().all(|&b| b == 0));
    assert_eq!(&all[half..half + CHUNK as usize], &buf[..]);
    assert!(all[half + CHUNK as usize..].iter().all(|&b| b == 0));
}

#[test]
fn test_store_bounds() {
    let mut tree = four_gib();
    tree.allocate(0x1000, 16, FillState::Uninit, AllocStatus::Malloc)
        .unwrap();

    // Exactly filling the allocation is fine, one byte more is not
    tree.store(0x1000, &[7; 16]).unwrap();
    assert_eq!(
        tree.store(0x100c, &[0; 8]).unwrap_err(),
        MemoryError::IllegalStore { address: 0x100c }
    );
    assert!(matches!(
        tree.store(0x5000, &[1]),
        Err(MemoryError::IllegalStore { .. })
    ));
    assert!(matches!(
        tree.store(u64::MAX, &[1]),
        Err(MemoryError::IllegalStore { .. })
    ));
}

#[test]
fn test_loads_outside_allocations() {
    let mut tree = four_gib();
    tree.allocate(0x1000, 16, FillState::Uninit, AllocStatus::Malloc)
        .unwrap();

    // Allocated but never written
    assert_eq!(
        tree.get(0x1000).unwrap_err(),
        MemoryError::IllegalLoad { address: 0x1000 }
    );

    tree.store(0x1000, &[1; 16]).unwrap();
    // Past the claimed bytes, in the same leaf
    assert!(matches!(tree.get(0x1010), Err(MemoryError::IllegalLoad { .. })));
    // Never allocated
    assert!(matches!(tree.get(0x5000), Err(MemoryError::IllegalLoad { .. })));
    assert!(matches!(tree.read(0x100c, 8), Err(MemoryError::IllegalLoad { address: 0x1010 })));
}

#[test]
fn test_memset_and_memchr() {
    let mut tree = four_gib();
    let a = 0x1000;
    let n = 16;
    tree.allocate(a, n, FillState::Uninit, AllocStatus::Malloc)
        .unwrap();

    tree.memset(a, 0x41, n).unwrap();
    assert_eq!(tree.memchr(a, 0x41, Some(n)).unwrap(), Some(a));
    assert_eq!(tree.memchr(a, 0x42, Some(n)).unwrap(), None);
    assert_eq!(tree.read(a, n).unwrap(), vec![0x41; n as usize]);
}

#[test]
fn test_memset_uniform_node_then_store() {
    let mut tree = four_gib();
    tree.allocate(0x8000, 0x4000, FillState::Uninit, AllocStatus::Malloc)
        .unwrap();

    tree.memset(0x8000, 0x41, 0x4000).unwrap();
    match tree.get(0x8000).unwrap() {
        Segment::Fill { byte, len } => assert_eq!((byte, len), (0x41, 0x4000)),
        other => panic!("expected a uniform fill, got {:?}", other),
    }
    assert_eq!(tree.stats().buffers, 0);

    tree.store(0x900a, &[0]).unwrap();
    assert_eq!(tree.memchr(0x8000, 0, None).unwrap(), Some(0x900a));
    assert_eq!(tree.memchr(0x8000, 0, Some(0x100a)).unwrap(), None);
    assert_eq!(tree.memchr(0x8000, 0, Some(0x100b)).unwrap(), Some(0x900a));

    // Unbounded scan runs off the end of the allocation
    assert!(matches!(
        tree.memchr(0x8000, 0x42, None),
        Err(MemoryError::IllegalLoad { address: 0xc000 })
    ));

    // A full-chunk memset collapses the leaf buffer again
    tree.memset(0x9000, 0x41, CHUNK).unwrap();
    assert_eq!(tree.stats().buffers, 0);
    assert_eq!(tree.memchr(0x8000, 0, Some(0x4000)).unwrap(), None);
}

#[test]
fn test_memset_is_a_write() {
    let mut tree = four_gib();
    tree.allocate(0x1000, 16, FillState::Uninit, AllocStatus::Malloc)
        .unwrap();

    assert!(matches!(
        tree.memset(0x1000, 1, 17),
        Err(MemoryError::IllegalStore { .. })
    ));
    assert!(matches!(
        tree.memset(0x40000, 1, CHUNK),
        Err(MemoryError::IllegalStore { .. })
    ));
    assert!(matches!(
        tree.memset(u64::MAX - 1, 1, 4),
        Err(MemoryError::IllegalStore { .. })
    ));
}

#[test]
fn test_free_mismatch() {
    let mut tree = four_gib();
    tree.allocate(0x2000, 2 * CHUNK, FillState::Unknown, AllocStatus::Malloc)
        .unwrap();
    tree.allocate(0x1000, 16, FillState::Memset(0), AllocStatus::Alloca)
        .unwrap();

    assert_eq!(
        tree.free(0x2001, AllocStatus::Malloc).unwrap_err(),
        MemoryError::IllegalFree { address: 0x2001 }
    );
    assert_eq!(
        tree.free(0x2000, AllocStatus::Alloca).unwrap_err(),
        MemoryError::IllegalFree { address: 0x2000 }
    );
    assert!(matches!(
        tree.free(0x1001, AllocStatus::Alloca),
        Err(MemoryError::IllegalFree { .. })
    ));
    assert!(matches!(
        tree.free(0x1000, AllocStatus::Malloc),
        Err(MemoryError::IllegalFree { .. })
    ));
    assert!(matches!(
        tree.free(1 << 33, AllocStatus::Malloc),
        Err(MemoryError::IllegalFree { .. })
    ));
    assert!(matches!(
        tree.free(0x2000, AllocStatus::Unallocated),
        Err(MemoryError::IllegalFree { .. })
    ));

    // Both allocations survived the bad frees
    tree.free(0x2000, AllocStatus::Malloc).unwrap();
    tree.free(0x1000, AllocStatus::Alloca).unwrap();
    assert!(tree.allocations().is_empty());
}

#[test]
fn test_free_then_load_fails() {
    let mut tree = four_gib();
    tree.allocate(0, CHUNK + 1, FillState::Memset(0), AllocStatus::Global)
        .unwrap();
    assert_eq!(tree.read(CHUNK, 1).unwrap(), vec![0]);

    tree.free(0, AllocStatus::Global).unwrap();
    for addr in [0, 1, CHUNK - 1, CHUNK] {
        assert!(
            matches!(tree.get(addr), Err(MemoryError::IllegalLoad { .. })),
            "load at 0x{:x} after free",
            addr
        );
    }
}

#[test]
fn test_nested_allocation_is_inconsistent() {
    let mut tree = four_gib();
    tree.allocate(0x2000, 2 * CHUNK, FillState::Unknown, AllocStatus::Malloc)
        .unwrap();
    tree.allocate(0x2000, 16, FillState::Unknown, AllocStatus::Malloc)
        .unwrap();

    assert!(matches!(
        tree.store(0x2000, &[1]),
        Err(MemoryError::Inconsistency { .. })
    ));
}

#[test]
fn test_memmove_between_allocations() {
    let mut tree = four_gib();
    tree.allocate(0x10000, 2 * CHUNK, FillState::Memset(0x41), AllocStatus::Malloc)
        .unwrap();
    tree.allocate(0x20000, 2 * CHUNK, FillState::Uninit, AllocStatus::Malloc)
        .unwrap();
    tree.store(0x10000 + 10, b"xyz").unwrap();

    let runs = tree.intervals(0x10000, 2 * CHUNK).unwrap();
    assert_eq!(runs.len(), 2);

    tree.memmove(0x10000, 0x20000, 2 * CHUNK).unwrap();
    assert_eq!(
        tree.read(0x20000, 2 * CHUNK).unwrap(),
        tree.read(0x10000, 2 * CHUNK).unwrap()
    );
    assert_eq!(tree.read(0x2000a, 3).unwrap(), b"xyz".to_vec());
    // The uniform half was replayed as a memset, not as raw bytes
    match tree.get(0x21000).unwrap() {
        Segment::Fill { byte, .. } => assert_eq!(byte, 0x41),
        other => panic!("expected a uniform fill, got {:?}", other),
    }
}

#[test]
fn test_memmove_overlapping() {
    let mut tree = four_gib();
    tree.allocate(0x1000, 16, FillState::Unknown, AllocStatus::Malloc)
        .unwrap();
    tree.store(0x1000, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

    tree.memmove(0x1000, 0x1004, 8).unwrap();
    assert_eq!(
        tree.read(0x1000, 12).unwrap(),
        vec![1, 2, 3, 4, 1, 2, 3, 4, 5, 6, 7, 8]
    );

    assert!(matches!(
        tree.memmove(0x1000, 0x100c, 8),
        Err(MemoryError::IllegalStore { .. })
    ));
    assert!(matches!(
        tree.memmove(0x5000, 0x1000, 4),
        Err(MemoryError::IllegalLoad { .. })
    ));
}

#[test]
fn test_peek_does_not_materialize() {
    let mut tree = four_gib();
    tree.allocate(0x1000, 16, FillState::Unknown, AllocStatus::Malloc)
        .unwrap();
    tree.store(0x1000, &[9, 8, 7]).unwrap();
    let before = tree.stats();

    assert_eq!(tree.peek(0x1000), Some(9));
    assert_eq!(tree.peek(0x100f), Some(0));
    assert_eq!(tree.peek(0x1010), None);
    assert_eq!(tree.peek(0x5000), None);
    assert_eq!(tree.peek(1 << 40), None);
    assert_eq!(tree.peek_range(0x1000, 3), vec![Some(9), Some(8), Some(7)]);
    assert_eq!(tree.stats(), before);
}

#[test]
fn test_zero_sized_allocation() {
    let mut tree = four_gib();
    tree.allocate(0x1000, 0, FillState::Unknown, AllocStatus::Malloc)
        .unwrap();

    let segment = tree.get(0x1000).unwrap();
    assert!(segment.is_empty());
    assert_eq!(segment, Segment::Bytes(&[]));

    assert_eq!(tree.read(0x1000, 0).unwrap(), Vec::<u8>::new());
    assert_eq!(
        tree.read(0x1000, 1).unwrap_err(),
        MemoryError::IllegalLoad { address: 0x1000 }
    );
    assert_eq!(
        tree.memchr(0x1000, 0, None).unwrap_err(),
        MemoryError::IllegalLoad { address: 0x1000 }
    );
    assert_eq!(
        tree.store(0x1000, &[1]).unwrap_err(),
        MemoryError::IllegalStore { address: 0x1000 }
    );
    assert_eq!(tree.allocation_at(0x1000).map(|a| a.claimed), Some(0));

    tree.free(0x1000, AllocStatus::Malloc).unwrap();
    assert!(tree.allocations().is_empty());
}

#[test]
fn test_allocations_in_window() {
    let mut tree = four_gib();
    tree.allocate(0x2000, 2 * CHUNK, FillState::Unknown, AllocStatus::Malloc)
        .unwrap();
    tree.allocate(0x8000, 16, FillState::Unknown, AllocStatus::Global)
        .unwrap();

    let found = tree.allocations_in(0x3000, 0x4000);
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].start, found[0].node_end), (0x2000, 0x4000));

    assert!(tree.allocations_in(0x4000, 0x8000).is_empty());
    assert_eq!(tree.allocations_in(0, 1 << 32).len(), 2);
    assert!(tree.allocation_at(0x3000).is_none());
    assert_eq!(
        tree.allocation_at(0x8000).map(|a| a.status),
        Some(AllocStatus::Global)
    );
}

#[test]
fn test_allocations_listing() {
    let mut tree = four_gib();
    tree.allocate(0x3000, 100, FillState::Memset(0), AllocStatus::Global)
        .unwrap();
    tree.allocate(0x1000, 16, FillState::Uninit, AllocStatus::Malloc)
        .unwrap();

    let starts: Vec<u64> = tree.allocations().iter().map(|a| a.start).collect();
    assert_eq!(starts, vec![0x1000, 0x3000]);
    assert_eq!(tree.allocations()[1].claimed, 100);
    assert_eq!(tree.allocations()[1].status, AllocStatus::Global);
}
