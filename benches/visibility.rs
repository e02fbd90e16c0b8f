//! Visibility predicate benchmarks.
//!
//! Measures the two paths that dominate scan cost: the fast path (newest
//! version visible, no undo access) and chain walks of increasing depth.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use undoheap::tuple::flags;
use undoheap::{
    MemUndoStore, PageOpaque, Snapshot, TransSlot, TransactionOracle, Tuple, TupleHeader,
    TuplePtr, UndoRecType, UndoRecord, VisibilityEngine, Xid,
};

const HORIZON: Xid = 90;
const TID: TuplePtr = TuplePtr::new(0, 1);

struct CommittedOracle;

impl TransactionOracle for CommittedOracle {
    fn is_current(&self, _: Xid) -> bool {
        false
    }

    fn is_in_progress(&self, _: Xid) -> bool {
        false
    }

    fn did_commit(&self, _: Xid) -> bool {
        true
    }
}

fn bench_fast_path(c: &mut Criterion) {
    let oracle = CommittedOracle;
    let undo = MemUndoStore::new();
    let mut page = PageOpaque::new();
    page.set_slot(0, TransSlot::new(100, 0, 0));

    let engine = VisibilityEngine::new(&oracle, &undo, &page, HORIZON);
    let tuple = Tuple::new(TID, 1, TupleHeader::new(0), vec![7u8; 64]);
    let snapshot = Snapshot::new(HORIZON, 110, 5);

    c.bench_function("mvcc_visible_no_walk", |b| {
        b.iter(|| black_box(engine.satisfies_mvcc(black_box(&tuple), &snapshot)))
    });
}

fn bench_chain_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("mvcc_chain_walk");

    for depth in [1u64, 4, 16] {
        let oracle = CommittedOracle;
        let undo = MemUndoStore::new();
        let mut page = PageOpaque::new();

        let mut blkprev = 0;
        let mut last_ptr = 0;
        for step in 0..depth {
            let image_flags = if step == 0 { 0 } else { flags::INPLACE_UPDATED };
            let rec = UndoRecord::new(
                UndoRecType::InplaceUpdate,
                TID,
                101 + step,
                100 + step,
                0,
                blkprev,
            )
            .with_image(TupleHeader::with_flags(0, image_flags), vec![7u8; 64]);
            last_ptr = undo.append(&rec).unwrap();
            blkprev = last_ptr;
        }
        page.set_slot(0, TransSlot::new(100 + depth, last_ptr, 0));

        let tuple = Tuple::new(
            TID,
            1,
            TupleHeader::with_flags(0, flags::INPLACE_UPDATED),
            vec![7u8; 64],
        );
        // Hide every updater so the walk runs to the root insert.
        let snapshot = Snapshot::new(HORIZON, 200, 5).with_xip(101..=100 + depth);

        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            let engine = VisibilityEngine::new(&oracle, &undo, &page, HORIZON);
            b.iter(|| black_box(engine.satisfies_mvcc(black_box(&tuple), &snapshot)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fast_path, bench_chain_walk);
criterion_main!(benches);
