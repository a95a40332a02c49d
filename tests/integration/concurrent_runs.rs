use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use reverify::{OptimizationContext, ProjectionOptimizer, RollbackLedger, RunId};

const NUM_THREADS: usize = 8;
const RUNS_PER_THREAD: usize = 16;

fn wide(thread_id: usize) -> Vec<String> {
    (0..12).map(|i| format!("t{thread_id}_f{i:02}")).collect()
}

#[test]
fn concurrent_optimizations_get_distinct_runs() {
    let optimizer = Arc::new(ProjectionOptimizer::new());
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = Vec::new();

    for thread_id in 0..NUM_THREADS {
        let optimizer = Arc::clone(&optimizer);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let ctx = OptimizationContext::default().with_lazy_loading(true);
            let mut runs = Vec::with_capacity(RUNS_PER_THREAD);
            for _ in 0..RUNS_PER_THREAD {
                let outcome = optimizer.optimize(wide(thread_id), &ctx).expect("valid");
                assert_eq!(outcome.accepted_steps, vec!["lazy_loading".to_string()]);
                assert!(outcome
                    .optimized
                    .fields()
                    .keys()
                    .all(|name| name.starts_with(&format!("t{thread_id}_"))));
                runs.push((outcome.run_id, outcome.history_index));
            }
            runs
        }));
    }

    let mut run_ids = BTreeSet::new();
    let mut history_indices = BTreeSet::new();
    for handle in handles {
        for (run_id, index) in handle.join().expect("worker panicked") {
            run_ids.insert(run_id);
            history_indices.insert(index);
        }
    }

    let total = NUM_THREADS * RUNS_PER_THREAD;
    assert_eq!(run_ids.len(), total);
    assert_eq!(history_indices, (0..total).collect::<BTreeSet<_>>());
    assert_eq!(optimizer.history().len(), total);
    assert_eq!(optimizer.ledger().run_count(), total);

    for run_id in run_ids {
        let steps = optimizer.ledger().steps(run_id);
        assert_eq!(steps.len(), 2, "field selection and lazy loading per run");
        assert!(steps.iter().all(|step| step.run_id == run_id));
        assert!(steps[0].rolled_back);
        assert!(!steps[1].rolled_back);
    }
}

#[test]
fn ledger_ids_stay_unique_under_contention() {
    let ledger: Arc<RollbackLedger<u32>> = Arc::new(RollbackLedger::new());
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Vec<RunId> {
                barrier.wait();
                (0..RUNS_PER_THREAD).map(|_| ledger.start_run()).collect()
            })
        })
        .collect();
    let ids: BTreeSet<RunId> = handles
        .into_iter()
        .flat_map(|handle| handle.join().expect("worker panicked"))
        .collect();
    assert_eq!(ids.len(), NUM_THREADS * RUNS_PER_THREAD);
}
