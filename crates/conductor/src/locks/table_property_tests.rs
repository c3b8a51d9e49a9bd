//! Property-based tests for the File Lock Table
//!
//! Random operation sequences are replayed against a simple model, and a
//! multi-threaded stress run checks that no path ever has two holders.

use super::*;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum LockOp {
    Acquire(usize, usize),
    Release(usize, usize),
    ReleaseAll(usize),
}

const PATHS: [&str; 4] = ["index.html", "src/app.rs", "db/schema.sql", "README.md"];
const AGENTS: [&str; 3] = ["build", "db", "frontend"];

fn op_strategy() -> impl Strategy<Value = LockOp> {
    prop_oneof![
        (0..PATHS.len(), 0..AGENTS.len()).prop_map(|(p, a)| LockOp::Acquire(p, a)),
        (0..PATHS.len(), 0..AGENTS.len()).prop_map(|(p, a)| LockOp::Release(p, a)),
        (0..AGENTS.len()).prop_map(LockOp::ReleaseAll),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The table agrees with a single-holder model after every operation
    #[test]
    fn prop_table_matches_single_holder_model(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let table = FileLockTable::new();
        let mut model: HashMap<&str, &str> = HashMap::new();
        let mut contested = 0u64;

        for op in ops {
            match op {
                LockOp::Acquire(p, a) => {
                    let (path, agent) = (PATHS[p], AGENTS[a]);
                    let expected = match model.get(path) {
                        Some(holder) => *holder == agent,
                        None => {
                            model.insert(path, agent);
                            true
                        }
                    };
                    if !expected {
                        contested += 1;
                    }
                    prop_assert_eq!(table.acquire(path, agent), expected);
                }
                LockOp::Release(p, a) => {
                    let (path, agent) = (PATHS[p], AGENTS[a]);
                    let expected = model.get(path) == Some(&agent);
                    if expected {
                        model.remove(path);
                    }
                    prop_assert_eq!(table.release(path, agent), expected);
                }
                LockOp::ReleaseAll(a) => {
                    let agent = AGENTS[a];
                    let before = model.len();
                    model.retain(|_, holder| *holder != agent);
                    prop_assert_eq!(table.release_all(agent), before - model.len());
                }
            }

            for path in PATHS {
                let holder = table.holder(path);
                prop_assert_eq!(holder.as_deref(), model.get(path).copied());
            }
        }

        let stats = table.statistics();
        prop_assert_eq!(stats.active_locks, model.len());
        prop_assert_eq!(stats.contested_acquisitions, contested);
    }

    /// Equivalent spellings of a path map to the same lock
    #[test]
    fn prop_normalized_spellings_share_a_lock(
        segments in prop::collection::vec("[a-z]{1,6}", 1..4)
    ) {
        let plain = segments.join("/");
        let dotted = format!("./{}", segments.join("/./"));
        let windows = segments.join("\\");

        let table = FileLockTable::new();
        prop_assert!(table.acquire(&plain, "a"));
        prop_assert!(!table.acquire(&dotted, "b"));
        prop_assert!(!table.acquire(&windows, "b"));
        prop_assert!(table.release(&windows, "a"));
        prop_assert!(!table.is_locked(&plain));
    }
}

/// Many threads hammer a few paths; each critical section checks that it is
/// alone on its path.
#[test]
fn stress_at_most_one_holder_per_path() {
    let table = Arc::new(FileLockTable::new());
    let occupancy: Arc<Vec<AtomicUsize>> =
        Arc::new(PATHS.iter().map(|_| AtomicUsize::new(0)).collect());
    let violations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|worker| {
            let table = table.clone();
            let occupancy = occupancy.clone();
            let violations = violations.clone();
            std::thread::spawn(move || {
                let agent = format!("agent-{}", worker);
                for i in 0..2_000 {
                    let idx = (worker + i) % PATHS.len();
                    if table.acquire(PATHS[idx], &agent) {
                        if occupancy[idx].fetch_add(1, Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::yield_now();
                        occupancy[idx].fetch_sub(1, Ordering::SeqCst);
                        assert!(table.release(PATHS[idx], &agent));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(table.statistics().active_locks, 0);
}
