//! Lock identity and concurrent use of one runtime.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use metagraph_compiler::fragment::{self, call, function};
use metagraph_compiler::UnitSource;
use metagraph_exec::{ExecutionContext, Sequence};
use metagraph_runtime::{same_handle, BackendKind, LockManager, Runtime, RuntimeConfig};

proptest! {
    #[test]
    fn handles_are_identical_exactly_when_keys_are(keys in prop::collection::vec(0u8..16, 1..40)) {
        let locks = LockManager::new();
        let handles: Vec<_> = keys.iter().map(|k| locks.lock_for(*k)).collect();
        for (i, a) in keys.iter().enumerate() {
            for (j, b) in keys.iter().enumerate() {
                prop_assert_eq!(a == b, same_handle(&handles[i], &handles[j]));
            }
        }
        let distinct: std::collections::HashSet<_> = keys.iter().collect();
        prop_assert_eq!(locks.len(), distinct.len());
    }
}

fn counter(value: i64) -> UnitSource {
    UnitSource::new("counter.pure").element(function(
        "test",
        "next",
        &[("n", "Integer", "1")],
        "Integer",
        "1",
        vec![call(
            "plus",
            vec![fragment::collection(vec![fragment::var("n"), fragment::integer(value)])],
        )],
    ))
}

#[test]
fn executions_run_alongside_deltas() {
    let rt = Arc::new(Runtime::new(RuntimeConfig::default(), Vec::new()).unwrap());
    rt.add_or_update(counter(1)).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|i| {
            let rt = Arc::clone(&rt);
            thread::spawn(move || {
                let backend = if i % 2 == 0 {
                    BackendKind::Interpreter
                } else {
                    BackendKind::Compiled
                };
                for _ in 0..20 {
                    let r = rt
                        .execute(backend, "test::next", vec![Sequence::one(10i64)], &mut ExecutionContext::new())
                        .unwrap();
                    // Either version of the function, never a torn state.
                    assert!(r == Sequence::one(11i64) || r == Sequence::one(12i64));
                }
            })
        })
        .collect();
    let writer = {
        let rt = Arc::clone(&rt);
        thread::spawn(move || {
            for round in 0..10 {
                rt.add_or_update(counter(1 + round % 2)).unwrap();
            }
        })
    };

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert!(rt.integrity_check().unwrap().is_empty());
}

#[test]
fn deltas_on_one_repository_share_a_lock() {
    let rt = Runtime::new(RuntimeConfig::default(), Vec::new()).unwrap();
    let a = rt.locks().lock_for(rt.config().repository.clone());
    let b = rt.locks().lock_for("default".to_string());
    assert!(same_handle(&a, &b));
}
