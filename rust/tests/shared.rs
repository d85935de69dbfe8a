mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{date, fixed, schedule};
use orga_deps::{DateField, DependencyMode, DependencyType};

#[test]
fn test_opposing_links_cannot_both_succeed() {
    for _ in 0..20 {
        let mut s = schedule(DependencyMode::Flexible);
        s.upsert_task(fixed("a", date(1, 1), date(1, 2))).unwrap();
        s.upsert_task(fixed("b", date(1, 3), date(1, 4))).unwrap();
        s.upsert_task(fixed("c", date(1, 5), date(1, 6))).unwrap();
        s.add_dependency("b", "a", DependencyType::FinishToStart, 0)
            .unwrap();
        let shared = s.into_shared();
        let barrier = Arc::new(Barrier::new(2));

        // c -> b and a -> c are each fine alone but close a -> b -> c -> a together
        let handles: Vec<_> = [("c", "b"), ("a", "c")]
            .into_iter()
            .map(|(task, dep)| {
                let shared = Arc::clone(&shared);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut guard = shared.lock().unwrap();
                    guard
                        .add_dependency(task, dep, DependencyType::FinishToStart, 0)
                        .is_ok()
                })
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
        assert!(shared.lock().unwrap().graph().is_acyclic());
    }
}

#[test]
fn test_sweep_alongside_edits() {
    let mut s = schedule(DependencyMode::Strict);
    for i in 0..10u32 {
        s.upsert_task(
            fixed(&format!("t{i}"), date(2, 1 + i), date(2, 2 + i)).with_auto_trail_start(i % 2 == 0),
        )
        .unwrap();
    }
    for i in 1..10 {
        s.add_dependency(
            &format!("t{i}"),
            &format!("t{}", i - 1),
            DependencyType::FinishToStart,
            0,
        )
        .unwrap();
    }
    let shared = s.into_shared();

    let sweeper = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            for _ in 0..5 {
                shared.lock().unwrap().sweep(date(2, 3));
            }
        })
    };
    let editor = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            for d in 20..25 {
                let _ = shared
                    .lock()
                    .unwrap()
                    .edit_task_dates("t9", DateField::Due, date(2, d));
            }
        })
    };
    sweeper.join().unwrap();
    editor.join().unwrap();

    let mut s = shared.lock().unwrap();
    for task in s.tasks() {
        assert!(task.start_date <= task.due_date, "{} inverted", task.id);
    }
    let revision = s.revision();
    assert!(s.sweep(date(2, 3)).is_empty());
    assert_eq!(s.revision(), revision);
}
