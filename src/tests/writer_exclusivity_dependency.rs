//! A confirmed writer forces a conflicting reader's acquire to report the
//! writer as the conflicting requestor instead of spinning, and releasing
//! the writer lets a retried acquire succeed and observe its data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{AcquireAction, BufferAcquireSet, BufferState, ExecutorDeviceSet, TaskId};

#[test]
fn writer_exclusivity_yields_a_dependency_then_succeeds() {
    let buf = Arc::new(BufferState::new(4, false));
    let t1 = TaskId::next();
    let t2 = TaskId::next();

    let mut set1 = BufferAcquireSet::new();
    set1.add(buf.clone(), AcquireAction::Write, false);
    assert!(set1.acquire(t1, ExecutorDeviceSet::CPU, false, |_| false).unwrap());

    let mut set2 = BufferAcquireSet::new();
    set2.add(buf.clone(), AcquireAction::Read, false);

    let saw_conflicter = Arc::new(AtomicBool::new(false));
    let seen = saw_conflicter.clone();
    let ok = set2
        .acquire(t2, ExecutorDeviceSet::CPU, true, |conflicter| {
            assert_eq!(conflicter, t1);
            seen.store(true, Ordering::SeqCst);
            true // pretend a dynamic dependency was wired; don't retry now
        })
        .unwrap();
    assert!(!ok);
    assert!(saw_conflicter.load(Ordering::SeqCst));

    set1.release(t1);

    let ok2 = set2.acquire(t2, ExecutorDeviceSet::CPU, true, |_| false).unwrap();
    assert!(ok2);
    set2.release(t2);
}
