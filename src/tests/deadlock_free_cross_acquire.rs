//! Two threads acquire the same two buffers in opposite orders; neither
//! should be able to deadlock the other.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::{AcquireAction, BufferAcquireSet, BufferState, ExecutorDeviceSet, TaskId};

#[test]
fn cross_order_acquire_never_deadlocks() {
    let b1 = Arc::new(BufferState::new(64, false));
    let b2 = Arc::new(BufferState::new(64, false));

    let b1a = b1.clone();
    let b2a = b2.clone();
    let handle_a = thread::spawn(move || {
        let mut set = BufferAcquireSet::new();
        set.add(b1a, AcquireAction::ReadWrite, false);
        set.add(b2a, AcquireAction::ReadWrite, false);
        let requestor = TaskId::next();
        // No dependency-injection escape hatch here: the caller just wants
        // to know this side eventually gets both buffers without the two
        // threads permanently starving each other.
        let ok = set.acquire(requestor, ExecutorDeviceSet::CPU, true, |_| false).unwrap();
        if ok {
            thread::sleep(Duration::from_micros(50));
            set.release(requestor);
        }
        ok
    });

    let b1b = b1.clone();
    let b2b = b2.clone();
    let handle_b = thread::spawn(move || {
        let mut set = BufferAcquireSet::new();
        // Added in the opposite order from thread A; the acquire set sorts
        // by allocation address internally, so this does not matter.
        set.add(b2b, AcquireAction::ReadWrite, false);
        set.add(b1b, AcquireAction::ReadWrite, false);
        let requestor = TaskId::next();
        let ok = set.acquire(requestor, ExecutorDeviceSet::CPU, true, |_| false).unwrap();
        if ok {
            thread::sleep(Duration::from_micros(50));
            set.release(requestor);
        }
        ok
    });

    assert!(handle_a.join().unwrap());
    assert!(handle_b.join().unwrap());
    assert_eq!(b1.acquire_set_len(), 0);
    assert_eq!(b2.acquire_set_len(), 0);
}
