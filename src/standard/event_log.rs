//! Observability for the coordination layer.
//!
//! Every state transition worth observing emits through [`log`]'s
//! `trace!`/`debug!` macros so that an embedding application's own
//! `log::Log` implementation is the sink; this module never writes to
//! stdout/stderr directly. When the crate is built with `log`'s
//! `release_max_level_off` (or similar) feature, the argument expressions
//! of a statically-disabled level are never evaluated, so a production
//! build pays nothing for this instrumentation.
//!
//! The `event-log` Cargo feature additionally records the last `N` events
//! into a small in-memory ring buffer so tests can assert on the exact
//! sequence of transitions without scraping log output. With the feature
//! disabled, [`EventLog`] is a zero-sized no-op.

use std::fmt;

use crate::standard::object_id::{BufferId, TaskId};

/// A single recorded transition.
#[derive(Debug, Clone)]
pub enum Event {
    TaskCreated(TaskId),
    TaskLaunched(TaskId),
    TaskRan(TaskId),
    TaskFinished(TaskId, bool /* canceled */),
    TaskCanceled(TaskId),
    TaskExcepted(TaskId),
    GroupCanceled(String),
    BufferCreated(BufferId, usize),
    BufferAcquired(BufferId, TaskId),
    BufferReleased(BufferId, TaskId),
    BufferConflict(BufferId, TaskId),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Event::TaskCreated(id) => write!(f, "task {} created", id),
            Event::TaskLaunched(id) => write!(f, "task {} launched", id),
            Event::TaskRan(id) => write!(f, "task {} ran", id),
            Event::TaskFinished(id, canceled) => {
                write!(f, "task {} finished (canceled={})", id, canceled)
            }
            Event::TaskCanceled(id) => write!(f, "task {} canceled", id),
            Event::TaskExcepted(id) => write!(f, "task {} excepted", id),
            Event::GroupCanceled(name) => write!(f, "group '{}' canceled", name),
            Event::BufferCreated(id, bytes) => write!(f, "buffer {} created ({} bytes)", id, bytes),
            Event::BufferAcquired(id, req) => write!(f, "buffer {} acquired by {}", id, req),
            Event::BufferReleased(id, req) => write!(f, "buffer {} released by {}", id, req),
            Event::BufferConflict(id, req) => write!(f, "buffer {} conflict for {}", id, req),
        }
    }
}

/// Emit `event` through the `log` facade at `trace` level and, if the
/// `event-log` feature is enabled, append it to the test ring buffer.
pub fn emit(event: Event) {
    log::trace!("{}", event);
    #[cfg(feature = "event-log")]
    RING.push(event);
}

#[cfg(feature = "event-log")]
mod ring {
    use super::Event;
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const CAPACITY: usize = 256;

    pub(super) static RING: Lazy<EventLog> = Lazy::new(EventLog::new);

    /// Fixed-capacity in-memory record of the most recent events, for test
    /// introspection. Compiled to a zero-sized no-op unless the `event-log`
    /// feature is enabled.
    pub struct EventLog {
        buf: Mutex<VecDeque<Event>>,
    }

    impl EventLog {
        fn new() -> Self {
            EventLog { buf: Mutex::new(VecDeque::with_capacity(CAPACITY)) }
        }

        pub(super) fn push(&self, event: Event) {
            let mut buf = self.buf.lock();
            if buf.len() == CAPACITY {
                buf.pop_front();
            }
            buf.push_back(event);
        }

        /// Returns a snapshot of the recorded events, oldest first.
        pub fn snapshot(&self) -> Vec<Event> {
            self.buf.lock().iter().cloned().collect()
        }

        /// Clears all recorded events.
        pub fn clear(&self) {
            self.buf.lock().clear();
        }
    }

    /// Returns the process-wide test event log.
    pub fn log() -> &'static EventLog {
        &RING
    }
}

#[cfg(feature = "event-log")]
pub use self::ring::{log, EventLog};
#[cfg(feature = "event-log")]
use self::ring::RING;

#[cfg(not(feature = "event-log"))]
/// Zero-sized no-op stand-in for the in-memory event log.
#[derive(Debug, Default)]
pub struct EventLog;

#[cfg(not(feature = "event-log"))]
impl EventLog {
    pub fn snapshot(&self) -> Vec<Event> {
        Vec::new()
    }

    pub fn clear(&self) {}
}

#[cfg(not(feature = "event-log"))]
static NOOP_LOG: EventLog = EventLog;

#[cfg(not(feature = "event-log"))]
pub fn log() -> &'static EventLog {
    &NOOP_LOG
}
