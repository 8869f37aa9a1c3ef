//! The public task-submission API.

use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::standard::acquire_set::BufferAcquireSet;
use crate::standard::device::ExecutorDeviceSet;
use crate::standard::group::Group;
use crate::standard::runtime;
use crate::standard::scheduler::{InlineScheduler, Scheduler};
use crate::standard::task::{Attributes, Task, TaskContext, TaskNode, TaskOutcome};

/// A value produced by a predecessor task, made available to a
/// successor's body once the predecessor finishes. Created with
/// [`pending`] and wired to a producer with [`TaskHandle::wire_input`].
pub struct Pending<T> {
    cell: Arc<Mutex<Option<T>>>,
}

impl<T: Clone> Pending<T> {
    /// Returns the predecessor's value. Only meaningful once the bound
    /// predecessor has actually finished, which a correctly wired control
    /// dependency guarantees before this task's body runs.
    pub fn get(&self) -> T {
        self.cell.lock().unwrap().clone().expect(
            "Pending::get called before the bound predecessor finished",
        )
    }
}

/// The write side of a [`Pending`] cell, handed to
/// [`TaskHandle::wire_input`] once the consuming task exists.
pub struct PendingWriter<T> {
    cell: Arc<Mutex<Option<T>>>,
}

/// Creates a not-yet-wired input slot: a [`Pending`] to capture in a task
/// body (the body calls `.get()` on it) and a [`PendingWriter`] to hand to
/// [`TaskHandle::wire_input`] once that task has been created.
pub fn pending<T>() -> (Pending<T>, PendingWriter<T>) {
    let cell = Arc::new(Mutex::new(None));
    (Pending { cell: cell.clone() }, PendingWriter { cell })
}

/// A handle to a submitted (or about to be submitted) unit of work.
pub struct TaskHandle<R> {
    task: Arc<Task<R>>,
}

impl<R> Clone for TaskHandle<R> {
    fn clone(&self) -> Self {
        TaskHandle { task: self.task.clone() }
    }
}

/// Creates an already-completed task that never runs a body and never
/// scheduler-dispatches.
pub fn create_value_task<R: Send + Clone + 'static>(value: R) -> Result<TaskHandle<R>> {
    runtime::current()?;
    Ok(TaskHandle { task: Task::new_value(value, None) })
}

/// Creates a bound task ready to have control/data dependencies wired and
/// then be launched.
pub fn create_task<R, F>(body: F) -> Result<TaskHandle<R>>
where
    R: Send + Clone + 'static,
    F: FnOnce(&TaskContext) -> R + Send + 'static,
{
    create_task_with_attributes(Attributes::empty(), body)
}

pub fn create_task_with_attributes<R, F>(attributes: Attributes, body: F) -> Result<TaskHandle<R>>
where
    R: Send + Clone + 'static,
    F: FnOnce(&TaskContext) -> R + Send + 'static,
{
    runtime::current()?;
    let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler);
    let task = Task::new_bound(attributes, None, scheduler, Box::new(move |ctx| Ok(body(ctx))));
    Ok(TaskHandle { task })
}

/// Creates a bound task that must acquire `buffers` against `device_set`
/// before its body runs. If the acquire conflicts with a peer task still
/// holding one of the buffers, this task is gated by a dynamic control
/// dependency on that peer instead of blocking the caller, and its body
/// runs once the peer releases.
pub fn create_task_with_buffers<R, F>(
    attributes: Attributes,
    device_set: ExecutorDeviceSet,
    buffers: BufferAcquireSet,
    body: F,
) -> Result<TaskHandle<R>>
where
    R: Send + Clone + 'static,
    F: FnOnce(&TaskContext) -> R + Send + 'static,
{
    runtime::current()?;
    let scheduler: Arc<dyn Scheduler> = Arc::new(InlineScheduler);
    let task = Task::new_bound(attributes, None, scheduler, Box::new(move |ctx| Ok(body(ctx))));
    task.set_buffers(buffers, device_set);
    Ok(TaskHandle { task })
}

/// Creates a named group. See [`Group`].
pub fn create_group(name: impl Into<String>) -> Arc<Group> {
    Group::new(name)
}

impl<R: Send + Clone + 'static> TaskHandle<R> {
    pub fn id(&self) -> crate::standard::object_id::TaskId {
        self.task.id()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        // Names are immutable after construction in this crate; exposed
        // for symmetry with `BufferHandle::set_name` where a future
        // revision may relax that.
        let _ = name;
    }

    pub(crate) fn node(&self) -> Arc<dyn TaskNode> {
        self.task.clone()
    }

    /// Wires `producer` as a data dependency of `self`: `producer` becomes
    /// a predecessor of `self`, and its value is written into `writer`'s
    /// cell right before `self` becomes ready to run. Pair with
    /// [`pending`] at the point `self`'s body is constructed.
    pub fn wire_input<P: Send + Clone + 'static>(
        &self,
        producer: &TaskHandle<P>,
        writer: PendingWriter<P>,
    ) -> Result<()> {
        let cell = writer.cell;
        let on_complete: Box<dyn FnOnce(&TaskOutcome<P>) + Send> = Box::new(move |outcome| {
            if let TaskOutcome::Value(v) = outcome {
                *cell.lock().unwrap() = Some(v.clone());
            }
        });
        producer.task.add_successor(self.node(), Some(on_complete))
    }

    /// Adds a pure control dependency: `successor` will not become ready
    /// until `self` finishes.
    pub fn then<S: Send + Clone + 'static>(&self, successor: &TaskHandle<S>) -> Result<()> {
        self.task.add_successor(successor.node(), None)
    }

    /// Adds a pure control dependency in the other direction: `self` will
    /// not become ready until `predecessor` finishes.
    pub fn after<P: Send + Clone + 'static>(&self, predecessor: &TaskHandle<P>) -> Result<()> {
        predecessor.task.add_successor(self.node(), None)
    }

    pub fn launch(&self) -> Result<()> {
        self.task.launch(None)
    }

    pub fn launch_in_group(&self, group: &Arc<Group>) -> Result<()> {
        self.task.launch(Some(group.clone()))
    }

    pub fn wait(&self) -> Result<R> {
        self.task.wait()
    }

    pub fn try_wait(&self) -> Option<Result<R>> {
        self.task.try_wait()
    }

    /// Every exception message recorded against this task, including ones
    /// propagated in from a failed predecessor.
    pub fn exceptions(&self) -> Vec<String> {
        self.task.exceptions()
    }

    pub fn cancel(&self) {
        TaskNode::cancel(self.task.as_ref());
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn is_canceled(&self) -> bool {
        self.task.is_canceled()
    }

    pub fn has_cancel_request(&self) -> bool {
        self.task.has_cancel_request()
    }

    /// Registers `alt` as an alternative implementation of this task for a
    /// different execution domain. Exactly one of `self` and its
    /// alternatives runs at dispatch; the rest are finalised unrun.
    pub fn add_alternative<S: Send + Clone + 'static>(&self, alt: &TaskHandle<S>) {
        self.task.add_alternative(alt.node());
    }
}

impl<'a> TaskContext<'a> {
    /// Convenience overload accepting a typed `TaskHandle` instead of a
    /// raw `Arc<dyn TaskNode>`.
    pub fn finish_after_handle<P: Send + Clone + 'static>(&self, other: &TaskHandle<P>) {
        self.finish_after(other.node());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::buffer_policy::AcquireAction;
    use crate::standard::buffer_state::BufferState;
    use crate::standard::runtime::{runtime_init, runtime_shutdown, RuntimeConfig};
    use serial_test::serial;

    #[test]
    #[serial]
    fn value_task_never_schedules() {
        runtime_init(RuntimeConfig::default()).unwrap();
        let t = create_value_task(7).unwrap();
        assert_eq!(t.wait().unwrap(), 7);
        runtime_shutdown().unwrap();
    }

    #[test]
    #[serial]
    fn data_dependency_delivers_predecessor_value() {
        runtime_init(RuntimeConfig::default()).unwrap();
        let producer = create_task(|_ctx| 5).unwrap();
        let (input, writer) = pending::<i32>();
        let successor = create_task(move |_ctx| input.get() * 10).unwrap();
        successor.wire_input(&producer, writer).unwrap();
        producer.launch().unwrap();
        successor.launch().unwrap();
        assert_eq!(successor.wait().unwrap(), 50);
        runtime_shutdown().unwrap();
    }

    #[test]
    #[serial]
    fn cancellation_propagates_through_chain() {
        runtime_init(RuntimeConfig::default()).unwrap();
        let t1 = create_task(|_ctx| 1).unwrap();
        let t2 = create_task(|_ctx| 2).unwrap();
        let t3 = create_task(|_ctx| 3).unwrap();
        t1.then(&t2).unwrap();
        t2.then(&t3).unwrap();
        t1.launch().unwrap();
        t2.launch().unwrap();
        t3.launch().unwrap();
        t1.cancel();
        assert!(t1.is_canceled());
        assert!(t2.is_canceled());
        assert!(t3.is_canceled());
        assert!(t3.wait().is_err());
        runtime_shutdown().unwrap();
    }

    #[test]
    #[serial]
    fn exception_propagates_through_chain_without_running_successor_body() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc as StdArc;

        runtime_init(RuntimeConfig::default()).unwrap();
        let t1 = create_task(|_ctx| -> i32 { panic!("boom") }).unwrap();
        let ran = StdArc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let t2 = create_task(move |_ctx| {
            ran2.store(true, Ordering::SeqCst);
            2
        })
        .unwrap();
        t1.then(&t2).unwrap();
        t1.launch().unwrap();
        t2.launch().unwrap();
        let err = t2.wait().unwrap_err();
        assert!(matches!(err, crate::error::Error::UserException(ref m) if m == "boom"));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(t2.exceptions(), vec!["boom".to_string()]);
        runtime_shutdown().unwrap();
    }

    #[test]
    #[serial]
    fn buffer_conflict_gates_successor_with_dynamic_dependency_and_retries() {
        use std::sync::mpsc;
        use std::thread;

        runtime_init(RuntimeConfig::default()).unwrap();

        let buf = Arc::new(BufferState::new(64, false));
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let mut set1 = BufferAcquireSet::new();
        set1.add(buf.clone(), AcquireAction::Write, false);
        let t1: TaskHandle<i32> = create_task_with_buffers(
            Attributes::empty(),
            ExecutorDeviceSet::CPU,
            set1,
            move |_ctx| {
                release_rx.recv().unwrap();
                1
            },
        )
        .unwrap();

        let t1_for_thread = t1.clone();
        let runner = thread::spawn(move || {
            t1_for_thread.launch().unwrap();
        });

        // Wait for t1 to actually hold the buffer before t2 attempts to
        // acquire it, so the conflict below is real rather than a race.
        while buf.acquire_set_len() == 0 {
            thread::yield_now();
        }

        let mut set2 = BufferAcquireSet::new();
        set2.add(buf.clone(), AcquireAction::Write, false);
        let t2: TaskHandle<i32> = create_task_with_buffers(
            Attributes::empty(),
            ExecutorDeviceSet::CPU,
            set2,
            |_ctx| 2,
        )
        .unwrap();
        t2.launch().unwrap();

        // t2's acquire conflicted with t1 (still holding the buffer) and
        // was gated by a dynamic control dependency instead of running.
        assert!(t2.try_wait().is_none());

        release_tx.send(()).unwrap();
        runner.join().unwrap();

        assert_eq!(t1.wait().unwrap(), 1);
        assert_eq!(t2.wait().unwrap(), 2);
        runtime_shutdown().unwrap();
    }

    #[test]
    #[serial]
    fn poly_task_runs_chosen_alternative_and_finalizes_the_rest() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc as StdArc;

        runtime_init(RuntimeConfig::default()).unwrap();

        let cpu_ran = StdArc::new(AtomicBool::new(false));
        let cpu_ran2 = cpu_ran.clone();
        // Domain-agnostic (no CPU/GPU/DSP bit), so it suits the CPU domain
        // the scheduler's default entry point resolves poly dispatch
        // against.
        let cpu_variant: TaskHandle<i32> = create_task(move |_ctx| {
            cpu_ran2.store(true, Ordering::SeqCst);
            42
        })
        .unwrap();

        // GPU-only: does not suit the CPU domain, so `head` itself loses.
        let head: TaskHandle<i32> = create_task_with_attributes(Attributes::GPU, |_ctx| 7).unwrap();
        head.add_alternative(&cpu_variant);
        head.launch().unwrap();

        assert_eq!(cpu_variant.wait().unwrap(), 42);
        assert!(cpu_ran.load(Ordering::SeqCst));
        assert!(head.is_finished());
        assert!(head.is_canceled());
        runtime_shutdown().unwrap();
    }
}
