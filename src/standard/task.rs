//! The task state machine: the unit of scheduled work.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::standard::acquire_set::BufferAcquireSet;
use crate::standard::device::{ExecutorDevice, ExecutorDeviceSet};
use crate::standard::event_log::{self, Event};
use crate::standard::group::Group;
use crate::standard::object_id::TaskId;
use crate::standard::scheduler::{InlineScheduler, Scheduler};

/// Process-wide lookup from `TaskId` to its live node, so a conflicting
/// acquire can resolve the `TaskId` a `BufferState` hands it back into an
/// actual `Arc<dyn TaskNode>` to hang a dynamic control dependency off of.
/// Entries are `Weak` so this never keeps a task alive on its own.
static TASK_REGISTRY: Lazy<Mutex<HashMap<TaskId, Weak<dyn TaskNode>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn lookup_task(id: TaskId) -> Option<Arc<dyn TaskNode>> {
    TASK_REGISTRY.lock().get(&id).and_then(Weak::upgrade)
}

bitflags! {
    #[derive(Default)]
    struct StateBits: u32 {
        const BOUND              = 1 << 0;
        const LAUNCHED            = 1 << 1;
        const RUNNING             = 1 << 2;
        const HAS_CANCEL_REQUEST  = 1 << 3;
        const CANCELED            = 1 << 4;
        const COMPLETED           = 1 << 5;
        const IN_UTCACHE          = 1 << 6;
    }
}

bitflags! {
    /// Immutable attributes fixed at task creation.
    #[derive(Default)]
    pub struct Attributes: u16 {
        const ANONYMOUS      = 1 << 0;
        const BLOCKING       = 1 << 1;
        const BIG            = 1 << 2;
        const LITTLE         = 1 << 3;
        const LONG_RUNNING   = 1 << 4;
        const STUB           = 1 << 5;
        const TRIGGER        = 1 << 6;
        const PFOR           = 1 << 7;
        const NON_CANCELABLE = 1 << 8;
        const YIELD          = 1 << 9;
        const GPU            = 1 << 10;
        const CPU            = 1 << 11;
        const DSP            = 1 << 12;
        const INLINED        = 1 << 13;
        /// Marks the user-facing head of a poly-task group: its
        /// `alternatives` list holds domain-specific variants, one of
        /// which actually runs in its place.
        const POLY           = 1 << 14;
    }
}

/// Outcome recorded once a task has finished, in any fashion.
#[derive(Clone)]
pub enum TaskOutcome<R> {
    Value(R),
    Canceled,
    Exception(String),
}

/// Object-safe handle to a task, used for graph bookkeeping (successor
/// lists, groups, dynamic dependencies) without needing to know the
/// concrete return type of every node in the graph.
pub trait TaskNode: Send + Sync {
    fn id(&self) -> TaskId;
    fn name(&self) -> Option<String>;
    fn attributes(&self) -> Attributes;
    fn is_finished(&self) -> bool;
    fn is_canceled(&self) -> bool;
    fn has_cancel_request(&self) -> bool;
    fn increment_predecessor_count(&self);
    /// Called once per finished predecessor. When the count reaches zero
    /// the task becomes ready and is handed to its scheduler (or run
    /// inline for kinds that bypass the queue).
    fn predecessor_finished(&self);
    /// Request cancellation. A no-op once already finished.
    fn cancel(&self);
    /// Forces this task straight to a finished, excepted state without
    /// running its body, and cascades the same exception to its own
    /// successors in turn. Used to propagate a predecessor's panic down
    /// the dependency graph.
    fn propagate_exception(&self, msg: &str);
    /// Adds `successor` as a dynamic dependency on `self` and resets the
    /// successor's `running` bit so a buffer-conflict resolution can
    /// re-attempt execution later. Returns false if the task already
    /// finished (the caller should retry acquisition instead of waiting).
    fn add_dynamic_control_dependency(&self, successor: Arc<dyn TaskNode>) -> bool;
    /// Pre-launch control dependency; errors if `self` is already launched.
    fn add_control_dependency(&self, successor: Arc<dyn TaskNode>) -> Result<()>;
    /// Clears the `running` bit without touching completion state; called
    /// on a successor from `add_dynamic_control_dependency` so dispatch can
    /// retry it.
    fn reset_running(&self);
    /// Detaches this task from its group, if any, without marking it
    /// finished. Used on a poly-task alternative that lost selection.
    fn leave_groups(&self);
    /// Finalises a poly-task alternative that never ran, so any
    /// successors or finish-waiters it holds are released the same way a
    /// normal cancellation would release them.
    fn unref(&self);
    fn set_group(&self, group: Arc<Group>);
    fn set_finish_after(&self, target: Arc<dyn TaskNode>);
    fn add_finish_waiter(&self, waiter: Arc<dyn TaskNode>);
    fn complete_deferred(&self);
    /// Runs the task body now, on the calling thread. Used both by
    /// schedulers draining their ready queue and by task kinds (gpu,
    /// blocking, inlined, dsp) that bypass the queue entirely.
    fn run(&self);
}

struct SuccessorEdge<R> {
    node: Arc<dyn TaskNode>,
    /// `Some` for a data dependency: invoked with the producer's outcome so
    /// the successor's argument slot can be filled before its predecessor
    /// count is decremented. `None` for a pure control edge.
    on_complete: Option<Box<dyn FnOnce(&TaskOutcome<R>) + Send>>,
}

struct Inner<R> {
    successors: Vec<SuccessorEdge<R>>,
    finish_waiters: Vec<Arc<dyn TaskNode>>,
    finish_after_target: Option<Arc<dyn TaskNode>>,
    group: Option<Arc<Group>>,
    exceptions: Vec<String>,
    outcome: Option<TaskOutcome<R>>,
    body: Option<Box<dyn FnOnce(&TaskContext) -> std::result::Result<R, String> + Send>>,
    /// Poly-task alternatives, in registration order. Empty for an
    /// ordinary task.
    alternatives: Vec<Arc<dyn TaskNode>>,
}

/// A task's just-in-time buffer acquisition, installed before launch and
/// resolved on first dispatch rather than blocking the dispatching thread.
struct TaskAcquire {
    set: BufferAcquireSet,
    device_set: ExecutorDeviceSet,
}

/// A handle a running task body receives, letting it poll cancellation and
/// defer completion via `finish_after`.
pub struct TaskContext<'a> {
    node: &'a dyn TaskNode,
}

impl<'a> TaskContext<'a> {
    pub fn abort_on_cancel(&self) -> bool {
        self.node.has_cancel_request()
    }

    /// Defers this task's observable completion until `other` finishes.
    /// May only be called from within the task's own body.
    pub fn finish_after(&self, other: Arc<dyn TaskNode>) {
        self.node.set_finish_after(other);
    }
}

/// The unit of scheduled work.
pub struct Task<R> {
    id: TaskId,
    name: Option<String>,
    attributes: Attributes,
    state: AtomicU32,
    predecessor_count: AtomicUsize,
    cond: Condvar,
    inner: Mutex<Inner<R>>,
    scheduler: Arc<dyn Scheduler>,
    self_ref: Mutex<Weak<Task<R>>>,
    acquire: Mutex<Option<TaskAcquire>>,
}

impl<R: Send + Clone + 'static> Task<R> {
    fn new_raw(
        attributes: Attributes,
        name: Option<String>,
        scheduler: Arc<dyn Scheduler>,
        bound: bool,
        body: Option<Box<dyn FnOnce(&TaskContext) -> std::result::Result<R, String> + Send>>,
        outcome: Option<TaskOutcome<R>>,
    ) -> Arc<Task<R>> {
        let state = if bound { StateBits::BOUND.bits() } else { 0 };
        let task = Arc::new(Task {
            id: TaskId::next(),
            name,
            attributes,
            state: AtomicU32::new(state),
            predecessor_count: AtomicUsize::new(0),
            cond: Condvar::new(),
            inner: Mutex::new(Inner {
                successors: Vec::new(),
                finish_waiters: Vec::new(),
                finish_after_target: None,
                group: None,
                exceptions: Vec::new(),
                outcome,
                body,
                alternatives: Vec::new(),
            }),
            scheduler,
            self_ref: Mutex::new(Weak::new()),
            acquire: Mutex::new(None),
        });
        *task.self_ref.lock() = Arc::downgrade(&task);
        let node: Weak<dyn TaskNode> = Arc::downgrade(&task);
        TASK_REGISTRY.lock().insert(task.id, node);
        event_log::emit(Event::TaskCreated(task.id));
        task
    }

    /// A value task: already completed, never scheduled.
    pub fn new_value(value: R, name: Option<String>) -> Arc<Task<R>> {
        let task = Self::new_raw(
            Attributes::empty(),
            name,
            Arc::new(InlineScheduler),
            true,
            None,
            Some(TaskOutcome::Value(value)),
        );
        task.state.fetch_or(StateBits::COMPLETED.bits(), Ordering::AcqRel);
        task
    }

    /// A task whose body still needs argument binding before it becomes
    /// launchable.
    pub fn new_unbound(
        attributes: Attributes,
        name: Option<String>,
        scheduler: Arc<dyn Scheduler>,
        body: Box<dyn FnOnce(&TaskContext) -> std::result::Result<R, String> + Send>,
    ) -> Arc<Task<R>> {
        Self::new_raw(attributes, name, scheduler, false, Some(body), None)
    }

    /// A task that is already fully bound (no argument slots to wait on).
    pub fn new_bound(
        attributes: Attributes,
        name: Option<String>,
        scheduler: Arc<dyn Scheduler>,
        body: Box<dyn FnOnce(&TaskContext) -> std::result::Result<R, String> + Send>,
    ) -> Arc<Task<R>> {
        Self::new_raw(attributes, name, scheduler, true, Some(body), None)
    }

    pub fn mark_bound(&self) {
        self.state.fetch_or(StateBits::BOUND.bits(), Ordering::AcqRel);
    }

    /// Installs the buffer-acquire set this task must hold before its body
    /// runs. Acquired just-in-time on first dispatch rather than up front;
    /// a conflicting peer gates this task via a dynamic control dependency
    /// instead of blocking the dispatching thread. Pre-launch only.
    pub fn set_buffers(&self, set: BufferAcquireSet, device_set: ExecutorDeviceSet) {
        *self.acquire.lock() = Some(TaskAcquire { set, device_set });
    }

    /// Registers `alt` as an alternative implementation of this task for a
    /// different execution domain. At dispatch, exactly one of `self` and
    /// its alternatives runs; the rest are finalised without running.
    pub fn add_alternative(&self, alt: Arc<dyn TaskNode>) {
        self.inner.lock().alternatives.push(alt);
    }

    /// Linear scan for the variant suitable for `domain`: `0` if `self`
    /// already suits it, otherwise the 1-based index of the first
    /// registered alternative whose attributes suit it. Falls back to `0`
    /// if no alternative matches either.
    pub fn get_suitable_alternative(&self, domain: ExecutorDevice) -> usize {
        if attributes_suit_domain(self.attributes, domain) {
            return 0;
        }
        let inner = self.inner.lock();
        for (i, alt) in inner.alternatives.iter().enumerate() {
            if attributes_suit_domain(alt.attributes(), domain) {
                return i + 1;
            }
        }
        0
    }

    /// Poly-task dispatch: selects the suitable variant for `domain` and
    /// runs it, then finalises every other member of the poly-group
    /// (`leave_groups` + `unref`) so none of them linger as a dangling
    /// predecessor or group member.
    pub fn run_poly(&self, domain: ExecutorDevice) {
        let alternatives = self.inner.lock().alternatives.clone();
        let chosen = self.get_suitable_alternative(domain);
        if chosen == 0 {
            self.run_now_impl();
        } else {
            alternatives[chosen - 1].run();
            TaskNode::leave_groups(self);
            TaskNode::unref(self);
        }
        for (i, alt) in alternatives.iter().enumerate() {
            if i + 1 != chosen {
                alt.leave_groups();
                alt.unref();
            }
        }
    }

    fn flags(&self) -> StateBits {
        StateBits::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    pub fn is_bound(&self) -> bool {
        self.flags().contains(StateBits::BOUND)
    }

    pub fn is_launched(&self) -> bool {
        self.flags().contains(StateBits::LAUNCHED)
    }

    fn self_arc(&self) -> Arc<Task<R>> {
        self.self_ref.lock().upgrade().expect("task dropped while operating on itself")
    }

    /// Transitions bound -> launched. If the predecessor count is already
    /// zero the task is handed to its scheduler immediately.
    pub fn launch(&self, group: Option<Arc<Group>>) -> Result<()> {
        if !self.is_bound() {
            return Err(Error::InvalidArgument(format!("task {} is not bound", self.id)));
        }
        if let Some(g) = group {
            g.join_node(self.self_arc())?;
            self.inner.lock().group = Some(g);
        }
        self.state.fetch_or(StateBits::LAUNCHED.bits(), Ordering::AcqRel);
        event_log::emit(Event::TaskLaunched(self.id));
        if self.predecessor_count.load(Ordering::Acquire) == 0 {
            self.dispatch_ready();
        }
        Ok(())
    }

    fn dispatch_ready(&self) {
        if self.flags().contains(StateBits::CANCELED) || self.flags().contains(StateBits::COMPLETED) {
            return;
        }
        let bypasses_queue = self.attributes.intersects(
            Attributes::GPU | Attributes::BLOCKING | Attributes::INLINED | Attributes::DSP,
        );
        let node: Arc<dyn TaskNode> = self.self_arc();
        if bypasses_queue {
            node.run();
        } else {
            self.scheduler.spawn_ready(node);
        }
    }

    /// Attempts the running-bit transition; `Ok(())` on success, `Err(())`
    /// if it was already set (a concurrent acquire-conflict resolution
    /// reset it and another thread won the race).
    fn try_take_running(&self) -> std::result::Result<(), ()> {
        loop {
            let cur = self.state.load(Ordering::Acquire);
            if cur & StateBits::RUNNING.bits() != 0 {
                return Err(());
            }
            let next = cur | StateBits::RUNNING.bits();
            if self.state.compare_exchange(cur, next, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                return Ok(());
            }
        }
    }

    /// Attempts this task's installed buffer acquisition, if any. `None`
    /// means no buffers are wired. `Some(true)` means acquired (or nothing
    /// to acquire once wired). `Some(false)` means a conflicting peer was
    /// found and a dynamic control dependency was registered on it; our
    /// own `running` bit has already been cleared by that call, so the
    /// caller should simply return without finalizing.
    fn try_acquire_buffers(&self) -> Result<Option<bool>> {
        let mut guard = self.acquire.lock();
        let acq = match guard.as_mut() {
            Some(a) => a,
            None => return Ok(None),
        };
        let self_node: Arc<dyn TaskNode> = self.self_arc();
        let ok = acq.set.blocking_acquire(self.id, acq.device_set, true, |conflicter| {
            match lookup_task(conflicter) {
                Some(node) => node.add_dynamic_control_dependency(self_node.clone()),
                None => false,
            }
        })?;
        Ok(Some(ok))
    }

    fn release_buffers(&self) {
        if let Some(acq) = self.acquire.lock().as_mut() {
            acq.set.release(self.id);
        }
    }

    fn run_now_impl(&self) {
        if self.try_take_running().is_err() {
            return;
        }
        let group_canceled = self.inner.lock().group.as_ref().map(|g| g.is_canceled()).unwrap_or(false);
        if self.flags().contains(StateBits::HAS_CANCEL_REQUEST) || group_canceled {
            self.finalize(TaskOutcome::Canceled);
            return;
        }

        match self.try_acquire_buffers() {
            Ok(Some(false)) => return,
            Ok(_) => {}
            Err(e) => {
                self.finalize(TaskOutcome::Exception(e.to_string()));
                return;
            }
        }

        event_log::emit(Event::TaskRan(self.id));
        let body = self.inner.lock().body.take();
        let body = match body {
            Some(b) => b,
            None => {
                self.release_buffers();
                return;
            }
        };

        let ctx = TaskContext { node: self.as_ref() };
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx)));

        let outcome = match result {
            Ok(Ok(value)) => TaskOutcome::Value(value),
            Ok(Err(msg)) => TaskOutcome::Exception(msg),
            Err(payload) => TaskOutcome::Exception(panic_message(payload)),
        };

        self.release_buffers();

        if let TaskOutcome::Exception(ref msg) = outcome {
            self.inner.lock().exceptions.push(msg.clone());
        }

        let deferred = self.inner.lock().finish_after_target.is_some();
        if deferred {
            let target = self.inner.lock().finish_after_target.clone().unwrap();
            self.inner.lock().outcome = Some(outcome);
            target.add_finish_waiter(self.self_arc());
        } else {
            self.finalize(outcome);
        }
    }

    fn finalize(&self, outcome: TaskOutcome<R>) {
        if self.flags().contains(StateBits::COMPLETED) {
            return;
        }
        let (successors, finish_waiters, group) = {
            let mut inner = self.inner.lock();
            inner.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut inner.successors),
                std::mem::take(&mut inner.finish_waiters),
                inner.group.take(),
            )
        };

        let canceled_bit = matches!(outcome, TaskOutcome::Canceled);
        let mut bits = StateBits::COMPLETED.bits();
        if canceled_bit {
            bits |= StateBits::CANCELED.bits();
        }
        self.state.fetch_or(bits, Ordering::AcqRel);
        event_log::emit(Event::TaskFinished(self.id, canceled_bit));

        for edge in successors {
            match &outcome {
                TaskOutcome::Canceled => edge.node.cancel(),
                TaskOutcome::Exception(msg) => edge.node.propagate_exception(msg),
                TaskOutcome::Value(_) => {
                    if let Some(cb) = edge.on_complete {
                        cb(&outcome);
                    }
                    edge.node.predecessor_finished();
                }
            }
        }
        if let Some(g) = group {
            g.leave(self.id);
        }
        self.cond.notify_all();
        for waiter in finish_waiters {
            waiter.complete_deferred();
        }
    }

    /// Blocks until the task finishes, returning its value or a structured
    /// error for cancellation/exception.
    pub fn wait(&self) -> Result<R> {
        let mut inner = self.inner.lock();
        while inner.outcome.is_none() {
            self.cond.wait(&mut inner);
        }
        match inner.outcome.clone().unwrap() {
            TaskOutcome::Value(v) => Ok(v),
            TaskOutcome::Canceled => Err(Error::TaskCanceled),
            TaskOutcome::Exception(msg) => Err(Error::UserException(msg)),
        }
    }

    pub fn try_wait(&self) -> Option<Result<R>> {
        let inner = self.inner.lock();
        inner.outcome.clone().map(|o| match o {
            TaskOutcome::Value(v) => Ok(v),
            TaskOutcome::Canceled => Err(Error::TaskCanceled),
            TaskOutcome::Exception(msg) => Err(Error::UserException(msg)),
        })
    }

    /// Every exception message this task has recorded, in the order they
    /// arrived: its own body's panic/`Err` (if any) plus one entry for
    /// each predecessor whose exception was propagated into it.
    pub fn exceptions(&self) -> Vec<String> {
        self.inner.lock().exceptions.clone()
    }

    /// Adds a successor edge. `on_complete`, if given, is invoked with this
    /// task's outcome right before the successor's predecessor count is
    /// decremented, so it can push a value into an argument slot.
    pub fn add_successor(
        &self,
        node: Arc<dyn TaskNode>,
        on_complete: Option<Box<dyn FnOnce(&TaskOutcome<R>) + Send>>,
    ) -> Result<()> {
        if self.is_launched() {
            return Err(Error::AlreadyLaunched);
        }
        node.increment_predecessor_count();
        self.inner.lock().successors.push(SuccessorEdge { node, on_complete });
        Ok(())
    }
}

impl<R> Drop for Task<R> {
    fn drop(&mut self) {
        TASK_REGISTRY.lock().remove(&self.id);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

fn domain_bit(domain: ExecutorDevice) -> Attributes {
    match domain {
        ExecutorDevice::Cpu | ExecutorDevice::Unspecified => Attributes::CPU,
        ExecutorDevice::Dsp => Attributes::DSP,
        ExecutorDevice::GpuCl | ExecutorDevice::GpuGl | ExecutorDevice::GpuTexture => Attributes::GPU,
    }
}

/// A task with no domain bits set is treated as domain-agnostic (suitable
/// anywhere); otherwise it must carry the bit matching `domain`.
fn attributes_suit_domain(attrs: Attributes, domain: ExecutorDevice) -> bool {
    let domain_bits = Attributes::CPU | Attributes::GPU | Attributes::DSP;
    !attrs.intersects(domain_bits) || attrs.intersects(domain_bit(domain))
}

impl<R: Send + Clone + 'static> TaskNode for Task<R> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn attributes(&self) -> Attributes {
        self.attributes
    }

    fn is_finished(&self) -> bool {
        self.flags().contains(StateBits::COMPLETED)
    }

    fn is_canceled(&self) -> bool {
        self.flags().contains(StateBits::CANCELED)
    }

    fn has_cancel_request(&self) -> bool {
        self.flags().contains(StateBits::HAS_CANCEL_REQUEST)
    }

    fn increment_predecessor_count(&self) {
        self.predecessor_count.fetch_add(1, Ordering::AcqRel);
    }

    fn predecessor_finished(&self) {
        let remaining = self.predecessor_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.is_launched() && !self.is_canceled() && !self.is_finished() {
            self.dispatch_ready();
        }
    }

    fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        self.state.fetch_or(StateBits::HAS_CANCEL_REQUEST.bits(), Ordering::AcqRel);
        event_log::emit(Event::TaskCanceled(self.id));
        if !self.flags().contains(StateBits::RUNNING) {
            self.finalize(TaskOutcome::Canceled);
        }
    }

    fn propagate_exception(&self, msg: &str) {
        self.inner.lock().exceptions.push(msg.to_string());
        if self.is_finished() {
            return;
        }
        event_log::emit(Event::TaskExcepted(self.id));
        self.finalize(TaskOutcome::Exception(msg.to_string()));
    }

    fn add_dynamic_control_dependency(&self, successor: Arc<dyn TaskNode>) -> bool {
        if self.is_finished() {
            return false;
        }
        successor.increment_predecessor_count();
        successor.reset_running();
        self.inner.lock().successors.push(SuccessorEdge { node: successor, on_complete: None });
        true
    }

    fn add_control_dependency(&self, successor: Arc<dyn TaskNode>) -> Result<()> {
        if successor.is_finished() {
            return Ok(());
        }
        if self.is_launched() {
            return Err(Error::AlreadyLaunched);
        }
        successor.increment_predecessor_count();
        self.inner.lock().successors.push(SuccessorEdge { node: successor, on_complete: None });
        Ok(())
    }

    fn reset_running(&self) {
        self.state.fetch_and(!StateBits::RUNNING.bits(), Ordering::AcqRel);
    }

    fn leave_groups(&self) {
        if let Some(g) = self.inner.lock().group.take() {
            g.leave(self.id);
        }
    }

    fn unref(&self) {
        if !self.is_finished() {
            self.cancel();
        }
    }

    fn set_group(&self, group: Arc<Group>) {
        self.inner.lock().group = Some(group);
    }

    fn set_finish_after(&self, target: Arc<dyn TaskNode>) {
        self.inner.lock().finish_after_target = Some(target);
    }

    fn add_finish_waiter(&self, waiter: Arc<dyn TaskNode>) {
        self.inner.lock().finish_waiters.push(waiter);
    }

    fn complete_deferred(&self) {
        let outcome = self.inner.lock().outcome.clone();
        if let Some(outcome) = outcome {
            self.finalize(outcome);
        }
    }

    fn run(&self) {
        if self.inner.lock().alternatives.is_empty() {
            self.run_now_impl();
        } else {
            // Schedulers only see a type-erased `TaskNode`; there is no way
            // for them to report the executing domain through this entry
            // point, so poly dispatch resolves against the CPU domain here.
            // A caller that knows the real domain up front should use
            // `run_poly` directly instead of going through the scheduler.
            self.run_poly(ExecutorDevice::Cpu);
        }
    }
}
