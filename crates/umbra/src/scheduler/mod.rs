//! Deterministic Scheduler
//!
//! Simulates one logical thread's message queue. Tasks are ordered by
//! `(trigger time, insertion sequence)`; simulated time only moves through
//! explicit calls (`advance_by`, `advance_to`, `run_one_task`, ...).
//!
//! ## Toyota Way Application
//!
//! - **Heijunka**: equal-time tasks run strictly in posting order
//! - **Jidoka**: a failing task stops the drain and reports; remaining tasks
//!   stay queued
//! - **Poka-Yoke**: the queue lock is never held while a task runs, so tasks
//!   may freely post, cancel and drain
//!
//! ## Idle states
//!
//! | State          | `post` with zero delay | `post_delayed`            |
//! |----------------|------------------------|---------------------------|
//! | `Unpaused`     | runs before returning  | queued                    |
//! | `Paused`       | queued                 | queued                    |
//! | `ConstantIdle` | runs before returning  | runs, clock jumps forward |
//!
//! Posts made while a task is executing, or from a thread other than the
//! scheduler's owner, are always queued.

mod registry;

pub use registry::{ContextId, SchedulerRegistry};

use crate::result::{TaskError, UmbraError, UmbraResult};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, trace};

/// Outcome of a task body
pub type TaskResult = Result<(), TaskError>;

type Task = Box<dyn FnOnce() -> TaskResult + Send>;

/// Default bound on tasks run by a single drain
pub const DEFAULT_MAX_TASKS_PER_DRAIN: usize = 100_000;

/// Handle for cancelling a posted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the scheduler treats newly posted work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdleState {
    /// Nothing runs until drained explicitly
    Paused,
    /// Due work runs as soon as it is posted
    #[default]
    Unpaused,
    /// All work runs as soon as it is posted, advancing the clock
    ConstantIdle,
}

/// `(trigger_ms, order)`; front-of-queue posts use negative orders
type QueueKey = (u64, i64);

struct ScheduledTask {
    id: TaskId,
    work: Task,
}

struct SchedulerState {
    now_ms: u64,
    queue: BTreeMap<QueueKey, ScheduledTask>,
    index: HashMap<TaskId, QueueKey>,
    next_order: i64,
    next_front_order: i64,
    next_id: u64,
    idle_state: IdleState,
    executing: bool,
    quit: bool,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            now_ms: 0,
            queue: BTreeMap::new(),
            index: HashMap::new(),
            next_order: 0,
            next_front_order: -1,
            next_id: 1,
            idle_state: IdleState::default(),
            executing: false,
            quit: false,
        }
    }

    fn enqueue(&mut self, key: QueueKey, work: Task) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.queue.insert(key, ScheduledTask { id, work });
        self.index.insert(id, key);
        id
    }

    fn pop_first(&mut self) -> Option<(QueueKey, ScheduledTask)> {
        let (key, task) = self.queue.pop_first()?;
        self.index.remove(&task.id);
        Some((key, task))
    }

    /// Remove the next task if it triggers at or before `limit_ms`
    fn pop_due(&mut self, limit_ms: u64) -> Option<ScheduledTask> {
        if self.next_trigger()? > limit_ms {
            return None;
        }
        self.pop_first().map(|(_, task)| task)
    }

    fn next_trigger(&self) -> Option<u64> {
        self.queue.keys().next().map(|(trigger, _)| *trigger)
    }
}

/// Deterministic task queue for one execution context
pub struct Scheduler {
    context: ContextId,
    owner: ThreadId,
    max_tasks_per_drain: usize,
    state: Mutex<SchedulerState>,
}

/// Restores the previous `executing` flag, even if the task panics
struct ExecutingGuard<'a> {
    scheduler: &'a Scheduler,
    previous: bool,
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.lock().executing = self.previous;
    }
}

/// Puts back the idle state saved by `run_paused`
struct IdleStateGuard<'a> {
    scheduler: &'a Scheduler,
    previous: IdleState,
}

impl Drop for IdleStateGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.lock().idle_state = self.previous;
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Scheduler {
    /// Scheduler owned by the calling thread
    #[must_use]
    pub fn new(context: impl Into<ContextId>) -> Self {
        Self::with_owner(context.into(), thread::current().id(), DEFAULT_MAX_TASKS_PER_DRAIN)
    }

    pub(crate) fn with_owner(context: ContextId, owner: ThreadId, max_tasks_per_drain: usize) -> Self {
        Self {
            context,
            owner,
            max_tasks_per_drain,
            state: Mutex::new(SchedulerState::new()),
        }
    }

    /// Set the runaway guard
    #[must_use]
    pub fn with_max_tasks_per_drain(mut self, limit: usize) -> Self {
        self.max_tasks_per_drain = limit;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn context(&self) -> &ContextId {
        &self.context
    }

    // =========================================================================
    // Posting
    // =========================================================================

    /// Post `task` at the current time
    pub fn post<F>(&self, task: F) -> UmbraResult<TaskId>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.post_delayed(task, Duration::ZERO)
    }

    /// Post `task` to trigger `delay` after the current time
    pub fn post_delayed<F>(&self, task: F, delay: Duration) -> UmbraResult<TaskId>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let delay_ms = duration_ms(delay);
        let (id, drain) = {
            let mut st = self.lock();
            self.check_not_quit(&st)?;
            let trigger = st.now_ms.saturating_add(delay_ms);
            let order = st.next_order;
            st.next_order += 1;
            let id = st.enqueue((trigger, order), Box::new(task));
            let runs_now = match st.idle_state {
                IdleState::Paused => false,
                IdleState::Unpaused => delay_ms == 0,
                IdleState::ConstantIdle => true,
            };
            (id, self.drain_for(&st, runs_now))
        };
        trace!(context = %self.context, task = %id, delay_ms, "posted task");
        self.run_drain(drain)?;
        Ok(id)
    }

    /// Post `task` ahead of every queued task
    pub fn post_at_front_of_queue<F>(&self, task: F) -> UmbraResult<TaskId>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let (id, drain) = {
            let mut st = self.lock();
            self.check_not_quit(&st)?;
            let order = st.next_front_order;
            st.next_front_order -= 1;
            let id = st.enqueue((0, order), Box::new(task));
            let runs_now = st.idle_state != IdleState::Paused;
            (id, self.drain_for(&st, runs_now))
        };
        trace!(context = %self.context, task = %id, "posted task at front of queue");
        self.run_drain(drain)?;
        Ok(id)
    }

    /// Remove a pending task. Returns `false` if it already ran or was
    /// never posted here.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut st = self.lock();
        match st.index.remove(&id) {
            Some(key) => {
                st.queue.remove(&key);
                trace!(context = %self.context, task = %id, "cancelled task");
                true
            }
            None => false,
        }
    }

    fn check_not_quit(&self, st: &SchedulerState) -> UmbraResult<()> {
        if st.quit {
            Err(UmbraError::SchedulerQuit {
                context: self.context.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn drain_for(&self, st: &SchedulerState, runs_now: bool) -> Option<IdleState> {
        let eligible = runs_now && !st.executing && thread::current().id() == self.owner;
        eligible.then_some(st.idle_state)
    }

    fn run_drain(&self, drain: Option<IdleState>) -> UmbraResult<()> {
        match drain {
            Some(IdleState::ConstantIdle) => self.run_to_end_of_tasks().map(drop),
            Some(_) => self.idle().map(drop),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Idle state
    // =========================================================================

    /// Stop running posted work automatically
    pub fn pause(&self) {
        self.lock().idle_state = IdleState::Paused;
    }

    /// Resume automatic execution, draining everything already due
    pub fn unpause(&self) -> UmbraResult<usize> {
        self.lock().idle_state = IdleState::Unpaused;
        self.idle()
    }

    /// Switch idle state; unpausing drains due tasks and constant idle runs
    /// every queued task.
    pub fn set_idle_state(&self, state: IdleState) -> UmbraResult<()> {
        self.lock().idle_state = state;
        debug!(context = %self.context, ?state, "idle state changed");
        match state {
            IdleState::Paused => Ok(()),
            IdleState::Unpaused => self.idle().map(drop),
            IdleState::ConstantIdle => self.run_to_end_of_tasks().map(drop),
        }
    }

    /// Pause or unpause, returning whether the scheduler was paused.
    /// Unpausing leaves `ConstantIdle` in place.
    pub fn set_paused(&self, paused: bool) -> UmbraResult<bool> {
        let previous = self.idle_state();
        match (paused, previous) {
            (true, _) => self.pause(),
            (false, IdleState::Paused) => self.set_idle_state(IdleState::Unpaused)?,
            (false, state) => self.set_idle_state(state)?,
        }
        Ok(previous == IdleState::Paused)
    }

    /// Run `f` with the scheduler paused, then restore the exact previous
    /// idle state. The state is restored even if `f` panics; due work is
    /// only drained after a normal return.
    pub fn run_paused<R>(&self, f: impl FnOnce() -> R) -> UmbraResult<R> {
        let previous = self.idle_state();
        self.pause();
        let result = {
            let _restore = IdleStateGuard {
                scheduler: self,
                previous,
            };
            f()
        };
        if previous != IdleState::Paused {
            self.set_idle_state(previous)?;
        }
        Ok(result)
    }

    #[must_use]
    pub fn idle_state(&self) -> IdleState {
        self.lock().idle_state
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.idle_state() == IdleState::Paused
    }

    // =========================================================================
    // Draining
    // =========================================================================

    /// Run every task due at the current time, including due tasks posted
    /// while draining. The clock does not move.
    pub fn idle(&self) -> UmbraResult<usize> {
        let mut ran = 0;
        loop {
            let next = {
                let mut st = self.lock();
                let now = st.now_ms;
                if st.next_trigger().is_some_and(|trigger| trigger <= now) {
                    self.check_budget(ran)?;
                }
                st.pop_due(now)
            };
            let Some(task) = next else {
                return Ok(ran);
            };
            ran += 1;
            self.execute(task)?;
        }
    }

    /// Advance the clock by `delta`, running tasks as their trigger time is
    /// reached
    pub fn advance_by(&self, delta: Duration) -> UmbraResult<usize> {
        let target = self.current_time_ms().saturating_add(duration_ms(delta));
        self.advance_to(target)
    }

    /// Advance the clock to `target_ms`, running every task triggering at or
    /// before it in order. Each task observes its own trigger time. Targets
    /// in the past only drain due tasks.
    pub fn advance_to(&self, target_ms: u64) -> UmbraResult<usize> {
        let mut ran = 0;
        loop {
            let next = {
                let mut st = self.lock();
                let target = target_ms.max(st.now_ms);
                match st.next_trigger() {
                    Some(trigger) if trigger <= target => {
                        self.check_budget(ran)?;
                        st.now_ms = st.now_ms.max(trigger);
                        st.pop_first().map(|(_, task)| task)
                    }
                    _ => {
                        st.now_ms = target;
                        None
                    }
                }
            };
            let Some(task) = next else {
                return Ok(ran);
            };
            ran += 1;
            self.execute(task)?;
        }
    }

    /// Run exactly the next task, moving the clock to its trigger time if
    /// that is later. Returns `false` if the queue was empty.
    pub fn run_one_task(&self) -> UmbraResult<bool> {
        let next = {
            let mut st = self.lock();
            let popped = st.pop_first();
            popped.map(|((trigger, _), task)| {
                st.now_ms = st.now_ms.max(trigger);
                task
            })
        };
        match next {
            Some(task) => {
                self.execute(task)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run tasks one at a time until the queue is empty
    pub fn run_to_end_of_tasks(&self) -> UmbraResult<usize> {
        let mut ran = 0;
        loop {
            if self.size() == 0 {
                return Ok(ran);
            }
            self.check_budget(ran)?;
            ran += 1;
            self.run_one_task()?;
        }
    }

    /// Advance to the next trigger time, running every task due then
    pub fn advance_to_next_posted_task(&self) -> UmbraResult<usize> {
        match self.next_task_time() {
            Some(trigger) => self.advance_to(trigger),
            None => Ok(0),
        }
    }

    /// Advance to the latest trigger time currently queued
    pub fn advance_to_last_posted_task(&self) -> UmbraResult<usize> {
        let last = self.lock().queue.keys().map(|(trigger, _)| *trigger).max();
        match last {
            Some(trigger) => self.advance_to(trigger),
            None => Ok(0),
        }
    }

    /// Fails before the task that would exceed the runaway guard is taken
    /// off the queue
    fn check_budget(&self, ran: usize) -> UmbraResult<()> {
        if ran >= self.max_tasks_per_drain {
            return Err(UmbraError::RunawayScheduler {
                context: self.context.to_string(),
                limit: self.max_tasks_per_drain,
            });
        }
        Ok(())
    }

    fn execute(&self, task: ScheduledTask) -> UmbraResult<()> {
        let ScheduledTask { id, work } = task;
        let _guard = {
            let mut st = self.lock();
            let previous = st.executing;
            st.executing = true;
            ExecutingGuard {
                scheduler: self,
                previous,
            }
        };
        trace!(context = %self.context, task = %id, "running task");
        work().map_err(|source| {
            debug!(context = %self.context, task = %id, error = %source, "task failed");
            UmbraError::SchedulerTaskFailed {
                context: self.context.to_string(),
                task: id.as_u64(),
                source,
            }
        })
    }

    // =========================================================================
    // Lifecycle and introspection
    // =========================================================================

    /// Drop pending work, reset the clock to zero and unpause. Task ids are
    /// not reused, so stale ids never cancel new work.
    pub fn reset(&self) {
        let mut st = self.lock();
        let next_id = st.next_id;
        *st = SchedulerState::new();
        st.next_id = next_id;
        debug!(context = %self.context, "scheduler reset");
    }

    /// Reject all further posts and drop pending work
    pub fn quit(&self) {
        let mut st = self.lock();
        st.quit = true;
        st.queue.clear();
        st.index.clear();
        debug!(context = %self.context, "scheduler quit");
    }

    #[must_use]
    pub fn has_quit(&self) -> bool {
        self.lock().quit
    }

    /// Number of pending tasks
    #[must_use]
    pub fn size(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether any pending task is due at the current time
    #[must_use]
    pub fn are_any_runnable(&self) -> bool {
        let st = self.lock();
        st.next_trigger().is_some_and(|trigger| trigger <= st.now_ms)
    }

    /// Trigger time of the next pending task
    #[must_use]
    pub fn next_task_time(&self) -> Option<u64> {
        self.lock().next_trigger()
    }

    /// Pending tasks in execution order
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<(TaskId, u64)> {
        self.lock()
            .queue
            .iter()
            .map(|(&(trigger, _), task)| (task.id, trigger))
            .collect()
    }

    #[must_use]
    pub fn current_time_ms(&self) -> u64 {
        self.lock().now_ms
    }

    #[must_use]
    pub fn current_time(&self) -> Duration {
        Duration::from_millis(self.current_time_ms())
    }

    /// Whether a task body is running on this scheduler
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.lock().executing
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("Scheduler")
            .field("context", &self.context)
            .field("now_ms", &st.now_ms)
            .field("pending", &st.queue.len())
            .field("idle_state", &st.idle_state)
            .field("quit", &st.quit)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Log, name: &'static str) -> impl FnOnce() -> TaskResult + Send + 'static {
        let log = Arc::clone(log);
        move || {
            log.lock().unwrap().push(name);
            Ok(())
        }
    }

    fn entries(log: &Log) -> Vec<&'static str> {
        log.lock().unwrap().clone()
    }

    // =========================================================================
    // Posting and pausing
    // =========================================================================

    #[test]
    fn test_post_runs_immediately_when_unpaused() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler.post(record(&log, "a")).unwrap();
        assert_eq!(entries(&log), vec!["a"]);
        assert_eq!(scheduler.size(), 0);
    }

    #[test]
    fn test_paused_posts_wait_for_unpause() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler.pause();
        scheduler.post(record(&log, "A")).unwrap();
        scheduler.post(record(&log, "B")).unwrap();
        assert!(entries(&log).is_empty());
        assert_eq!(scheduler.unpause().unwrap(), 2);
        assert_eq!(entries(&log), vec!["A", "B"]);
    }

    #[test]
    fn test_delayed_task_waits_for_clock() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler
            .post_delayed(record(&log, "t"), Duration::from_millis(100))
            .unwrap();
        scheduler.advance_by(Duration::from_millis(50)).unwrap();
        assert!(entries(&log).is_empty());
        scheduler.advance_by(Duration::from_millis(50)).unwrap();
        assert_eq!(entries(&log), vec!["t"]);
        scheduler.advance_by(Duration::from_millis(50)).unwrap();
        assert_eq!(entries(&log), vec!["t"]);
        assert_eq!(scheduler.current_time_ms(), 150);
    }

    #[test]
    fn test_front_of_queue_jumps_ahead() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler.pause();
        scheduler.post(record(&log, "first")).unwrap();
        scheduler.post_at_front_of_queue(record(&log, "front")).unwrap();
        scheduler.post_at_front_of_queue(record(&log, "front2")).unwrap();
        scheduler.unpause().unwrap();
        assert_eq!(entries(&log), vec!["front2", "front", "first"]);
    }

    #[test]
    fn test_constant_idle_runs_future_tasks() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler.set_idle_state(IdleState::ConstantIdle).unwrap();
        scheduler
            .post_delayed(record(&log, "later"), Duration::from_millis(500))
            .unwrap();
        assert_eq!(entries(&log), vec!["later"]);
        assert_eq!(scheduler.current_time_ms(), 500);
    }

    #[test]
    fn test_entering_constant_idle_runs_queue() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler.pause();
        scheduler
            .post_delayed(record(&log, "b"), Duration::from_millis(20))
            .unwrap();
        scheduler.post(record(&log, "a")).unwrap();
        scheduler.set_idle_state(IdleState::ConstantIdle).unwrap();
        assert_eq!(entries(&log), vec!["a", "b"]);
        assert_eq!(scheduler.current_time_ms(), 20);
    }

    #[test]
    fn test_set_paused_reports_previous() {
        let scheduler = Scheduler::new("main");
        assert!(!scheduler.set_paused(true).unwrap());
        assert!(scheduler.set_paused(true).unwrap());
        assert!(scheduler.set_paused(false).unwrap());
        assert!(!scheduler.is_paused());
    }

    #[test]
    fn test_run_paused_defers_then_drains() {
        let scheduler = Scheduler::new("main");
        let log = log();
        let l = Arc::clone(&log);
        scheduler
            .run_paused(|| {
                scheduler.post(record(&l, "inside")).unwrap();
                assert!(l.lock().unwrap().is_empty());
            })
            .unwrap();
        assert_eq!(entries(&log), vec!["inside"]);
    }

    #[test]
    fn test_set_paused_false_keeps_constant_idle() {
        let scheduler = Scheduler::new("main");
        scheduler.set_idle_state(IdleState::ConstantIdle).unwrap();
        assert!(!scheduler.set_paused(false).unwrap());
        assert_eq!(scheduler.idle_state(), IdleState::ConstantIdle);
    }

    #[test]
    fn test_run_paused_restores_constant_idle() {
        let scheduler = Scheduler::new("main");
        scheduler.set_idle_state(IdleState::ConstantIdle).unwrap();
        let log = log();
        let l = Arc::clone(&log);
        scheduler
            .run_paused(|| {
                scheduler
                    .post_delayed(record(&l, "later"), Duration::from_millis(30))
                    .unwrap();
            })
            .unwrap();
        assert_eq!(scheduler.idle_state(), IdleState::ConstantIdle);
        assert_eq!(entries(&log), vec!["later"]);
        assert_eq!(scheduler.current_time_ms(), 30);
    }

    #[test]
    fn test_run_paused_restores_state_after_panic() {
        let scheduler = Scheduler::new("main");
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scheduler.run_paused(|| panic!("layout pass failed"))
        }));
        assert!(outcome.is_err());
        assert_eq!(scheduler.idle_state(), IdleState::Unpaused);
    }

    // =========================================================================
    // Draining
    // =========================================================================

    #[test]
    fn test_idle_cascades_due_but_not_future() {
        let scheduler = Arc::new(Scheduler::new("main"));
        let log = log();
        scheduler.pause();
        let inner = Arc::clone(&scheduler);
        let l = Arc::clone(&log);
        scheduler
            .post(move || {
                l.lock().unwrap().push("outer");
                inner.post(record(&l, "due"))?;
                inner.post_delayed(record(&l, "future"), Duration::from_millis(1))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(scheduler.idle().unwrap(), 2);
        assert_eq!(entries(&log), vec!["outer", "due"]);
        assert_eq!(scheduler.size(), 1);
        assert_eq!(scheduler.current_time_ms(), 0);
    }

    #[test]
    fn test_nested_post_runs_after_current_task() {
        let scheduler = Arc::new(Scheduler::new("main"));
        let log = log();
        let inner = Arc::clone(&scheduler);
        let l = Arc::clone(&log);
        scheduler
            .post(move || {
                l.lock().unwrap().push("outer-start");
                inner.post(record(&l, "nested"))?;
                l.lock().unwrap().push("outer-end");
                Ok(())
            })
            .unwrap();
        assert_eq!(entries(&log), vec!["outer-start", "outer-end", "nested"]);
    }

    #[test]
    fn test_run_one_task_moves_clock() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler.pause();
        scheduler
            .post_delayed(record(&log, "b"), Duration::from_millis(200))
            .unwrap();
        scheduler
            .post_delayed(record(&log, "a"), Duration::from_millis(100))
            .unwrap();
        assert!(scheduler.run_one_task().unwrap());
        assert_eq!(entries(&log), vec!["a"]);
        assert_eq!(scheduler.current_time_ms(), 100);
        assert_eq!(scheduler.run_to_end_of_tasks().unwrap(), 1);
        assert_eq!(scheduler.current_time_ms(), 200);
        assert!(!scheduler.run_one_task().unwrap());
    }

    #[test]
    fn test_tasks_observe_trigger_time() {
        let scheduler = Arc::new(Scheduler::new("main"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for delay in [30, 10, 20] {
            let s = Arc::clone(&scheduler);
            let seen = Arc::clone(&seen);
            scheduler
                .post_delayed(
                    move || {
                        seen.lock().unwrap().push(s.current_time_ms());
                        Ok(())
                    },
                    Duration::from_millis(delay),
                )
                .unwrap();
        }
        scheduler.advance_by(Duration::from_millis(100)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![10, 20, 30]);
        assert_eq!(scheduler.current_time_ms(), 100);
    }

    #[test]
    fn test_advance_to_never_rewinds() {
        let scheduler = Scheduler::new("main");
        scheduler.advance_to(100).unwrap();
        scheduler.advance_to(40).unwrap();
        assert_eq!(scheduler.current_time_ms(), 100);
    }

    #[test]
    fn test_advance_to_next_and_last() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler.pause();
        for (name, delay) in [("x", 10), ("y", 10), ("z", 40)] {
            scheduler
                .post_delayed(record(&log, name), Duration::from_millis(delay))
                .unwrap();
        }
        assert_eq!(scheduler.advance_to_next_posted_task().unwrap(), 2);
        assert_eq!(scheduler.current_time_ms(), 10);
        assert_eq!(scheduler.advance_to_last_posted_task().unwrap(), 1);
        assert_eq!(scheduler.current_time_ms(), 40);
        assert_eq!(entries(&log), vec!["x", "y", "z"]);
        assert_eq!(scheduler.advance_to_next_posted_task().unwrap(), 0);
    }

    // =========================================================================
    // Cancellation, failure and limits
    // =========================================================================

    #[test]
    fn test_cancel_pending_and_after_run() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler.pause();
        let a = scheduler.post(record(&log, "a")).unwrap();
        let b = scheduler.post(record(&log, "b")).unwrap();
        assert!(scheduler.cancel(a));
        scheduler.idle().unwrap();
        assert_eq!(entries(&log), vec!["b"]);
        assert!(!scheduler.cancel(b));
        assert!(!scheduler.cancel(a));
    }

    #[test]
    fn test_failed_task_preserves_remaining() {
        let scheduler = Scheduler::new("main");
        let log = log();
        scheduler.pause();
        scheduler.post(record(&log, "a")).unwrap();
        scheduler.post(|| Err("broken".into())).unwrap();
        scheduler.post(record(&log, "c")).unwrap();

        let err = scheduler.idle().unwrap_err();
        assert!(matches!(err, UmbraError::SchedulerTaskFailed { task: 2, .. }));
        assert_eq!(entries(&log), vec!["a"]);
        assert_eq!(scheduler.size(), 1);
        scheduler.idle().unwrap();
        assert_eq!(entries(&log), vec!["a", "c"]);
        assert!(!scheduler.is_executing());
    }

    #[test]
    fn test_runaway_guard() {
        fn respawn(scheduler: Arc<Scheduler>) -> TaskResult {
            let next = Arc::clone(&scheduler);
            scheduler.post(move || respawn(next))?;
            Ok(())
        }
        let scheduler = Arc::new(Scheduler::new("main").with_max_tasks_per_drain(50));
        scheduler.pause();
        let s = Arc::clone(&scheduler);
        scheduler.post(move || respawn(s)).unwrap();
        let err = scheduler.idle().unwrap_err();
        assert!(matches!(err, UmbraError::RunawayScheduler { limit: 50, .. }));
    }

    #[test]
    fn test_runaway_idle_keeps_unrun_task() {
        let scheduler = Scheduler::new("main").with_max_tasks_per_drain(2);
        scheduler.pause();
        let log = log();
        for name in ["a", "b", "c"] {
            scheduler.post(record(&log, name)).unwrap();
        }
        let err = scheduler.idle().unwrap_err();
        assert!(matches!(err, UmbraError::RunawayScheduler { limit: 2, .. }));
        assert_eq!(entries(&log), vec!["a", "b"]);
        assert_eq!(scheduler.size(), 1);

        assert_eq!(scheduler.idle().unwrap(), 1);
        assert_eq!(entries(&log), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_runaway_advance_keeps_unrun_task() {
        let scheduler = Scheduler::new("main").with_max_tasks_per_drain(2);
        scheduler.pause();
        let log = log();
        for (name, delay) in [("a", 10), ("b", 10), ("c", 15)] {
            scheduler
                .post_delayed(record(&log, name), Duration::from_millis(delay))
                .unwrap();
        }
        let err = scheduler.advance_by(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, UmbraError::RunawayScheduler { .. }));
        assert_eq!(scheduler.size(), 1);
        assert_eq!(scheduler.current_time_ms(), 10);
    }

    #[test]
    fn test_foreign_thread_posts_are_queued() {
        let scheduler = Arc::new(Scheduler::new("main"));
        let log = log();
        let remote = Arc::clone(&scheduler);
        let l = Arc::clone(&log);
        std::thread::spawn(move || {
            remote.post(record(&l, "remote")).unwrap();
        })
        .join()
        .unwrap();
        assert!(entries(&log).is_empty());
        assert!(scheduler.are_any_runnable());
        scheduler.idle().unwrap();
        assert_eq!(entries(&log), vec!["remote"]);
    }

    #[test]
    fn test_quit_rejects_posts() {
        let scheduler = Scheduler::new("main");
        scheduler.pause();
        scheduler.post(|| Ok(())).unwrap();
        scheduler.quit();
        assert!(scheduler.has_quit());
        assert_eq!(scheduler.size(), 0);
        assert!(matches!(
            scheduler.post(|| Ok(())),
            Err(UmbraError::SchedulerQuit { .. })
        ));
    }

    #[test]
    fn test_reset() {
        let scheduler = Scheduler::new("main");
        scheduler.pause();
        scheduler.post_delayed(|| Ok(()), Duration::from_secs(1)).unwrap();
        scheduler.advance_by(Duration::from_millis(10)).unwrap();
        scheduler.quit();
        scheduler.reset();
        assert_eq!(scheduler.size(), 0);
        assert_eq!(scheduler.current_time_ms(), 0);
        assert_eq!(scheduler.idle_state(), IdleState::Unpaused);
        assert!(!scheduler.has_quit());
        assert!(scheduler.next_task_time().is_none());
    }

    #[test]
    fn test_pending_tasks_in_order() {
        let scheduler = Scheduler::new("main");
        scheduler.pause();
        let late = scheduler.post_delayed(|| Ok(()), Duration::from_millis(5)).unwrap();
        let now = scheduler.post(|| Ok(())).unwrap();
        assert_eq!(scheduler.pending_tasks(), vec![(now, 0), (late, 5)]);
        assert_eq!(scheduler.next_task_time(), Some(0));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_equal_time_tasks_run_fifo(delays in proptest::collection::vec(0u64..5, 1..40)) {
                let scheduler = Scheduler::new("main");
                let order = Arc::new(Mutex::new(Vec::new()));
                scheduler.pause();
                for (i, delay) in delays.iter().enumerate() {
                    let order = Arc::clone(&order);
                    scheduler
                        .post_delayed(
                            move || {
                                order.lock().unwrap().push(i);
                                Ok(())
                            },
                            Duration::from_millis(*delay),
                        )
                        .unwrap();
                }
                scheduler.advance_by(Duration::from_millis(10)).unwrap();

                let mut expected: Vec<usize> = (0..delays.len()).collect();
                expected.sort_by_key(|&i| (delays[i], i));
                prop_assert_eq!(order.lock().unwrap().clone(), expected);
            }

            #[test]
            fn prop_clock_is_monotonic(steps in proptest::collection::vec(0u64..1000, 1..20)) {
                let scheduler = Scheduler::new("main");
                let mut last = 0;
                for step in steps {
                    if step % 2 == 0 {
                        scheduler.advance_by(Duration::from_millis(step)).unwrap();
                    } else {
                        scheduler.advance_to(step).unwrap();
                    }
                    let now = scheduler.current_time_ms();
                    prop_assert!(now >= last);
                    last = now;
                }
            }
        }
    }
}
