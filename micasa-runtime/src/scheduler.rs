//! A thread-pool scheduler for delayed and repeating work.
//!
//! Dispatch is deliberately blocking `std::thread` + condition-variable, not
//! an async `Stream`: timers and links need wall-clock delays measured in
//! seconds to minutes, want to block a worker thread for the cron tick
//! without pulling the whole controller onto a reactor, and the queue only
//! ever holds a few hundred entries. Every worker thread contends on one
//! shared priority queue, matching the single dispatch point of a classic
//! thread-pool scheduler (grounded in `original_source/src/Scheduler.h`'s
//! `ThreadPool`: one time-indexed collection, one condition variable, `erase`
//! scoped to the owning `Scheduler*` handle).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How many times a task fires, total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// Runs once and is dropped.
    Once,
    /// Runs `n` times total, then is dropped.
    Times(u32),
    /// Reschedules forever (`SCHEDULER_REPEAT_INFINITE`).
    Infinite,
}

impl Repeat {
    fn after_run(self) -> Option<Repeat> {
        match self {
            Repeat::Once => None,
            Repeat::Times(1) => None,
            Repeat::Times(n) => Some(Repeat::Times(n - 1)),
            Repeat::Infinite => Some(Repeat::Infinite),
        }
    }
}

/// The logical owner of a scheduled task — what `erase`/`is_scheduled`
/// scope their predicate against. Mirrors the original's `Scheduler*`
/// owner-handle, narrowed to the shapes this workspace needs: the
/// controller's own housekeeping ticks, and per-device driven updates
/// (links, task-options, rate-limit trailing tasks, the Switch
/// auto-revert).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Controller,
    Device(i64),
    Plugin(i64),
}

struct ResultSlot<T> {
    value: Mutex<Option<T>>,
    condvar: Condvar,
}

impl<T> ResultSlot<T> {
    fn new() -> Self {
        ResultSlot {
            value: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    fn publish(&self, value: T) {
        *self.value.lock() = Some(value);
        self.condvar.notify_all();
    }

    /// Blocks until the next execution publishes a value, consuming it.
    fn wait(&self) -> T {
        let mut guard = self.value.lock();
        loop {
            if let Some(value) = guard.take() {
                return value;
            }
            self.condvar.wait(&mut guard);
        }
    }

    fn wait_for(&self, timeout: Duration) -> Option<T> {
        let mut guard = self.value.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = guard.take() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.condvar.wait_for(&mut guard, deadline - now);
        }
    }
}

/// A handle identifying a scheduled task, returned by [`Scheduler::schedule`]
/// and accepted by [`Scheduler::cancel`], [`Scheduler::proceed`] and
/// [`Scheduler::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// The caller-facing handle to a scheduled task. Exposes `wait`/`wait_for`
/// on the result of its most recent execution (spec §4.2: the handle blocks
/// on a shared future populated on each execution, replaced before the next
/// run starts).
pub struct TaskHandle<T> {
    id: TaskId,
    result: Arc<ResultSlot<T>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Blocks until this task's next execution publishes a result.
    pub fn wait(&self) -> T {
        self.result.wait()
    }

    /// Blocks up to `timeout` for the next published result.
    pub fn wait_for(&self, timeout: Duration) -> Option<T> {
        self.result.wait_for(timeout)
    }
}

struct Entry {
    id: u64,
    owner: Owner,
    fire_at: Instant,
    interval: Option<Duration>,
    repeat: Repeat,
    task: Box<dyn FnMut() + Send + 'static>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
        other.fire_at.cmp(&self.fire_at)
    }
}

struct Shared {
    queue: Mutex<BinaryHeap<Entry>>,
    /// Tasks currently executing, by id, alongside their owner — consulted
    /// by `erase`/`is_scheduled` so an in-flight task is still visible even
    /// though it isn't in `queue`.
    active: Mutex<HashMap<u64, Owner>>,
    /// Ids erased while active; the dispatch loop checks this after running
    /// a task and drops it instead of reinserting it, no matter how many
    /// repeats remained (spec §4.2: "set their remaining repeats to 0").
    cancelled: Mutex<HashSet<u64>>,
    active_changed: Condvar,
    condvar: Condvar,
    shutdown: AtomicBool,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl Scheduler {
    /// `size = max(2, 2x hardware concurrency)` per spec §4.2.
    pub fn new_default() -> Self {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new((2 * cpus).max(2))
    }

    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            active: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
            active_changed: Condvar::new(),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let workers = (0..worker_count.max(1))
            .map(|n| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("micasa-scheduler-{n}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn scheduler worker thread")
            })
            .collect();
        Scheduler {
            shared,
            workers,
            next_id: AtomicU64::new(1),
        }
    }

    /// Schedules `task` to run after `delay`, repeating per `repeat` with
    /// `interval` between executions (ignored for [`Repeat::Once`]), tagged
    /// with `owner` for later `erase`/`is_scheduled` lookups.
    pub fn schedule<F, T>(&self, delay: Duration, interval: Option<Duration>, repeat: Repeat, owner: Owner, mut f: F) -> TaskHandle<T>
    where
        F: FnMut() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let result = Arc::new(ResultSlot::new());
        let publish = result.clone();
        let entry = Entry {
            id,
            owner,
            fire_at: Instant::now() + delay,
            interval,
            repeat,
            task: Box::new(move || {
                let value = f();
                publish.publish(value);
            }),
        };
        {
            let mut queue = self.shared.queue.lock();
            queue.push(entry);
        }
        self.shared.condvar.notify_all();
        TaskHandle {
            id: TaskId(id),
            result,
        }
    }

    /// Convenience for fire-and-forget tasks whose return value no caller
    /// needs to `wait()` on.
    pub fn schedule_fn<F>(&self, delay: Duration, interval: Option<Duration>, repeat: Repeat, owner: Owner, f: F) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        let mut f = f;
        self.schedule::<_, ()>(delay, interval, repeat, owner, move || f()).id()
    }

    /// Removes a single task by id, whether pending or active.
    pub fn cancel(&self, id: TaskId) {
        self.erase_inner(|candidate_id, _owner| candidate_id == id.0);
    }

    /// Removes every pending task whose owner matches `predicate`, and for
    /// any matching task currently executing, zeroes its remaining repeats
    /// and blocks until that execution finishes (spec §4.2: "erase is a
    /// barrier").
    pub fn erase<P>(&self, predicate: P)
    where
        P: Fn(Owner) -> bool,
    {
        self.erase_inner(|_id, owner| predicate(owner));
    }

    fn erase_inner<M>(&self, matches: M)
    where
        M: Fn(u64, Owner) -> bool,
    {
        {
            let mut queue = self.shared.queue.lock();
            let remaining: Vec<Entry> = queue.drain().filter(|e| !matches(e.id, e.owner)).collect();
            *queue = BinaryHeap::from(remaining);
        }

        loop {
            let still_active: Vec<u64> = {
                let active = self.shared.active.lock();
                active
                    .iter()
                    .filter(|(id, owner)| matches(**id, **owner))
                    .map(|(id, _)| *id)
                    .collect()
            };
            if still_active.is_empty() {
                break;
            }
            {
                let mut cancelled = self.shared.cancelled.lock();
                for id in &still_active {
                    cancelled.insert(*id);
                }
            }
            let mut active = self.shared.active.lock();
            self.shared.active_changed.wait_for(&mut active, Duration::from_millis(50));
        }
    }

    /// Removes the task from the time index and reinserts it at `now +
    /// new_wait`, notifying workers (spec §4.2 "Reshape").
    pub fn proceed<T>(&self, handle: &TaskHandle<T>, new_wait: Duration) {
        self.reschedule(handle.id.0, |_| Instant::now() + new_wait);
    }

    /// Pulls a pending task's next execution `by` earlier (never before
    /// `now`).
    pub fn advance<T>(&self, handle: &TaskHandle<T>, by: Duration) {
        let now = Instant::now();
        self.reschedule(handle.id.0, move |fire_at| fire_at.checked_sub(by).unwrap_or(now).max(now));
    }

    fn reschedule(&self, target: u64, reshape: impl Fn(Instant) -> Instant) {
        let mut queue = self.shared.queue.lock();
        let items: Vec<Entry> = queue.drain().collect();
        let mut replaced = Vec::with_capacity(items.len());
        for mut entry in items {
            if entry.id == target {
                entry.fire_at = reshape(entry.fire_at);
            }
            replaced.push(entry);
        }
        *queue = BinaryHeap::from(replaced);
        drop(queue);
        self.shared.condvar.notify_all();
    }

    /// Whether any pending or in-flight task's owner matches `predicate`
    /// (spec §4.6 `isScheduled`).
    pub fn is_scheduled<P>(&self, predicate: P) -> bool
    where
        P: Fn(Owner) -> bool,
    {
        if self.shared.queue.lock().iter().any(|e| predicate(e.owner)) {
            return true;
        }
        self.shared.active.lock().values().any(|owner| predicate(*owner))
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Signals every worker thread to stop after its current task and waits
    /// for them to exit.
    pub fn shutdown(mut self) {
        self.shared.shutdown.store(true, AtomicOrdering::SeqCst);
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut queue = shared.queue.lock();
        let mut due = None;
        loop {
            if shared.shutdown.load(AtomicOrdering::SeqCst) {
                return;
            }
            match queue.peek() {
                None => {
                    shared.condvar.wait_for(&mut queue, Duration::from_millis(200));
                }
                Some(entry) => {
                    let now = Instant::now();
                    if entry.fire_at <= now {
                        due = queue.pop();
                        break;
                    }
                    shared.condvar.wait_for(&mut queue, entry.fire_at - now);
                }
            }
        }
        drop(queue);

        let Some(mut entry) = due else { continue };
        shared.active.lock().insert(entry.id, entry.owner);

        (entry.task)();

        shared.active.lock().remove(&entry.id);
        let was_cancelled = shared.cancelled.lock().remove(&entry.id);
        shared.active_changed.notify_all();

        if !was_cancelled {
            if let Some(next_repeat) = entry.repeat.after_run() {
                if let Some(interval) = entry.interval {
                    // Catch-up skip: step forward past `now` rather than
                    // enqueueing a backlog of missed executions.
                    let now = Instant::now();
                    let mut next = entry.fire_at + interval;
                    while next <= now {
                        next += interval;
                    }
                    entry.fire_at = next;
                    entry.repeat = next_repeat;
                    shared.queue.lock().push(entry);
                    shared.condvar.notify_all();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn fires_after_delay_not_before() {
        let scheduler = Scheduler::new(2);
        let (tx, rx) = mpsc::channel();
        scheduler.schedule_fn(Duration::from_millis(20), None, Repeat::Once, Owner::Controller, move || {
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(5)).is_err());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_ok());
        scheduler.shutdown();
    }

    #[test]
    fn finite_repeat_runs_exactly_n_times() {
        let scheduler = Scheduler::new(2);
        let (tx, rx) = mpsc::channel();
        scheduler.schedule_fn(
            Duration::from_millis(5),
            Some(Duration::from_millis(5)),
            Repeat::Times(3),
            Owner::Device(1),
            move || {
                let _ = tx.send(());
            },
        );
        for _ in 0..3 {
            assert!(rx.recv_timeout(Duration::from_millis(300)).is_ok());
        }
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        scheduler.shutdown();
    }

    #[test]
    fn infinite_repeat_keeps_firing_until_erased() {
        let scheduler = Scheduler::new(2);
        let (tx, rx) = mpsc::channel();
        scheduler.schedule_fn(
            Duration::from_millis(5),
            Some(Duration::from_millis(5)),
            Repeat::Infinite,
            Owner::Device(7),
            move || {
                let _ = tx.send(());
            },
        );
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_ok());
        scheduler.erase(|owner| owner == Owner::Device(7));
        scheduler.shutdown();
    }

    #[test]
    fn erase_before_fire_prevents_execution() {
        let scheduler = Scheduler::new(1);
        let (tx, rx) = mpsc::channel::<()>();
        scheduler.schedule_fn(Duration::from_millis(50), None, Repeat::Once, Owner::Device(2), move || {
            let _ = tx.send(());
        });
        scheduler.erase(|owner| owner == Owner::Device(2));
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        scheduler.shutdown();
    }

    #[test]
    fn erase_is_scoped_to_owner() {
        let scheduler = Scheduler::new(2);
        let (tx_a, rx_a) = mpsc::channel::<()>();
        let (tx_b, rx_b) = mpsc::channel::<()>();
        scheduler.schedule_fn(Duration::from_millis(30), None, Repeat::Once, Owner::Device(1), move || {
            let _ = tx_a.send(());
        });
        scheduler.schedule_fn(Duration::from_millis(30), None, Repeat::Once, Owner::Device(2), move || {
            let _ = tx_b.send(());
        });
        scheduler.erase(|owner| owner == Owner::Device(1));
        assert!(rx_a.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(rx_b.recv_timeout(Duration::from_millis(100)).is_ok());
        scheduler.shutdown();
    }

    #[test]
    fn handle_wait_blocks_until_result_published() {
        let scheduler = Scheduler::new(2);
        let handle = scheduler.schedule::<_, i32>(Duration::from_millis(10), None, Repeat::Once, Owner::Controller, || 42);
        assert_eq!(handle.wait(), 42);
        scheduler.shutdown();
    }

    #[test]
    fn wait_for_times_out_when_task_has_not_run_yet() {
        let scheduler = Scheduler::new(2);
        let handle = scheduler.schedule::<_, i32>(Duration::from_secs(5), None, Repeat::Once, Owner::Controller, || 1);
        assert_eq!(handle.wait_for(Duration::from_millis(20)), None);
        scheduler.cancel(handle.id());
        scheduler.shutdown();
    }

    #[test]
    fn is_scheduled_reports_pending_tasks_by_owner() {
        let scheduler = Scheduler::new(1);
        scheduler.schedule_fn(Duration::from_millis(200), None, Repeat::Once, Owner::Device(9), || {});
        assert!(scheduler.is_scheduled(|owner| owner == Owner::Device(9)));
        assert!(!scheduler.is_scheduled(|owner| owner == Owner::Device(99)));
        scheduler.erase(|owner| owner == Owner::Device(9));
        scheduler.shutdown();
    }

    #[test]
    fn proceed_reschedules_a_pending_task_sooner() {
        let scheduler = Scheduler::new(2);
        let (tx, rx) = mpsc::channel::<()>();
        let handle = scheduler.schedule::<_, ()>(Duration::from_secs(10), None, Repeat::Once, Owner::Controller, move || {
            let _ = tx.send(());
        });
        scheduler.proceed(&handle, Duration::from_millis(10));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_ok());
        scheduler.shutdown();
    }
}
