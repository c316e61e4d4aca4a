//! Wall-clock task scheduling.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::{Parker, Unparker};
use slab::Slab;
use tracing::{error, warn};

/// Type-erased one-shot task.
type Task = Box<dyn FnOnce() + Send + 'static>;

/// A host scheduler executing tasks at wall-clock deadlines.
///
/// All tasks run sequentially on a single timer thread which sleeps until the
/// earliest deadline; no busy-waiting is ever performed. Tasks can be
/// cancelled with the [`TaskKey`] returned at scheduling time.
///
/// Requested delays shorter than the minimum resolution of the scheduler, as
/// well as tasks that fire later than the resolution allows, are reported
/// with a warning but are never treated as errors.
///
/// A `HostScheduler` is a cheap handle and can be cloned. The timer thread is
/// shut down when the last handle is dropped or when
/// [`shutdown()`](HostScheduler::shutdown) is called.
#[derive(Clone)]
pub struct HostScheduler {
    handle: Arc<Handle>,
}

impl HostScheduler {
    /// Default minimum resolution of the scheduler.
    pub const DEFAULT_MIN_RESOLUTION: Duration = Duration::from_millis(10);

    /// Creates a scheduler with the default minimum resolution.
    pub fn new() -> Self {
        Self::with_min_resolution(Self::DEFAULT_MIN_RESOLUTION)
    }

    /// Creates a scheduler with the specified minimum resolution.
    pub fn with_min_resolution(min_resolution: Duration) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(TaskQueue::default()),
            min_resolution,
        });
        let parker = Parker::new();
        let unparker = parker.unparker().clone();

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("devsim-timer".into())
                .spawn(move || run_timer(shared, parker))
                .expect("failed to spawn the timer thread")
        };
        let worker_id = worker.thread().id();

        Self {
            handle: Arc::new(Handle {
                shared,
                unparker,
                worker: Mutex::new(Some(worker)),
                worker_id,
            }),
        }
    }

    /// Returns the minimum resolution of the scheduler.
    pub fn min_resolution(&self) -> Duration {
        self.handle.shared.min_resolution
    }

    /// Schedules a task after the specified wall-clock delay.
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> TaskKey
    where
        F: FnOnce() + Send + 'static,
    {
        if !delay.is_zero() && delay < self.min_resolution() {
            warn!(
                ?delay,
                resolution = ?self.min_resolution(),
                "requested delay is below the scheduler resolution"
            );
        }

        self.schedule_at(Instant::now() + delay, task)
    }

    /// Schedules a task at the specified wall-clock deadline.
    ///
    /// Deadlines in the past are executed as soon as possible.
    pub fn schedule_at<F>(&self, deadline: Instant, task: F) -> TaskKey
    where
        F: FnOnce() + Send + 'static,
    {
        let key = {
            let mut queue = self.handle.shared.queue.lock().unwrap();
            if queue.is_shut_down {
                return TaskKey::inert();
            }
            queue.insert(deadline, Box::new(task))
        };
        self.handle.unparker.unpark();

        TaskKey {
            key,
            shared: Arc::downgrade(&self.handle.shared),
        }
    }

    /// Schedules a task that repeats with the specified period until it
    /// returns `false` or until it is cancelled.
    ///
    /// The first execution takes place after one period.
    pub fn schedule_periodic<F>(&self, period: Duration, task: F) -> PeriodicTaskKey
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let key = PeriodicTaskKey {
            inner: Arc::new(PeriodicInner {
                is_cancelled: AtomicBool::new(false),
                current: Mutex::new(None),
            }),
        };
        schedule_next_period(Arc::downgrade(&self.handle), period, task, key.inner.clone());

        key
    }

    /// Returns the number of tasks that are still pending.
    pub fn pending_tasks(&self) -> usize {
        self.handle.shared.queue.lock().unwrap().tasks.len()
    }

    /// Cancels all pending tasks.
    pub fn cancel_all(&self) {
        let tasks = self.handle.shared.queue.lock().unwrap().drain();

        // Tasks may hold scheduler handles, so they must be dropped with the
        // queue unlocked.
        drop(tasks);
    }

    /// Cancels all pending tasks and stops the timer thread.
    ///
    /// Tasks scheduled after shutdown are silently discarded.
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }
}

impl Default for HostScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostScheduler")
            .field("min_resolution", &self.min_resolution())
            .field("pending_tasks", &self.pending_tasks())
            .finish_non_exhaustive()
    }
}

/// A handle to a scheduled task which can be used to cancel it.
///
/// Dropping the key does not cancel the task.
#[derive(Clone, Debug)]
pub struct TaskKey {
    key: QueueKey,
    shared: Weak<Shared>,
}

impl TaskKey {
    /// Returns a key that does not refer to any task.
    fn inert() -> Self {
        Self {
            key: QueueKey { slot: 0, seq: 0 },
            shared: Weak::new(),
        }
    }

    /// Cancels the task.
    ///
    /// Returns `true` if the task was still pending.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let task = shared.queue.lock().unwrap().remove(self.key);

        task.is_some()
    }

    /// Returns `true` if the task has neither run nor been cancelled.
    pub fn is_pending(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| shared.queue.lock().unwrap().contains(self.key))
            .unwrap_or(false)
    }
}

/// A handle to a periodic task which can be used to cancel it.
#[derive(Clone)]
pub struct PeriodicTaskKey {
    inner: Arc<PeriodicInner>,
}

impl PeriodicTaskKey {
    /// Cancels all future executions of the task.
    pub fn cancel(&self) {
        self.inner.is_cancelled.store(true, Ordering::Release);
        if let Some(key) = self.inner.current.lock().unwrap().take() {
            key.cancel();
        }
    }

    /// Returns `true` if the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for PeriodicTaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicTaskKey")
            .field("is_cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

struct PeriodicInner {
    is_cancelled: AtomicBool,
    current: Mutex<Option<TaskKey>>,
}

// The task only holds a weak reference to the scheduler so that a pending
// periodic task does not keep the timer thread alive.
fn schedule_next_period<F>(
    handle: Weak<Handle>,
    period: Duration,
    mut task: F,
    periodic: Arc<PeriodicInner>,
) where
    F: FnMut() -> bool + Send + 'static,
{
    let Some(strong_handle) = handle.upgrade() else {
        return;
    };
    let scheduler = HostScheduler {
        handle: strong_handle,
    };

    let next_periodic = periodic.clone();
    let key = scheduler.schedule_after(period, move || {
        if next_periodic.is_cancelled.load(Ordering::Acquire) {
            return;
        }
        if task() {
            schedule_next_period(handle, period, task, next_periodic);
        }
    });
    *periodic.current.lock().unwrap() = Some(key);
}

struct Handle {
    shared: Arc<Shared>,
    unparker: Unparker,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl Handle {
    fn shutdown(&self) {
        let tasks = {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.is_shut_down = true;
            queue.drain()
        };
        drop(tasks);
        self.unparker.unpark();

        // The last handle may be dropped by a task running on the timer
        // thread, in which case the thread cannot be joined.
        if thread::current().id() != self.worker_id {
            if let Some(worker) = self.worker.lock().unwrap().take() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Shared {
    queue: Mutex<TaskQueue>,
    min_resolution: Duration,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct QueueKey {
    slot: usize,
    seq: u64,
}

struct Entry {
    seq: u64,
    deadline: Instant,
    task: Task,
}

/// Tasks ordered by deadline, then by scheduling order.
///
/// Task bodies live in a slab so that cancellation is *O*(1); heap items
/// referring to a vacated or reused slot are skipped when they surface.
#[derive(Default)]
struct TaskQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, usize)>>,
    tasks: Slab<Entry>,
    next_seq: u64,
    is_shut_down: bool,
}

impl TaskQueue {
    fn insert(&mut self, deadline: Instant, task: Task) -> QueueKey {
        let seq = self.next_seq;
        self.next_seq += 1;
        let slot = self.tasks.insert(Entry {
            seq,
            deadline,
            task,
        });
        self.heap.push(Reverse((deadline, seq, slot)));

        QueueKey { slot, seq }
    }

    fn contains(&self, key: QueueKey) -> bool {
        self.tasks
            .get(key.slot)
            .map(|entry| entry.seq == key.seq)
            .unwrap_or(false)
    }

    fn remove(&mut self, key: QueueKey) -> Option<Task> {
        if !self.contains(key) {
            return None;
        }

        Some(self.tasks.remove(key.slot).task)
    }

    /// Returns the earliest live deadline, discarding stale heap items.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(&Reverse((deadline, seq, slot))) = self.heap.peek() {
            if self.contains(QueueKey { slot, seq }) {
                return Some(deadline);
            }
            self.heap.pop();
        }

        None
    }

    fn pull_due(&mut self, now: Instant) -> Option<Entry> {
        let deadline = self.next_deadline()?;
        if deadline > now {
            return None;
        }
        let Reverse((_, _, slot)) = self.heap.pop()?;

        Some(self.tasks.remove(slot))
    }

    fn drain(&mut self) -> Vec<Task> {
        self.heap.clear();

        self.tasks.drain().map(|entry| entry.task).collect()
    }
}

fn run_timer(shared: Arc<Shared>, parker: Parker) {
    loop {
        let mut queue = shared.queue.lock().unwrap();
        if queue.is_shut_down {
            return;
        }
        let now = Instant::now();
        match queue.pull_due(now) {
            Some(entry) => {
                drop(queue);

                let lateness = now.saturating_duration_since(entry.deadline);
                if lateness > shared.min_resolution {
                    warn!(?lateness, "scheduled task fired late");
                }
                if panic::catch_unwind(AssertUnwindSafe(entry.task)).is_err() {
                    error!("a scheduled task panicked");
                }
            }
            None => {
                let deadline = queue.next_deadline();
                drop(queue);

                match deadline {
                    Some(deadline) => parker.park_deadline(deadline),
                    None => parker.park(),
                }
            }
        }
    }
}
