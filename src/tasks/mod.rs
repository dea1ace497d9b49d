//! Bounded concurrent task scheduler
//!
//! Fetch+decode work runs as opaque closures on blocking worker threads,
//! capped at a configurable concurrency. A polling loop sweeps the task
//! collection on a fixed interval: finished and canceled tasks are removed,
//! waiting tasks are promoted in submission order until the running count
//! reaches the cap. The task collection is the only structure touched from
//! both the poll loop and submitters and sits behind a mutex; per-task state
//! is an atomic.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};

/// Lifecycle of one scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Waiting = 0,
    Running = 1,
    Finished = 2,
    Canceled = 3,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Waiting,
            1 => TaskState::Running,
            2 => TaskState::Finished,
            _ => TaskState::Canceled,
        }
    }
}

/// Cooperative cancellation flag, checked by task bodies at safe points.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

type TaskBody = Box<dyn FnOnce(&CancelToken) + Send>;

struct TaskInner {
    state: AtomicU8,
    cancel: CancelToken,
    // Taken exactly once, when the task is promoted
    body: Mutex<Option<TaskBody>>,
}

/// Handle to one unit of scheduled work. Cloning shares the same task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub fn new(body: impl FnOnce(&CancelToken) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                state: AtomicU8::new(TaskState::Waiting as u8),
                cancel: CancelToken::new(),
                body: Mutex::new(Some(Box::new(body))),
            }),
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Waiting or Running: the task still occupies its tile's load slot.
    pub fn is_live(&self) -> bool {
        matches!(self.state(), TaskState::Waiting | TaskState::Running)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    /// Cancel cooperatively. A waiting task is dropped on the next poll; a
    /// running one keeps its Running state until its body observes the token
    /// and returns.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        let _ = self.inner.state.compare_exchange(
            TaskState::Waiting as u8,
            TaskState::Canceled as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn try_promote(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                TaskState::Waiting as u8,
                TaskState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Execute the body, guaranteeing the Finished transition even on panic.
    fn run(&self) {
        let body = self.inner.body.lock().unwrap().take();
        if let Some(body) = body {
            let cancel = self.inner.cancel.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                body(&cancel)
            }));
            if result.is_err() {
                log::warn!("task body panicked");
            }
        }
        self.inner
            .state
            .store(TaskState::Finished as u8, Ordering::Release);
    }

    fn same_task(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct PoolShared {
    tasks: Mutex<Vec<Task>>,
    max_concurrency: AtomicUsize,
    polling: AtomicBool,
}

/// Bounded worker pool polled on a fixed interval.
pub struct TaskPool {
    shared: Arc<PoolShared>,
    handle: Handle,
    poll_interval: Duration,
    // Present when the pool owns its runtime
    _runtime: Option<Runtime>,
}

impl TaskPool {
    /// Pool with its own multi-thread tokio runtime. The polling loop is not
    /// started yet; call [`start`](Self::start).
    pub fn new(max_concurrency: usize, poll_interval: Duration) -> Self {
        let runtime = Runtime::new().expect("failed to create tokio runtime");
        let handle = runtime.handle().clone();
        Self::build(handle, max_concurrency, poll_interval, Some(runtime))
    }

    /// Pool borrowing a caller-provided runtime handle. The polling loop is
    /// not started; call [`start`](Self::start).
    pub fn with_runtime(handle: Handle, max_concurrency: usize, poll_interval: Duration) -> Self {
        Self::build(handle, max_concurrency, poll_interval, None)
    }

    fn build(
        handle: Handle,
        max_concurrency: usize,
        poll_interval: Duration,
        runtime: Option<Runtime>,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                tasks: Mutex::new(Vec::new()),
                max_concurrency: AtomicUsize::new(max_concurrency),
                polling: AtomicBool::new(false),
            }),
            handle,
            poll_interval,
            _runtime: runtime,
        }
    }

    /// Start the polling loop. Idempotent.
    pub fn start(&self) {
        if self.shared.polling.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = self.shared.clone();
        let handle = self.handle.clone();
        let period = self.poll_interval;
        self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !shared.polling.load(Ordering::Acquire) {
                    break;
                }
                Self::sweep_and_promote(&shared, &handle);
            }
        });
    }

    /// Stop the polling loop after its current tick. Idempotent.
    pub fn stop(&self) {
        self.shared.polling.store(false, Ordering::Release);
    }

    /// Submit a task. A no-op when the task is already in the collection or
    /// is not in Waiting state. Returns whether the task was queued.
    pub fn submit(&self, task: Task) -> bool {
        let mut tasks = self.shared.tasks.lock().unwrap();
        if task.state() != TaskState::Waiting {
            return false;
        }
        if tasks.iter().any(|t| t.same_task(&task)) {
            return false;
        }
        tasks.push(task);
        true
    }

    /// Cancel every task in the collection.
    pub fn cancel_all(&self) {
        let tasks = self.shared.tasks.lock().unwrap();
        for task in tasks.iter() {
            task.cancel();
        }
    }

    /// Takes effect on the next poll.
    pub fn set_max_concurrency(&self, n: usize) {
        self.shared.max_concurrency.store(n, Ordering::Release);
    }

    pub fn task_count(&self) -> usize {
        self.shared.tasks.lock().unwrap().len()
    }

    /// One sweep-and-promote pass, as the polling loop performs it. Exposed
    /// for deterministic tests.
    pub fn poll_once(&self) {
        Self::sweep_and_promote(&self.shared, &self.handle);
    }

    fn sweep_and_promote(shared: &Arc<PoolShared>, handle: &Handle) {
        let max = shared.max_concurrency.load(Ordering::Acquire);
        let mut waiting = Vec::new();
        let mut running = 0usize;
        {
            let mut tasks = shared.tasks.lock().unwrap();
            tasks.retain(|task| {
                !matches!(task.state(), TaskState::Finished | TaskState::Canceled)
            });
            for task in tasks.iter() {
                match task.state() {
                    TaskState::Running => running += 1,
                    TaskState::Waiting => waiting.push(task.clone()),
                    _ => {}
                }
            }
        }

        for task in waiting {
            if running >= max {
                break;
            }
            if task.try_promote() {
                running += 1;
                let task = task.clone();
                handle.spawn_blocking(move || task.run());
            }
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.stop();
        self.cancel_all();
    }
}
