//! Work-distribution pool for directory tasks
//!
//! The walk driver consumes this pool through two callbacks: `create`,
//! invoked exactly once (on worker 0) to seed the job, and `process`,
//! invoked for every dequeued task. Both receive a [`TaskHandle`] that can
//! enqueue any number of new tasks; `process` additionally dequeues the one
//! task it was handed.
//!
//! Tasks are opaque path strings up to [`MAX_TASK_LEN`] bytes; callers are
//! responsible for dropping anything longer before enqueuing.
//!
//! Termination is tracked with a shared in-flight counter: every enqueue
//! increments it and a task's decrement happens only after its `process`
//! call (and therefore all of its enqueues) has completed, so observing
//! zero means no task exists anywhere and none can appear. The counter is
//! seeded with one extra token that worker 0 releases after `create`, which
//! keeps the other workers alive until seeding is done.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Maximum length of an enqueued task path, in bytes
pub const MAX_TASK_LEN: usize = 4096;

/// Idle backoff while waiting for tasks to appear
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Callbacks that drive a walk through the pool
pub trait WalkCallbacks {
    /// Seed the job; runs once, on worker 0
    fn create(&mut self, handle: &mut TaskHandle);

    /// Handle one dequeued task
    fn process(&mut self, handle: &mut TaskHandle);
}

/// Handle passed to the callbacks for queue access
pub struct TaskHandle<'a> {
    tx: &'a Sender<String>,
    in_flight: &'a AtomicUsize,
    current: Option<String>,
}

impl TaskHandle<'_> {
    /// Add a task to the shared queue
    pub fn enqueue(&mut self, path: &str) {
        debug_assert!(path.len() <= MAX_TASK_LEN);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(path.to_string())
            .expect("work pool disconnected");
    }

    /// Take the task this callback was invoked for
    ///
    /// Returns `None` from `create`, or on a second call.
    pub fn dequeue(&mut self) -> Option<String> {
        self.current.take()
    }
}

/// Shared work pool; build one group per walk
pub struct WorkPool;

impl WorkPool {
    /// Build a group of `size` connected workers over one shared queue
    pub fn group(size: usize) -> Vec<PoolWorker> {
        assert!(size > 0, "a pool needs at least one worker");
        let (tx, rx) = unbounded();
        // One token for the create callback, released by worker 0
        let in_flight = Arc::new(AtomicUsize::new(1));

        (0..size)
            .map(|id| PoolWorker {
                id,
                tx: tx.clone(),
                rx: rx.clone(),
                in_flight: Arc::clone(&in_flight),
            })
            .collect()
    }
}

/// One participant's endpoint in a work pool
pub struct PoolWorker {
    id: usize,
    tx: Sender<String>,
    rx: Receiver<String>,
    in_flight: Arc<AtomicUsize>,
}

impl PoolWorker {
    /// This worker's index within the pool
    pub fn id(&self) -> usize {
        self.id
    }

    /// Drive the callbacks until the pool drains
    ///
    /// Consumes the worker: a pool group serves exactly one walk.
    pub fn run<W: WalkCallbacks>(self, callbacks: &mut W) {
        if self.id == 0 {
            let mut handle = TaskHandle {
                tx: &self.tx,
                in_flight: &self.in_flight,
                current: None,
            };
            callbacks.create(&mut handle);
            // Release the seed token now that create's enqueues are in
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            match self.rx.try_recv() {
                Ok(task) => {
                    let mut handle = TaskHandle {
                        tx: &self.tx,
                        in_flight: &self.in_flight,
                        current: Some(task),
                    };
                    callbacks.process(&mut handle);
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                Err(_) => thread::sleep(IDLE_WAIT),
            }
        }
    }
}
