//! Executor doubles.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use ferroq_delivery::spi::Executor;

type Task = Box<dyn FnOnce() + Send>;

/// An executor driven by hand from the test thread.
///
/// Tasks queue until the test calls [`run_one`](Self::run_one) or
/// [`run_pending`](Self::run_pending), which is what makes interleavings
/// like "forced delivery scheduled, then transfer begins" scriptable.
#[derive(Default)]
pub struct ManualExecutor {
    tasks: Mutex<VecDeque<Task>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn queued(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Runs the oldest queued task, if any.
    pub fn run_one(&self) -> bool {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs every task queued at the time of the call and returns how many
    /// ran. Tasks that re-enqueue themselves (forced delivery during a
    /// transfer) wait for the next round, so this never loops forever.
    pub fn run_pending(&self) -> usize {
        let pending = self.queued();
        let mut ran = 0;
        for _ in 0..pending {
            if !self.run_one() {
                break;
            }
            ran += 1;
        }
        ran
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, task: Task) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }
}

/// A real single-threaded executor for concurrency tests.
pub struct ThreadExecutor {
    sender: Option<crossbeam_channel::Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let worker = std::thread::spawn(move || {
            while let Ok(task) = receiver.recv() {
                task();
            }
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(task);
        }
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
