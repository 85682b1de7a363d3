//! One-shot deferred tasks.

use std::fmt;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::error;

pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Arms a task to run once after `delay`. Scheduling never blocks.
pub trait Timer: Send + Sync {
    fn schedule_once(&self, delay: Duration, task: TimerTask);
}

/// Runs each task on its own short-lived thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimer;

impl Timer for ThreadTimer {
    fn schedule_once(&self, delay: Duration, task: TimerTask) {
        let spawned = thread::Builder::new()
            .name("gattlink-timer".to_string())
            .spawn(move || {
                thread::sleep(delay);
                task();
            });
        if let Err(err) = spawned {
            error!(%err, "failed to spawn timer thread, task dropped");
        }
    }
}

/// Queues tasks until the owner fires them. Used by tests and by hosts that
/// drive their own event loop.
#[derive(Default)]
pub struct ManualTimer {
    pending: Mutex<Vec<(Duration, TimerTask)>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Delays of the queued tasks, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.pending.lock().iter().map(|(d, _)| *d).collect()
    }

    /// Runs every queued task and returns how many ran. Tasks scheduled while
    /// firing stay queued for the next call.
    pub fn fire_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.pending.lock());
        let fired = tasks.len();
        for (_, task) in tasks {
            task();
        }
        fired
    }
}

impl Timer for ManualTimer {
    fn schedule_once(&self, delay: Duration, task: TimerTask) {
        self.pending.lock().push((delay, task));
    }
}

impl fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTimer")
            .field("pending", &self.pending())
            .finish()
    }
}
