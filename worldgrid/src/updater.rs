//! Cross-map update driver, a fixed pool of worker threads updating map instances
//! concurrently. The owner of global time schedules one job per map and waits for all
//! of them before advancing to the next tick.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use tracing::{debug, error, warn};


/// Time a worker waits for a job before checking its channel again.
const WORKER_WAKE_TIMEOUT: Duration = Duration::from_millis(100);


/// Something updated by the cross-map driver, typically a map instance.
pub trait Updatable: Send {

    fn update(&mut self, diff_ms: u32);

}

/// A job scheduled to a worker.
struct Job {
    target: Arc<Mutex<dyn Updatable>>,
    diff_ms: u32,
}

impl Job {

    fn run(self) {
        let mut target = self.target.lock().unwrap_or_else(|e| e.into_inner());
        // A panicking map must not stall the barrier, the job is counted as done.
        let result = panic::catch_unwind(AssertUnwindSafe(|| target.update(self.diff_ms)));
        if result.is_err() {
            error!("map update panicked, the map will be updated again on next tick");
        }
    }

}

/// Count of scheduled jobs not yet completed, with its condition variable.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    done: Condvar,
}

impl Pending {

    fn increment(&self) {
        *self.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(*count > 0, "pending job count underflow");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.done.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = self.done.wait(count).unwrap_or_else(|e| e.into_inner());
        }
    }

}


/// The cross-map update driver.
pub struct MapUpdater {
    /// Job sender to workers, none while inactive.
    sender: Option<Sender<Job>>,
    /// Handles of the worker threads.
    workers: Vec<JoinHandle<()>>,
    /// Count of jobs not yet done.
    pending: Arc<Pending>,
}

impl Default for MapUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl MapUpdater {

    /// Create an inactive updater, jobs are run inline until activated.
    pub fn new() -> Self {
        Self {
            sender: None,
            workers: Vec::new(),
            pending: Arc::new(Pending::default()),
        }
    }

    /// Start the given number of worker threads.
    pub fn activate(&mut self, threads: usize) {

        if self.sender.is_some() {
            warn!("map updater is already active");
            return;
        }

        let (sender, receiver) = unbounded();

        for i in 0..threads {

            let receiver = receiver.clone();
            let pending = Arc::clone(&self.pending);

            let spawned = thread::Builder::new()
                .name(format!("Map Update Worker #{i}"))
                .spawn(move || {
                    Worker { receiver, pending }.run()
                });

            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => error!("failed to spawn map update worker: {e}"),
            }

        }

        if self.workers.is_empty() {
            warn!("no map update worker, maps will be updated inline");
            return;
        }

        debug!("map updater activated with {} workers", self.workers.len());
        self.sender = Some(sender);

    }

    /// Wait for all pending jobs, stop and join all workers.
    pub fn deactivate(&mut self) {

        self.wait();

        // Workers exit when the channel is disconnected.
        self.sender = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("map update worker panicked");
            }
        }

    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    /// Schedule an update of the target, the update runs immediately on the calling
    /// thread if the updater is not active.
    pub fn schedule_update(&self, target: Arc<Mutex<dyn Updatable>>, diff_ms: u32) {

        let job = Job { target, diff_ms };

        let Some(sender) = &self.sender else {
            job.run();
            return;
        };

        self.pending.increment();
        if let Err(e) = sender.send(job) {
            // Only possible if all workers died, run it here.
            self.pending.decrement();
            e.into_inner().run();
        }

    }

    /// Block until all scheduled jobs are done.
    pub fn wait(&self) {
        self.pending.wait();
    }

}

impl Drop for MapUpdater {
    fn drop(&mut self) {
        self.deactivate();
    }
}


struct Worker {
    receiver: Receiver<Job>,
    pending: Arc<Pending>,
}

impl Worker {

    /// Run the worker until the job channel is disconnected.
    fn run(self) {
        loop {
            match self.receiver.recv_timeout(WORKER_WAKE_TIMEOUT) {
                Ok(job) => {
                    job.run();
                    self.pending.decrement();
                    // Drain the batch while jobs are available.
                    while let Ok(job) = self.receiver.try_recv() {
                        job.run();
                        self.pending.decrement();
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

}
