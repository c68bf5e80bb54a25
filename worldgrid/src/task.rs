//! Bounded fan-out of independent tasks inside of a map tick, with a join barrier.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use tracing::warn;


/// A bounded task manager owning a pool of long-lived worker threads, it runs a batch
/// of tasks on at most `workers` threads and returns only when all of them are done.
/// Cloning the manager shares the same pool.
#[derive(Debug, Clone)]
pub struct TaskManager {
    workers: usize,
    /// Worker threads, none if the tasks are run on the calling thread.
    pool: Option<Arc<ThreadPool>>,
}

impl TaskManager {

    pub fn new(workers: usize) -> Self {

        let workers = workers.max(1);
        if workers == 1 {
            return Self { workers, pool: None };
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("Map Task #{i}"))
            .build();

        match pool {
            Ok(pool) => Self { workers, pool: Some(Arc::new(pool)) },
            Err(e) => {
                warn!("failed to start {workers} map task threads, running tasks inline: {e}");
                Self { workers: 1, pool: None }
            }
        }

    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run the function on every item, at most `workers` items are processed at the
    /// same time. Results are returned in the order of the items.
    pub fn run<T, R, F>(&self, items: Vec<T>, func: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        match &self.pool {
            Some(pool) if items.len() > 1 => pool.install(|| items.into_par_iter().map(func).collect()),
            _ => items.into_iter().map(func).collect(),
        }
    }

}


#[cfg(test)]
mod tests {

    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn results_in_order() {
        let manager = TaskManager::new(4);
        let results = manager.run((0..100u32).collect(), |i| {
            if i % 7 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            i * 2
        });
        assert_eq!(results, (0..100u32).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn bounded_workers() {

        let names = Mutex::new(HashSet::new());
        let manager = TaskManager::new(3);
        manager.run((0..32).collect::<Vec<u32>>(), |_| {
            thread::sleep(Duration::from_millis(1));
            let name = thread::current().name().map(str::to_string);
            names.lock().unwrap().insert(name);
        });

        let names = names.into_inner().unwrap();
        assert!(!names.is_empty());
        assert!(names.len() <= 3);

    }

    #[test]
    fn workers_outlive_batches() {

        let manager = TaskManager::new(2);
        let first = Mutex::new(HashSet::new());
        let second = Mutex::new(HashSet::new());

        for names in [&first, &second] {
            manager.clone().run((0..16).collect::<Vec<u32>>(), |_| {
                thread::sleep(Duration::from_millis(1));
                names.lock().unwrap().insert(thread::current().id());
            });
        }

        // Both batches only ran on the same two pool threads.
        let mut all = first.into_inner().unwrap();
        all.extend(second.into_inner().unwrap());
        assert!(all.len() <= 2);
        assert!(!all.contains(&thread::current().id()));

    }

    #[test]
    fn mutable_items() {
        let mut values = vec![1, 2, 3, 4, 5];
        let manager = TaskManager::new(2);
        manager.run(values.iter_mut().collect(), |value: &mut i32| *value *= 10);
        assert_eq!(values, [10, 20, 30, 40, 50]);
    }

    #[test]
    fn inline_cases() {
        let manager = TaskManager::new(1);
        assert_eq!(manager.workers(), 1);
        assert_eq!(manager.run(vec![1, 2, 3], |i| i + 1), [2, 3, 4]);
        let manager = TaskManager::new(8);
        assert_eq!(manager.run(Vec::<u32>::new(), |i| i), Vec::<u32>::new());
        assert_eq!(manager.run(vec![5], |i| i), [5]);
    }

}
