use std::sync::{mpsc, Mutex};
use std::thread;

use crate::error::{Error, Result};

/// A fixed number of worker threads that drain a shared job queue.
///
/// Results flow back over a channel to the calling thread, which acts as the single collector.
/// [`WorkerPool::run`] returns once every job has been processed and every worker has joined.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    jobs: usize,
}

impl WorkerPool {
    pub fn new(jobs: usize) -> Result<Self> {
        if jobs == 0 {
            return Err(Error::InvalidConfig(String::from(
                "the concurrency limit must be at least 1",
            )));
        }

        Ok(Self { jobs })
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Processes `items` with at most `jobs` of them in flight.
    ///
    /// Each worker creates its private state with `init(worker_index)` once and passes it to
    /// every call of `work`. `collect` sees the results in completion order.
    pub fn run<J, S, R, I, W, C>(&self, items: Vec<J>, init: I, work: W, mut collect: C)
    where
        J: Send,
        R: Send,
        I: Fn(usize) -> S + Sync,
        W: Fn(&mut S, J) -> R + Sync,
        C: FnMut(R),
    {
        if items.is_empty() {
            return;
        }

        let workers = self.jobs.min(items.len());
        let queue = Mutex::new(items.into_iter());
        let (sender, receiver) = mpsc::channel::<R>();

        thread::scope(|scope| {
            for index in 0..workers {
                let sender = sender.clone();
                let (queue, init, work) = (&queue, &init, &work);

                let spawned = thread::Builder::new()
                    .name(format!("triage-worker-{index}"))
                    .spawn_scoped(scope, move || {
                        let mut state = init(index);
                        loop {
                            // the lock is released before the job runs
                            let next = match queue.lock() {
                                Ok(mut jobs) => jobs.next(),
                                Err(_) => None,
                            };
                            let Some(job) = next else {
                                break;
                            };

                            if sender.send(work(&mut state, job)).is_err() {
                                break;
                            }
                        }
                    });

                if let Err(e) = spawned {
                    log::error!("failed to spawn worker {index}: {e}");
                }
            }

            // workers hold the remaining senders, so the loop ends once all of them are done
            drop(sender);
            for result in receiver {
                collect(result);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test_log::test]
    fn test_zero_jobs_rejected() {
        assert!(WorkerPool::new(0).is_err());
        assert_eq!(WorkerPool::new(3).unwrap().jobs(), 3);
    }

    #[test_log::test]
    fn test_every_item_processed_once() {
        let pool = WorkerPool::new(4).unwrap();
        let mut results = Vec::new();

        pool.run((0..100).collect(), |_| (), |_, item: u32| item * 2, |r| {
            results.push(r)
        });

        results.sort();
        assert_eq!(results, (0..100).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test_log::test]
    fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(3).unwrap();
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        pool.run(
            vec![(); 24],
            |_| (),
            |_, _| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
            },
            |_| {},
        );

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test_log::test]
    fn test_worker_state_is_private() {
        let pool = WorkerPool::new(2).unwrap();
        let mut seen = Vec::new();

        pool.run(
            (0..10).collect(),
            |index| (index, 0usize),
            |state: &mut (usize, usize), _item: i32| {
                state.1 += 1;
                *state
            },
            |r| seen.push(r),
        );

        assert_eq!(seen.len(), 10);
        for worker in 0..2 {
            let count = seen.iter().filter(|(w, _)| *w == worker).count();
            let max = seen
                .iter()
                .filter(|(w, _)| *w == worker)
                .map(|(_, n)| *n)
                .max()
                .unwrap_or(0);
            assert_eq!(count, max);
        }
    }

    #[test_log::test]
    fn test_empty_input() {
        let mut called = false;
        WorkerPool::new(1)
            .unwrap()
            .run(Vec::<u8>::new(), |_| (), |_, _| (), |_| called = true);
        assert!(!called);
    }
}
