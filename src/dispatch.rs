//! Worker threads that run subscriber callbacks off the pump threads.
//!
//! Jobs are submitted to a lane. Each lane is served by exactly one worker, so jobs
//! submitted to the same lane run in submission order.
//!
//! Queues are unbounded; the pump thread never blocks on submit. A lane whose backlog
//! passes `BACKLOG_WARNING` logs a warning once, and again only after it has drained.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::panic_message;

pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// Queued jobs on one lane above which a slow subscriber is reported.
pub(crate) const BACKLOG_WARNING: usize = 1024;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
    backlogged: bool,
}

#[derive(Default)]
struct Queue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

struct Worker {
    queue: Arc<Queue>,
    thread: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct Dispatcher {
    workers: Vec<Worker>,
}

impl Dispatcher {
    pub(crate) fn new(workers: usize) -> io::Result<Self> {
        let workers = (0..workers.max(1))
            .map(|n| {
                let queue = Arc::new(Queue::default());
                let worker_queue = Arc::clone(&queue);
                let handle = thread::Builder::new()
                    .name(format!("input-dispatch-{}", n))
                    .spawn(move || run_worker(&worker_queue))?;
                Ok(Worker {
                    queue,
                    thread: handle.thread().id(),
                    handle: Mutex::new(Some(handle)),
                })
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { workers })
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job` on `lane`. Returns `false` once the dispatcher is shut down.
    pub(crate) fn submit(&self, lane: usize, job: Job) -> bool {
        let lane = lane % self.workers.len();
        let worker = &self.workers[lane];
        let mut state = worker.queue.state.lock();
        if state.closed {
            return false;
        }
        state.jobs.push_back(job);
        if state.jobs.len() > BACKLOG_WARNING && !state.backlogged {
            state.backlogged = true;
            log::warn!(
                "input-dispatch-{} has {} queued callbacks, a subscriber is too slow",
                lane,
                state.jobs.len()
            );
        }
        drop(state);
        worker.queue.ready.notify_one();
        true
    }

    /// Stop accepting jobs, let queued ones finish, and join the workers.
    ///
    /// When called from a worker, that worker is detached instead of joined.
    pub(crate) fn shutdown(&self) {
        for worker in &self.workers {
            worker.queue.state.lock().closed = true;
            worker.queue.ready.notify_all();
        }
        let me = thread::current().id();
        for worker in &self.workers {
            let Some(handle) = worker.handle.lock().take() else {
                continue;
            };
            if worker.thread == me {
                continue;
            }
            if handle.join().is_err() {
                log::error!("dispatch worker exited by panic");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(queue: &Queue) {
    loop {
        let job = {
            let mut state = queue.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    if state.jobs.is_empty() {
                        state.backlogged = false;
                    }
                    break job;
                }
                if state.closed {
                    return;
                }
                queue.ready.wait(&mut state);
            }
        };
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
            log::error!("dispatch job panicked: {}", panic_message(panic.as_ref()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_lane_preserves_order() {
        let dispatcher = Dispatcher::new(2).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..100 {
            let seen = Arc::clone(&seen);
            assert!(dispatcher.submit(1, Box::new(move || seen.lock().push(n))));
        }
        dispatcher.shutdown();
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_jobs_run_off_the_submitting_thread() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        dispatcher.submit(0, Box::new(move || tx.send(thread::current().id()).unwrap()));
        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, thread::current().id());
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        dispatcher.submit(0, Box::new(|| panic!("job failure")));
        let counter = Arc::clone(&ran);
        dispatcher.submit(
            0,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backlog_is_flagged_until_drained() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        dispatcher.submit(
            0,
            Box::new(move || {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            }),
        );
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..=BACKLOG_WARNING {
            let ran = Arc::clone(&ran);
            assert!(dispatcher.submit(
                0,
                Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
            ));
        }
        assert!(dispatcher.workers[0].queue.state.lock().backlogged);

        release_tx.send(()).unwrap();
        dispatcher.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), BACKLOG_WARNING + 1);
        assert!(!dispatcher.workers[0].queue.state.lock().backlogged);
    }

    #[test]
    fn test_submit_after_shutdown_is_refused() {
        let dispatcher = Dispatcher::new(0).unwrap();
        assert_eq!(dispatcher.workers(), 1);
        dispatcher.shutdown();
        assert!(!dispatcher.submit(0, Box::new(|| {})));
        dispatcher.shutdown();
    }

    #[test]
    fn test_shutdown_from_worker_does_not_deadlock() {
        let dispatcher = Arc::new(Dispatcher::new(1).unwrap());
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&dispatcher);
        dispatcher.submit(
            0,
            Box::new(move || {
                inner.shutdown();
                tx.send(()).unwrap();
            }),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
