//! Host-side async execution wrapper.
//!
//! Foreign work can be pushed onto worker threads and observed through a
//! future-like handle with blocking wait, cancellation, and elapsed-time
//! measurement. A bounded pool caps concurrency; retry with exponential
//! backoff, parallel fan-out, and race are built on top. Worker threads
//! never re-enter the evaluator — they exist only for foreign execution,
//! and the evaluator thread blocks on the handles explicitly.

use std::{
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};

/// Cooperative cancellation flag shared with the running task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Why a wait did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The task observed its cancellation flag and stopped. This is a
    /// distinguished status, not an error thrown into the evaluator.
    Cancelled,
    /// The wait deadline elapsed before the task finished.
    TimedOut,
    /// The worker disappeared without sending a result.
    Lost,
}

enum Outcome<R> {
    Done(R),
    Cancelled,
}

/// A handle to work running on a pool thread.
#[derive(Debug)]
pub struct PolyFuture<R> {
    receiver: mpsc::Receiver<Outcome<R>>,
    cancel: CancelToken,
    started: Instant,
}

impl<R> PolyFuture<R> {
    /// Blocks until the task finishes or is cancelled.
    pub fn wait(self) -> Result<R, WaitError> {
        match self.receiver.recv() {
            Ok(Outcome::Done(value)) => Ok(value),
            Ok(Outcome::Cancelled) => Err(WaitError::Cancelled),
            Err(_) => Err(WaitError::Lost),
        }
    }

    /// Blocks with a deadline.
    pub fn wait_timeout(self, timeout: Duration) -> Result<R, WaitError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Outcome::Done(value)) => Ok(value),
            Ok(Outcome::Cancelled) => Err(WaitError::Cancelled),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(WaitError::TimedOut),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(WaitError::Lost),
        }
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Time since the task was submitted.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Bounded concurrency for worker-thread submissions. Submissions past the
/// limit wait on a condition variable until a slot frees up.
#[derive(Debug)]
pub struct WorkerPool {
    max_concurrent: usize,
    active: Mutex<usize>,
    freed: Condvar,
}

impl WorkerPool {
    #[must_use]
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            max_concurrent: max_concurrent.max(1),
            active: Mutex::new(0),
            freed: Condvar::new(),
        })
    }

    fn acquire(&self) {
        let mut active = self.active.lock().expect("pool mutex poisoned");
        while *active >= self.max_concurrent {
            active = self.freed.wait(active).expect("pool mutex poisoned");
        }
        *active += 1;
    }

    fn release(&self) {
        let mut active = self.active.lock().expect("pool mutex poisoned");
        *active = active.saturating_sub(1);
        self.freed.notify_one();
    }

    /// Currently running task count; exposed for tests.
    #[must_use]
    pub fn active_count(&self) -> usize {
        *self.active.lock().expect("pool mutex poisoned")
    }
}

/// Submits `task` to a pool worker thread. The task receives the cancel
/// token and should poll it at its own suspension points; a task that
/// observes cancellation before starting reports the distinguished
/// cancelled status instead of running.
pub fn spawn<R, F>(pool: &Arc<WorkerPool>, task: F) -> PolyFuture<R>
where
    R: Send + 'static,
    F: FnOnce(&CancelToken) -> R + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let pool = Arc::clone(pool);
    std::thread::spawn(move || {
        pool.acquire();
        let outcome = if token.is_cancelled() {
            Outcome::Cancelled
        } else {
            Outcome::Done(task(&token))
        };
        pool.release();
        let _ = sender.send(outcome);
    });
    PolyFuture {
        receiver,
        cancel,
        started: Instant::now(),
    }
}

/// Retries `attempt` up to `max_attempts` times with exponential backoff
/// starting at `base_delay` (doubling each retry).
pub fn retry_with_backoff<R, E>(
    max_attempts: usize,
    base_delay: Duration,
    mut attempt: impl FnMut(usize) -> Result<R, E>,
) -> Result<R, E> {
    let mut delay = base_delay;
    let mut last_err = None;
    for n in 0..max_attempts.max(1) {
        match attempt(n) {
            Ok(value) => return Ok(value),
            Err(err) => last_err = Some(err),
        }
        if n + 1 < max_attempts {
            std::thread::sleep(delay);
            delay = delay.saturating_mul(2);
        }
    }
    Err(last_err.expect("at least one attempt ran"))
}

/// Runs every task on the pool and returns all results in submission order.
pub fn run_parallel<R, F>(pool: &Arc<WorkerPool>, tasks: Vec<F>) -> Vec<Result<R, WaitError>>
where
    R: Send + 'static,
    F: FnOnce(&CancelToken) -> R + Send + 'static,
{
    let futures: Vec<PolyFuture<R>> = tasks.into_iter().map(|task| spawn(pool, task)).collect();
    futures.into_iter().map(PolyFuture::wait).collect()
}

/// Runs every task and returns the first success, cancelling the rest.
/// When every task fails, the last failure is returned.
pub fn race<T, E>(
    pool: &Arc<WorkerPool>,
    tasks: Vec<Box<dyn FnOnce(&CancelToken) -> Result<T, E> + Send>>,
) -> Option<Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    if tasks.is_empty() {
        return None;
    }
    let (sender, receiver) = mpsc::channel();
    let total = tasks.len();
    let mut futures = Vec::with_capacity(total);
    for task in tasks {
        let sender = sender.clone();
        futures.push(spawn(pool, move |token| {
            let _ = sender.send(task(token));
        }));
    }
    drop(sender);

    let mut last_failure = None;
    for _ in 0..total {
        match receiver.recv() {
            Ok(Ok(value)) => {
                for future in &futures {
                    future.cancel();
                }
                return Some(Ok(value));
            }
            Ok(Err(err)) => last_failure = Some(Err(err)),
            Err(_) => break,
        }
    }
    last_failure
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_the_task_result_and_elapsed_moves() {
        let pool = WorkerPool::new(2);
        let future = spawn(&pool, |_| 40 + 2);
        assert!(future.elapsed() < Duration::from_secs(5));
        assert_eq!(future.wait(), Ok(42));
    }

    #[test]
    fn cancellation_before_start_reports_cancelled() {
        // A single-slot pool lets us queue a task behind a sleeper and
        // cancel it before it ever runs.
        let pool = WorkerPool::new(1);
        let sleeper = spawn(&pool, |_| std::thread::sleep(Duration::from_millis(200)));
        let queued = spawn(&pool, |_| "ran");
        queued.cancel();
        assert_eq!(queued.wait(), Err(WaitError::Cancelled));
        sleeper.wait().unwrap();
    }

    #[test]
    fn pool_bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let futures: Vec<_> = (0..4)
            .map(|_| {
                let pool_probe = Arc::clone(&pool);
                spawn(&pool, move |_| {
                    let seen = pool_probe.active_count();
                    std::thread::sleep(Duration::from_millis(50));
                    seen
                })
            })
            .collect();
        for future in futures {
            assert!(future.wait().unwrap() <= 2);
        }
    }

    #[test]
    fn retry_backs_off_until_success() {
        let mut calls = 0;
        let result: Result<i32, &str> = retry_with_backoff(4, Duration::from_millis(1), |_| {
            calls += 1;
            if calls < 3 { Err("flaky") } else { Ok(7) }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 3);
    }

    #[test]
    fn parallel_preserves_submission_order() {
        let pool = WorkerPool::new(4);
        let tasks: Vec<_> = (0..4)
            .map(|i| move |_: &CancelToken| i * 10)
            .collect();
        let results = run_parallel(&pool, tasks);
        let values: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![0, 10, 20, 30]);
    }

    #[test]
    fn race_returns_first_success() {
        let pool = WorkerPool::new(4);
        let tasks: Vec<Box<dyn FnOnce(&CancelToken) -> Result<&'static str, &'static str> + Send>> = vec![
            Box::new(|_| {
                std::thread::sleep(Duration::from_millis(100));
                Ok("slow")
            }),
            Box::new(|_| Err("failed")),
            Box::new(|_| Ok("fast")),
        ];
        let winner = race(&pool, tasks);
        assert!(matches!(winner, Some(Ok("fast")) | Some(Ok("slow"))));
    }
}
