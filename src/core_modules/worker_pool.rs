// THEORY:
// The worker pool runs a batch of independent, CPU-bound jobs and hands back one
// result per job, in submission order. It is a tokio runtime used purely for its
// blocking thread pool: every job but the first goes to `spawn_blocking`, the
// first runs on the calling thread, and the caller then blocks on `join_all`
// until every job has finished.
//
// Key architectural principles:
// 1.  **Caller Participates**: Job 0 runs inline, so a batch of T jobs occupies
//     the caller plus at most T-1 pool threads.
// 2.  **Join Everything**: There is no cancellation. A failing or panicking job
//     does not stop its siblings; all of them are awaited before `run` returns.
// 3.  **Panics Are Errors**: A panic in any job becomes `InternalError`, never an
//     unwinding caller.

use futures::future::join_all;
use log::debug;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinError;

use crate::error::{RenderError, RenderResult};

/// A bounded pool of blocking worker threads.
pub struct WorkerPool {
    runtime: Runtime,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> RenderResult<Self> {
        let max_workers = max_workers.max(1);
        let runtime = Builder::new_current_thread()
            .max_blocking_threads(max_workers)
            .thread_name("hsb-render-worker")
            .enable_time()
            .build()
            .map_err(|e| RenderError::InternalError(format!("worker pool could not start: {}", e)))?;
        debug!("worker pool started with up to {} threads", max_workers);
        Ok(Self { runtime, max_workers })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs every job and returns their results in submission order.
    ///
    /// Must not be called from inside an async context; this blocks the thread.
    pub fn run<T, F>(&self, jobs: Vec<F>) -> Vec<RenderResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> RenderResult<T> + Send + 'static,
    {
        let mut jobs = jobs.into_iter();
        let Some(first) = jobs.next() else {
            return Vec::new();
        };

        let handles: Vec<_> = jobs.map(|job| self.runtime.spawn_blocking(job)).collect();

        let first_result = run_inline(first);

        let rest = self.runtime.block_on(join_all(handles));

        let mut results = Vec::with_capacity(rest.len() + 1);
        results.push(first_result);
        results.extend(
            rest.into_iter()
                .map(|joined| joined.unwrap_or_else(|e| Err(from_join_error(e)))),
        );
        results
    }

    /// Stops the runtime. Dropping it joins every blocking thread it started.
    pub fn shutdown(self) {
        debug!("worker pool shutting down");
        drop(self.runtime);
    }
}

/// Runs `job` on the calling thread, turning a panic into `InternalError`.
pub(crate) fn run_inline<T>(job: impl FnOnce() -> RenderResult<T>) -> RenderResult<T> {
    catch_unwind(AssertUnwindSafe(job))
        .unwrap_or_else(|payload| Err(RenderError::InternalError(panic_message(payload.as_ref()))))
}

fn from_join_error(error: JoinError) -> RenderError {
    if error.is_panic() {
        RenderError::InternalError(panic_message(error.into_panic().as_ref()))
    } else {
        RenderError::InternalError(error.to_string())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("task panicked: {}", detail)
}
