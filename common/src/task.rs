use std::{
    borrow::Cow,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{stream::FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, Instrument};

use crate::shutdown::ShutdownSignal;

/// Errors that can occur when joining [`Task`]s.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Static task finished prematurely: {name}")]
    PrematureFinish { name: Cow<'static, str> },
    #[error("Some tasks failed to finish on time: {hung_tasks:?}")]
    Hung { hung_tasks: Vec<String> },
}

/// A thin wrapper around [`tokio::task::JoinHandle`] that:
///
/// (1) propagates panics instead of catching them,
/// (2) adds the `#[must_use]` lint to ensure that all spawned tasks are
///     joined or explicitly annotated that no joining is required (use
///     [`Task::detach`]), and
/// (3) carries a task name for improved debuggability.
///
/// The goal is structured concurrency: the `node` binary joins every
/// long-running task it spawns, so a panicking settlement loop takes the
/// process down loudly instead of silently dying in the background.
#[must_use]
pub struct Task<T> {
    handle: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T> Task<T> {
    /// Spawns a named task which inherits from the current tracing span.
    /// This is generally what you want to use.
    pub fn spawn<F>(
        name: impl Into<Cow<'static, str>>,
        future: F,
    ) -> Task<F::Output>
    where
        F: Future<Output = T> + Send + 'static,
        F::Output: Send + 'static,
    {
        // Instrument the future so that the current tracing span propagates
        // past spawn boundaries.
        let span = tracing::Span::current();
        Task {
            handle: tokio::spawn(future.instrument(span)),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop the handle, letting the task run to completion on its own.
    /// Once detached, a task can't be joined. Use sparingly.
    pub fn detach(self) {
        drop(self.handle)
    }

    /// Aborts the task, then returns without waiting for it to finish.
    pub fn abort(&self) {
        self.handle.abort()
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, JoinError>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Err(join_err)) if join_err.is_panic() => {
                // Propagate panics to the poller.
                std::panic::resume_unwind(join_err.into_panic())
            }
            poll => poll,
        }
    }
}

/// The 'standard' way of supervising long-running tasks through shutdown.
///
/// - All given tasks are intended to run until the end of the program
///   lifetime; to prevent partial failures, a shutdown is triggered if any
///   task finishes prematurely.
/// - All task handles are polled so that any panics are propagated.
/// - After a shutdown signal is received, waits for all remaining tasks to
///   complete, up to `shutdown_timeout`.
///
/// # Errors
///
/// - If a task finishes prematurely, an error is returned.
/// - If some tasks hang past `shutdown_timeout`, an error is returned naming
///   the hung tasks.
pub async fn try_join_tasks_and_shutdown(
    tasks: Vec<Task<()>>,
    shutdown: ShutdownSignal,
    shutdown_timeout: Duration,
) -> Result<(), Error> {
    if tasks.is_empty() {
        shutdown.wait().await;
        return Ok(());
    }

    let mut running = tasks
        .into_iter()
        .map(Logged)
        .collect::<FuturesUnordered<_>>();

    let mut result = Ok(());

    // Wait for a shutdown signal while polling all tasks.
    loop {
        tokio::select! {
            // Mitigate possible select! race after a shutdown signal is sent
            biased;
            () = shutdown.wait() => break,
            Some(name) = running.next() => {
                // A task finished prematurely. Set our result to an error,
                // initiate a shutdown, and wait on the remaining tasks.
                result = Err(Error::PrematureFinish { name });
                break shutdown.signal();
            }
        }
    }

    let shutdown_timeout_fut = tokio::time::sleep(shutdown_timeout);
    tokio::pin!(shutdown_timeout_fut);

    while !running.is_empty() {
        tokio::select! {
            Some(_name) = running.next() => (),
            () = &mut shutdown_timeout_fut => {
                let hung_tasks = running
                    .iter()
                    .map(|logged| logged.0.name().to_owned())
                    .collect::<Vec<_>>();
                return Err(Error::Hung { hung_tasks });
            }
        }
    }

    result
}

/// A [`Future`] that wraps [`Task`] so its result is logged when it
/// finishes. The inner `T` is discarded and the output is the task's name.
struct Logged(Task<()>);

impl Future for Logged {
    type Output = Cow<'static, str>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.0).poll(cx) {
            Poll::Ready(result) => {
                let name = self.0.name.clone();
                match result {
                    Ok(()) => debug!("Task '{name}' finished"),
                    Err(e) => error!("Task '{name}' errored: {e:#}"),
                }
                Poll::Ready(name)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Shorthand to call [`try_join_tasks_and_shutdown`] and log any errors,
/// useful when the callsite needs a `Future<Output = ()> + Send + 'static`.
pub async fn join_tasks_and_shutdown(
    name: &str,
    tasks: Vec<Task<()>>,
    shutdown: ShutdownSignal,
    shutdown_timeout: Duration,
) {
    match try_join_tasks_and_shutdown(tasks, shutdown, shutdown_timeout).await {
        Ok(()) => info!("{name} tasks finished."),
        Err(e) => error!("{name} tasks errored: {e:#}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn premature_finish_is_an_error() {
        let shutdown = ShutdownSignal::new();
        let task = Task::spawn("early bird", async {});
        let result =
            try_join_tasks_and_shutdown(
                vec![task],
                shutdown,
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(Error::PrematureFinish { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn clean_shutdown_is_ok() {
        let shutdown = ShutdownSignal::new();
        let task_shutdown = shutdown.clone();
        let task = Task::spawn("well behaved", async move {
            task_shutdown.wait().await;
        });

        let joiner = tokio::spawn(try_join_tasks_and_shutdown(
            vec![task],
            shutdown.clone(),
            Duration::from_secs(1),
        ));
        shutdown.signal();
        joiner.await.unwrap().unwrap();
    }
}
