//! Phase barriers, bounded polling and transient-failure retries.

use std::future::Future;
use std::time::Duration;

use admin_command::CommandError;
use futures::future::join_all;
use tokio::time::{sleep, Instant};
use tracing::{error, warn};

use crate::config::BackoffPolicy;
use crate::error::{Result, TopologyError};

/// Run every task of a phase to completion, then report the first failure in
/// input order. Every failure is logged.
pub(crate) async fn settle<I>(phase: &str, tasks: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Future<Output = Result<()>>,
{
    let mut failures = collect_failures(phase, tasks).await;
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.swap_remove(0))
    }
}

/// Like [`settle`] but reports every failure.
pub(crate) async fn settle_all<I>(phase: &str, tasks: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Future<Output = Result<()>>,
{
    let mut failures = collect_failures(phase, tasks).await;
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(TopologyError::Aggregate(failures)),
    }
}

async fn collect_failures<I>(phase: &str, tasks: I) -> Vec<TopologyError>
where
    I: IntoIterator,
    I::Item: Future<Output = Result<()>>,
{
    join_all(tasks)
        .await
        .into_iter()
        .filter_map(|result| result.err())
        .inspect(|e| error!("{phase} failed: {e}"))
        .collect()
}

/// Probe until it yields a value or `timeout` elapses. The probe runs at least
/// once.
pub(crate) async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(interval).await;
    }
}

/// Retry `attempt` while it fails with a command error `is_transient`
/// accepts, up to the policy's attempt budget.
pub(crate) async fn retry_transient<T, F, Fut>(
    policy: &BackoffPolicy,
    is_transient: fn(&CommandError) -> bool,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(TopologyError::Command {
                command,
                target,
                source,
            }) if is_transient(&source) => {
                if tries >= policy.max_attempts {
                    return Err(TopologyError::TransientCommand {
                        command,
                        target,
                        attempts: tries,
                        source,
                    });
                }
                let delay = policy.delay_after(tries);
                warn!(
                    "'{command}' on {target} failed transiently (attempt {tries}/{}): {source}; retrying in {delay:?}",
                    policy.max_attempts
                );
                sleep(delay).await;
            }
            other => return other,
        }
    }
}
