use std::thread;
use std::time::{Duration, Instant};

pub use tokio_util::sync::CancellationToken;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{SubmissionStatus, Task, TaskStatus};
use crate::error::BridgeError;
use crate::execution::ExecutionClient;

const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Source of the wait between polls. A sleep may end early once `cancel`
/// fires.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) {
        let deadline = Instant::now() + duration;
        while !cancel.is_cancelled() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the task leaves the queued and running states.
    pub max_polls: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_polls: Some(10_080),
        }
    }
}

/// Polls `task_id` until its status is neither QUEUED nor RUNNING.
pub fn wait_for_terminal<E: ExecutionClient + ?Sized>(
    exec: &E,
    task_id: &str,
    policy: &PollPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    sink: &dyn ProgressSink,
) -> Result<Task, BridgeError> {
    let mut task = exec.get_task(task_id)?;
    let mut polls = 0u32;
    while task.status.is_in_progress() {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled(format!("monitoring task {task_id}")));
        }
        if policy.max_polls.is_some_and(|max| polls >= max) {
            return Err(BridgeError::PollLimit {
                task_id: task_id.to_string(),
                polls,
            });
        }
        clock.sleep(policy.interval, cancel);
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled(format!("monitoring task {task_id}")));
        }
        polls += 1;
        task = exec.get_task(task_id)?;
        tracing::debug!(task_id, status = %task.status, polls, "task polled");
        sink.event(ProgressEvent {
            message: format!("phase=Execute; task {task_id} {} (poll {polls})", task.status),
            elapsed: None,
        });
    }
    Ok(task)
}

/// Maps a finished task to the submission status written back to the queue.
pub fn final_submission_status(
    task_id: &str,
    status: &TaskStatus,
) -> Result<SubmissionStatus, BridgeError> {
    match status {
        TaskStatus::Completed => Ok(SubmissionStatus::Accepted),
        TaskStatus::Invalid => Ok(SubmissionStatus::Invalid),
        other => Err(BridgeError::UnsupportedStatus {
            task_id: task_id.to_string(),
            status: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn terminal_status_mapping() {
        assert_eq!(
            final_submission_status("t", &TaskStatus::Completed).unwrap(),
            SubmissionStatus::Accepted
        );
        assert_eq!(
            final_submission_status("t", &TaskStatus::Invalid).unwrap(),
            SubmissionStatus::Invalid
        );
        assert_matches!(
            final_submission_status("t", &TaskStatus::Other("CANCELLED".into())),
            Err(BridgeError::UnsupportedStatus { .. })
        );
    }

    #[test]
    fn system_sleep_returns_early_when_cancelled() {
        let token = CancellationToken::new();
        let other = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            other.cancel();
        });

        let started = Instant::now();
        SystemClock.sleep(Duration::from_secs(30), &token);

        canceller.join().unwrap();
        assert!(token.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn system_sleep_waits_out_short_intervals() {
        let started = Instant::now();
        SystemClock.sleep(Duration::from_millis(20), &CancellationToken::new());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
