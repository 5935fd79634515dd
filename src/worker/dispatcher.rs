//! Retry, backoff and time-limit policy around job execution.
//!
//! A job gets up to two retries with `5 * (attempt + 1)` seconds of
//! backoff (plus a little jitter). Exhausted retries become a
//! `{status: failed}` result, never an unresolved queue entry. The soft
//! time limit bounds the model call; the hard limit bounds the whole
//! attempt including artifact uploads.

use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

use super::jobs::{self, JobContext};
use crate::models::{TaskKind, TaskResult};
use crate::queue::Delivery;

const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLimits {
    pub soft: Duration,
    pub hard: Duration,
}

pub fn limits_for(kind: TaskKind) -> JobLimits {
    let (soft, hard) = match kind {
        TaskKind::GenerateImage => (240, 300),
        TaskKind::InpaintImage => (300, 360),
        TaskKind::SegmentPoint
        | TaskKind::SegmentBox
        | TaskKind::RemoveBackground
        | TaskKind::ReplaceBackground
        | TaskKind::ReplaceBackgroundColor
        | TaskKind::GetBackgroundMask => (60, 90),
        TaskKind::SegmentAuto => (120, 180),
        TaskKind::ApplyStyle => (180, 240),
    };
    JobLimits {
        soft: Duration::from_secs(soft),
        hard: Duration::from_secs(hard),
    }
}

fn backoff(attempt: u32) -> Duration {
    let base = Duration::from_secs(u64::from(5 * (attempt + 1)));
    base + Duration::from_millis(fastrand::u64(0..500))
}

async fn attempt(
    ctx: &JobContext,
    delivery: &Delivery,
    limits: JobLimits,
) -> anyhow::Result<TaskResult> {
    let run = async {
        timeout(limits.soft, jobs::run_job(ctx, delivery.kind, &delivery.payload))
            .await
            .map_err(|_| {
                anyhow::anyhow!("soft time limit exceeded ({}s)", limits.soft.as_secs())
            })?
    };
    timeout(limits.hard, run)
        .await
        .map_err(|_| anyhow::anyhow!("hard time limit exceeded ({}s)", limits.hard.as_secs()))?
}

/// Run a delivery to a final result. Infallible by construction: every
/// error path ends in a failure result the queue entry resolves with.
pub async fn execute(ctx: &JobContext, delivery: &Delivery) -> TaskResult {
    let limits = limits_for(delivery.kind);
    let mut last_error = String::new();

    for attempt_index in 0..=MAX_RETRIES {
        match attempt(ctx, delivery, limits).await {
            Ok(result) => {
                info!(
                    task_id = %delivery.task_id,
                    kind = delivery.kind.as_str(),
                    "Task completed"
                );
                return result;
            }
            Err(e) => {
                last_error = e.to_string();
                error!(
                    task_id = %delivery.task_id,
                    attempt = attempt_index,
                    "Task attempt failed: {}",
                    last_error
                );
                if attempt_index < MAX_RETRIES {
                    let delay = backoff(attempt_index);
                    info!(
                        task_id = %delivery.task_id,
                        "Retrying in {:.1}s (attempt {})",
                        delay.as_secs_f64(),
                        attempt_index + 1
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    TaskResult::failed(delivery.task_id, last_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_per_kind() {
        let generate = limits_for(TaskKind::GenerateImage);
        assert_eq!(generate.soft, Duration::from_secs(240));
        assert_eq!(generate.hard, Duration::from_secs(300));

        let inpaint = limits_for(TaskKind::InpaintImage);
        assert_eq!(inpaint.soft, Duration::from_secs(300));
        assert_eq!(inpaint.hard, Duration::from_secs(360));

        assert_eq!(
            limits_for(TaskKind::SegmentPoint),
            limits_for(TaskKind::RemoveBackground)
        );
        assert_eq!(limits_for(TaskKind::ApplyStyle).soft, Duration::from_secs(180));
    }

    #[test]
    fn test_backoff_grows_linearly() {
        let first = backoff(0);
        let second = backoff(1);
        let third = backoff(2);
        assert!(first >= Duration::from_secs(5) && first < Duration::from_secs(6));
        assert!(second >= Duration::from_secs(10) && second < Duration::from_secs(11));
        assert!(third >= Duration::from_secs(15) && third < Duration::from_secs(16));
    }
}
