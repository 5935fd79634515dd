//! Bridges the queue's eventual result into durable task state.
//!
//! The reconciler runs on the poll path. It never transitions a task out
//! of a terminal state, and the completion write is a conditional update
//! plus unique-constraint-guarded inserts, so any number of concurrent
//! polls materialize each artifact exactly once.

use chrono::Utc;

use crate::database::Database;
use crate::errors::AppError;
use crate::models::{
    GenerationTask, InpaintTask, InpaintTaskStatusResponse, QueueState, TaskResult, TaskStatus,
    TaskStatusResponse,
};
use crate::queue::TaskQueue;
use crate::services::estimate;

/// What a poll observation implies for the stored row.
#[derive(Debug)]
pub enum TransitionPlan {
    Keep,
    MarkProcessing,
    Complete(TaskResult),
    Fail(String),
}

/// Pure transition decision: current row status plus the queue's view.
pub fn plan(status: TaskStatus, state: &QueueState) -> TransitionPlan {
    if status.is_terminal() {
        return TransitionPlan::Keep;
    }
    match state {
        QueueState::Pending => TransitionPlan::Keep,
        QueueState::Started => TransitionPlan::MarkProcessing,
        QueueState::Ready(result) => match result.status {
            TaskStatus::Completed => TransitionPlan::Complete(result.clone()),
            _ => TransitionPlan::Fail(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Image generation failed".to_string()),
            ),
        },
    }
}

/// Progress percentage and milestone message for a task.
pub fn compute_progress(status: TaskStatus, elapsed: f64, estimated: f64) -> (i32, String) {
    match status {
        TaskStatus::Completed => (100, "Completed".to_string()),
        TaskStatus::Failed => (0, "Failed".to_string()),
        TaskStatus::Pending => (5, "Waiting in queue...".to_string()),
        TaskStatus::Processing => {
            let pct = if estimated > 0.0 {
                ((elapsed / estimated) * 100.0) as i32
            } else {
                0
            };
            let pct = pct.min(95);
            if elapsed < 2.0 {
                (pct.max(10), "Initializing model...".to_string())
            } else if elapsed < 5.0 {
                (pct.max(20), "Preparing generation...".to_string())
            } else {
                let remaining = estimated - elapsed;
                if remaining > 0.0 {
                    (
                        pct,
                        format!("Generating... (~{}s remaining)", remaining as i64),
                    )
                } else {
                    (90, "Finalizing...".to_string())
                }
            }
        }
    }
}

/// Reconcile one generation task against the queue and return the fresh
/// row.
pub async fn reconcile_generation(
    db: &Database,
    queue: &TaskQueue,
    task: GenerationTask,
) -> Result<GenerationTask, AppError> {
    if task.status.is_terminal() || task.queue_task_id.is_none() {
        return Ok(task);
    }

    let state = queue.state(task.id).await?;
    match plan(task.status, &state) {
        TransitionPlan::Keep => return Ok(task),
        TransitionPlan::MarkProcessing => {
            db.mark_generation_processing(task.id)
                .await
                .map_err(internal)?;
        }
        TransitionPlan::Complete(result) => {
            db.complete_generation_task(&task, &result)
                .await
                .map_err(internal)?;
        }
        TransitionPlan::Fail(error) => {
            db.fail_generation_task(task.id, &error)
                .await
                .map_err(internal)?;
        }
    }

    db.get_generation_task(task.id)
        .await
        .map_err(internal)?
        .ok_or_else(|| AppError::not_found("task", task.id))
}

pub async fn reconcile_inpaint(
    db: &Database,
    queue: &TaskQueue,
    task: InpaintTask,
) -> Result<InpaintTask, AppError> {
    if task.status.is_terminal() || task.queue_task_id.is_none() {
        return Ok(task);
    }

    let state = queue.state(task.id).await?;
    match plan(task.status, &state) {
        TransitionPlan::Keep => return Ok(task),
        TransitionPlan::MarkProcessing => {
            db.mark_inpaint_processing(task.id).await.map_err(internal)?;
        }
        TransitionPlan::Complete(result) => {
            db.complete_inpaint_task(&task, &result)
                .await
                .map_err(internal)?;
        }
        TransitionPlan::Fail(error) => {
            db.fail_inpaint_task(task.id, &error)
                .await
                .map_err(internal)?;
        }
    }

    db.get_inpaint_task(task.id)
        .await
        .map_err(internal)?
        .ok_or_else(|| AppError::not_found("task", task.id))
}

pub fn generation_status_response(task: &GenerationTask) -> TaskStatusResponse {
    let images = task
        .result
        .as_ref()
        .filter(|_| task.status == TaskStatus::Completed)
        .map(|result| result.images.clone())
        .unwrap_or_default();

    let (elapsed, estimated) = if task.status.is_terminal() {
        (None, None)
    } else {
        let start = task.started_at.unwrap_or(task.created_at);
        let elapsed = (Utc::now() - start).num_milliseconds() as f64 / 1000.0;
        let estimated =
            estimate::generation_estimate(task.width, task.height, task.num_images, false);
        (Some(elapsed.max(0.0)), Some(estimated))
    };

    let (progress, message) = compute_progress(
        task.status,
        elapsed.unwrap_or(0.0),
        estimated.unwrap_or(0.0),
    );

    TaskStatusResponse {
        task_id: task.id,
        status: task.status,
        images,
        error: task.error.clone(),
        progress,
        progress_message: Some(message),
        estimated_seconds: estimated,
        elapsed_seconds: elapsed,
        created_at: task.created_at,
        started_at: task.started_at,
        completed_at: task.completed_at,
    }
}

pub fn inpaint_status_response(
    task: &InpaintTask,
    original_image_url: Option<String>,
) -> InpaintTaskStatusResponse {
    let images = task
        .result
        .as_ref()
        .filter(|_| task.status == TaskStatus::Completed)
        .map(|result| result.images.clone())
        .unwrap_or_default();

    let (elapsed, estimated) = if task.status.is_terminal() {
        let elapsed = match (task.started_at, task.completed_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        };
        (elapsed, None)
    } else {
        let start = task.started_at.unwrap_or(task.created_at);
        let elapsed = (Utc::now() - start).num_milliseconds() as f64 / 1000.0;
        (
            Some(elapsed.max(0.0)),
            Some(estimate::kind_estimate(crate::models::TaskKind::InpaintImage)),
        )
    };

    let (progress, message) = compute_progress(
        task.status,
        elapsed.unwrap_or(0.0),
        estimated.unwrap_or(0.0),
    );

    InpaintTaskStatusResponse {
        task_id: task.id,
        status: task.status,
        progress,
        progress_message: Some(message),
        elapsed_seconds: elapsed,
        estimated_seconds: estimated,
        original_image_url,
        images,
        error: task.error.clone(),
        created_at: task.created_at,
        completed_at: task.completed_at,
    }
}

fn internal(e: anyhow::Error) -> AppError {
    AppError::internal(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_plan_terminal_rows_never_move() {
        let ready = QueueState::Ready(TaskResult::completed(Uuid::new_v4()));
        assert!(matches!(
            plan(TaskStatus::Completed, &ready),
            TransitionPlan::Keep
        ));
        assert!(matches!(
            plan(TaskStatus::Failed, &ready),
            TransitionPlan::Keep
        ));
    }

    #[test]
    fn test_plan_started_marks_processing() {
        assert!(matches!(
            plan(TaskStatus::Pending, &QueueState::Started),
            TransitionPlan::MarkProcessing
        ));
        assert!(matches!(
            plan(TaskStatus::Processing, &QueueState::Started),
            TransitionPlan::MarkProcessing
        ));
    }

    #[test]
    fn test_plan_ready_results_promote() {
        let completed = QueueState::Ready(TaskResult::completed(Uuid::new_v4()));
        assert!(matches!(
            plan(TaskStatus::Processing, &completed),
            TransitionPlan::Complete(_)
        ));

        let failed = QueueState::Ready(TaskResult::failed(Uuid::new_v4(), "cuda oom"));
        match plan(TaskStatus::Processing, &failed) {
            TransitionPlan::Fail(message) => assert_eq!(message, "cuda oom"),
            other => panic!("expected fail, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_pending_queue_keeps_row() {
        assert!(matches!(
            plan(TaskStatus::Pending, &QueueState::Pending),
            TransitionPlan::Keep
        ));
    }

    #[test]
    fn test_progress_fixed_points() {
        assert_eq!(compute_progress(TaskStatus::Completed, 0.0, 0.0).0, 100);
        assert_eq!(compute_progress(TaskStatus::Failed, 0.0, 0.0).0, 0);
        assert_eq!(compute_progress(TaskStatus::Pending, 0.0, 0.0).0, 5);
    }

    #[test]
    fn test_progress_processing_stays_in_bounds() {
        // Just started: floor of 10 while the model initializes.
        let (pct, message) = compute_progress(TaskStatus::Processing, 0.5, 8.0);
        assert_eq!(pct, 10);
        assert!(message.contains("Initializing"));

        // Mid-flight progress follows elapsed/estimated.
        let (pct, _) = compute_progress(TaskStatus::Processing, 6.0, 12.0);
        assert_eq!(pct, 50);

        // Overdue work parks at the finalizing milestone, never 100.
        let (pct, message) = compute_progress(TaskStatus::Processing, 30.0, 8.0);
        assert_eq!(pct, 90);
        assert!(message.contains("Finalizing"));

        // The cap holds right at the boundary.
        let (pct, _) = compute_progress(TaskStatus::Processing, 7.9, 8.0);
        assert!(pct <= 95);
    }
}
