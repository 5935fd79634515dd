//! Durable work queue over Redis streams plus a result backend.
//!
//! Delivery semantics follow the worker contract: one consumer group on
//! the `image_generation` lane, COUNT 1 reads (prefetch 1), ack only
//! after the result document is written (acknowledge-late), and a
//! restarted consumer drains its own pending entries before taking new
//! work, so jobs from a lost worker are re-delivered.
//!
//! Task state lives in the result backend under
//! `<lane>:result:<task_id>`: absent means pending, a `started` marker
//! means a worker picked the job up, and the full result document means
//! the job resolved (possibly with a reported failure).

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::errors::QueueError;
use crate::models::{QueueState, TaskKind, TaskResult};

const GROUP: &str = "workers";
/// Results stay readable for an hour after the job resolves.
const RESULT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct Delivery {
    pub stream_id: String,
    pub kind: TaskKind,
    pub task_id: Uuid,
    pub payload: serde_json::Value,
}

#[derive(Clone)]
pub struct TaskQueue {
    broker: ConnectionManager,
    results: ConnectionManager,
    lane: String,
}

impl TaskQueue {
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let broker_client = redis::Client::open(config.broker_url.as_str())
            .map_err(QueueError::Broker)?;
        let result_client = redis::Client::open(config.result_url.as_str())
            .map_err(QueueError::Broker)?;
        Ok(Self {
            broker: ConnectionManager::new(broker_client).await?,
            results: ConnectionManager::new(result_client).await?,
            lane: config.lane.clone(),
        })
    }

    fn result_key(&self, task_id: Uuid) -> String {
        format!("{}:result:{}", self.lane, task_id)
    }

    /// Enqueue a named task payload. The task id doubles as the
    /// idempotency key and the handle callers poll with.
    pub async fn enqueue(
        &self,
        kind: TaskKind,
        task_id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<String, QueueError> {
        let task_field = task_id.to_string();
        let payload_field = serde_json::to_string(payload)?;
        let mut conn = self.broker.clone();
        let _id: String = conn
            .xadd(
                &self.lane,
                "*",
                &[
                    ("kind", kind.as_str()),
                    ("task_id", task_field.as_str()),
                    ("payload", payload_field.as_str()),
                ],
            )
            .await?;
        Ok(task_field)
    }

    /// Current state of a task as seen through the result backend.
    pub async fn state(&self, task_id: Uuid) -> Result<QueueState, QueueError> {
        let mut conn = self.results.clone();
        let raw: Option<String> = conn.get(self.result_key(task_id)).await?;
        parse_state(raw)
    }

    // Worker-side operations.

    pub async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.broker.clone();
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.lane, GROUP, "0")
            .await;
        match created {
            Ok(()) => Ok(()),
            // BUSYGROUP means another worker created it first.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Broker(e)),
        }
    }

    /// Read one delivery for this consumer. `redeliver` reads the
    /// consumer's own pending entries (crash recovery) instead of new
    /// ones. `block_ms` of zero means a non-blocking read.
    pub async fn next_delivery(
        &self,
        consumer: &str,
        block_ms: usize,
        redeliver: bool,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.broker.clone();
        let mut options = StreamReadOptions::default().group(GROUP, consumer).count(1);
        if block_ms > 0 {
            options = options.block(block_ms);
        }
        let cursor = if redeliver { "0" } else { ">" };
        let reply: StreamReadReply = conn
            .xread_options(&[&self.lane], &[cursor], &options)
            .await?;

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let kind_raw: String = field(&entry, "kind")?;
                let task_raw: String = field(&entry, "task_id")?;
                let payload_raw: String = field(&entry, "payload")?;

                let kind = TaskKind::parse(&kind_raw).ok_or_else(|| {
                    QueueError::MalformedDelivery {
                        message: format!("unknown task kind: {kind_raw}"),
                    }
                })?;
                let task_id = Uuid::parse_str(&task_raw).map_err(|_| {
                    QueueError::MalformedDelivery {
                        message: format!("bad task id: {task_raw}"),
                    }
                })?;
                return Ok(Some(Delivery {
                    stream_id: entry.id.clone(),
                    kind,
                    task_id,
                    payload: serde_json::from_str(&payload_raw)?,
                }));
            }
        }
        Ok(None)
    }

    /// Record that a worker picked the job up; clients observe
    /// `processing` from this marker.
    pub async fn mark_started(&self, task_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.results.clone();
        let _: () = conn
            .set_ex(
                self.result_key(task_id),
                r#"{"status":"started"}"#,
                RESULT_TTL_SECS,
            )
            .await?;
        Ok(())
    }

    /// Write the final result document. Failures resolve the queue entry
    /// too; they are results, not broker errors.
    pub async fn store_result(&self, result: &TaskResult) -> Result<(), QueueError> {
        let mut conn = self.results.clone();
        let _: () = conn
            .set_ex(
                self.result_key(result.task_id),
                serde_json::to_string(result)?,
                RESULT_TTL_SECS,
            )
            .await?;
        Ok(())
    }

    pub async fn ack(&self, stream_id: &str) -> Result<(), QueueError> {
        let mut conn = self.broker.clone();
        let _: i64 = conn.xack(&self.lane, GROUP, &[stream_id]).await?;
        Ok(())
    }
}

fn field(entry: &redis::streams::StreamId, name: &str) -> Result<String, QueueError> {
    let value = entry
        .map
        .get(name)
        .ok_or_else(|| QueueError::MalformedDelivery {
            message: format!("missing field: {name}"),
        })?;
    redis::from_redis_value(value).map_err(QueueError::Broker)
}

/// Decode a result backend value into the broker-side task state.
pub fn parse_state(raw: Option<String>) -> Result<QueueState, QueueError> {
    let Some(raw) = raw else {
        return Ok(QueueState::Pending);
    };
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    if value.get("status").and_then(|s| s.as_str()) == Some("started") {
        return Ok(QueueState::Started);
    }
    let result: TaskResult = serde_json::from_value(value)?;
    Ok(QueueState::Ready(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;

    #[test]
    fn test_parse_state_absent_is_pending() {
        assert!(matches!(parse_state(None).unwrap(), QueueState::Pending));
    }

    #[test]
    fn test_parse_state_started_marker() {
        let state = parse_state(Some(r#"{"status":"started"}"#.to_string())).unwrap();
        assert!(matches!(state, QueueState::Started));
    }

    #[test]
    fn test_parse_state_ready_results() {
        let completed = TaskResult::completed(Uuid::new_v4());
        let raw = serde_json::to_string(&completed).unwrap();
        match parse_state(Some(raw)).unwrap() {
            QueueState::Ready(result) => assert_eq!(result.status, TaskStatus::Completed),
            other => panic!("expected ready, got {other:?}"),
        }

        let failed = TaskResult::failed(Uuid::new_v4(), "cuda oom");
        let raw = serde_json::to_string(&failed).unwrap();
        match parse_state(Some(raw)).unwrap() {
            QueueState::Ready(result) => {
                assert_eq!(result.status, TaskStatus::Failed);
                assert_eq!(result.error.as_deref(), Some("cuda oom"));
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_state_rejects_garbage() {
        assert!(parse_state(Some("not json".to_string())).is_err());
    }
}
