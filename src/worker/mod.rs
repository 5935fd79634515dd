//! GPU worker: single consumer per device, one job at a time.
//!
//! The loop first drains this consumer's pending entries (work that was
//! delivered but never acknowledged before a crash), then blocks on new
//! deliveries. Acknowledgement happens only after the result document is
//! written, so a lost worker's jobs are always re-delivered.

use anyhow::Result;
use tracing::{error, info};

use crate::cache::KvCache;
use crate::config::Config;
use crate::queue::{Delivery, TaskQueue};
use crate::storage::ObjectStore;

pub mod artifacts;
pub mod dispatcher;
pub mod gpu_monitor;
pub mod jobs;
pub mod pipelines;

use jobs::JobContext;
use pipelines::{PipelineSet, RunnerClient};

const POLL_BLOCK_MS: usize = 5000;

pub struct WorkerService {
    queue: TaskQueue,
    cache: KvCache,
    consumer: String,
    ctx: JobContext,
}

impl WorkerService {
    pub async fn new(config: &Config) -> Result<Self> {
        let queue = TaskQueue::connect(&config.queue).await?;
        let cache = KvCache::connect(&config.redis.url).await?;
        let storage = ObjectStore::new(&config.object_store);
        let runner = RunnerClient::new(&config.worker.model_runner_url)?;
        let pipelines = PipelineSet::new(runner, config.worker.clone());
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            queue,
            cache,
            consumer: config.queue.consumer_name.clone(),
            ctx: JobContext {
                storage,
                pipelines,
                http,
            },
        })
    }

    pub async fn run(self) -> Result<()> {
        self.ctx.storage.ensure_bucket().await?;
        self.queue.ensure_group().await?;

        gpu_monitor::update_gpu_stats(&self.cache).await;
        tokio::spawn(gpu_monitor::run_monitor(self.cache.clone()));

        info!(consumer = %self.consumer, "Worker ready, draining pending deliveries");
        loop {
            match self.queue.next_delivery(&self.consumer, 0, true).await {
                Ok(Some(delivery)) => self.process(delivery).await,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read pending deliveries: {}", e);
                    break;
                }
            }
        }

        info!(consumer = %self.consumer, "Consuming new deliveries");
        loop {
            match self
                .queue
                .next_delivery(&self.consumer, POLL_BLOCK_MS, false)
                .await
            {
                Ok(Some(delivery)) => self.process(delivery).await,
                Ok(None) => {}
                Err(e) => {
                    error!("Queue read failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery) {
        info!(
            task_id = %delivery.task_id,
            kind = delivery.kind.as_str(),
            "Picked up task"
        );

        if let Err(e) = self.queue.mark_started(delivery.task_id).await {
            error!(task_id = %delivery.task_id, "Failed to mark task started: {}", e);
        }

        let result = dispatcher::execute(&self.ctx, &delivery).await;

        // Ack only once the result is durable; otherwise the broker
        // re-delivers after restart.
        match self.queue.store_result(&result).await {
            Ok(()) => {
                if let Err(e) = self.queue.ack(&delivery.stream_id).await {
                    error!(task_id = %delivery.task_id, "Failed to ack delivery: {}", e);
                }
            }
            Err(e) => {
                error!(
                    task_id = %delivery.task_id,
                    "Failed to store result, leaving delivery unacked: {}",
                    e
                );
            }
        }
    }
}
