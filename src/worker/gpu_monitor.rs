//! Background GPU telemetry sampler.
//!
//! Probes `nvidia-smi` every 10 seconds and publishes a JSON document to
//! a well-known cache key with a 30 second TTL; consumers treat an absent
//! key as "no GPU visible" rather than an error.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::cache::KvCache;

pub const GPU_STATS_KEY: &str = "ml_worker:gpu_stats";
pub const GPU_STATS_TTL_SECS: u64 = 30;
const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

const NVIDIA_SMI_QUERY: &str = "--query-gpu=name,memory.used,memory.total,memory.free,utilization.gpu,temperature.gpu,power.draw,power.limit";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuInfo {
    pub id: usize,
    pub name: String,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub memory_free_mb: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub memory_free_gb: f64,
    pub memory_percent: f64,
    pub utilization_percent: f64,
    pub temperature_c: f64,
    pub power_draw_w: f64,
    pub power_limit_w: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuStatsDocument {
    pub available: bool,
    pub gpu_count: usize,
    pub gpus: Vec<GpuInfo>,
    pub primary_gpu: Option<GpuInfo>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GpuStatsDocument {
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            available: false,
            gpu_count: 0,
            gpus: Vec::new(),
            primary_gpu: None,
            timestamp: Utc::now().timestamp(),
            error: Some(error.into()),
        }
    }
}

fn parse_metric(raw: &str) -> f64 {
    if raw == "[N/A]" {
        return 0.0;
    }
    raw.parse().unwrap_or(0.0)
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output.
pub fn parse_nvidia_smi_csv(output: &str) -> Vec<GpuInfo> {
    let mut gpus = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 8 {
            continue;
        }
        let memory_used_mb = parse_metric(parts[1]);
        let memory_total_mb = parse_metric(parts[2]);
        let memory_percent = if memory_total_mb > 0.0 {
            (memory_used_mb / memory_total_mb * 1000.0).round() / 10.0
        } else {
            0.0
        };
        gpus.push(GpuInfo {
            id: idx,
            name: parts[0].to_string(),
            memory_used_mb,
            memory_total_mb,
            memory_free_mb: parse_metric(parts[3]),
            memory_used_gb: (memory_used_mb / 1024.0 * 100.0).round() / 100.0,
            memory_total_gb: (memory_total_mb / 1024.0 * 100.0).round() / 100.0,
            memory_free_gb: (parse_metric(parts[3]) / 1024.0 * 100.0).round() / 100.0,
            memory_percent,
            utilization_percent: parse_metric(parts[4]),
            temperature_c: parse_metric(parts[5]),
            power_draw_w: parse_metric(parts[6]),
            power_limit_w: parse_metric(parts[7]),
        });
    }
    gpus
}

async fn sample() -> GpuStatsDocument {
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        tokio::process::Command::new("nvidia-smi")
            .arg(NVIDIA_SMI_QUERY)
            .arg("--format=csv,noheader,nounits")
            .output(),
    )
    .await;

    let output = match output {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("nvidia-smi not runnable: {}", e);
            return GpuStatsDocument::unavailable("nvidia-smi not found");
        }
        Err(_) => {
            warn!("nvidia-smi timeout");
            return GpuStatsDocument::unavailable("nvidia-smi timeout");
        }
    };

    if !output.status.success() {
        warn!(
            "nvidia-smi failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        return GpuStatsDocument::unavailable("nvidia-smi failed");
    }

    let gpus = parse_nvidia_smi_csv(&String::from_utf8_lossy(&output.stdout));
    GpuStatsDocument {
        available: !gpus.is_empty(),
        gpu_count: gpus.len(),
        primary_gpu: gpus.first().cloned(),
        gpus,
        timestamp: Utc::now().timestamp(),
        error: None,
    }
}

pub async fn update_gpu_stats(cache: &KvCache) {
    let stats = sample().await;
    if let Err(e) = cache
        .set_json(GPU_STATS_KEY, &stats, GPU_STATS_TTL_SECS)
        .await
    {
        error!("Failed to publish GPU stats: {}", e);
    } else {
        debug!(available = stats.available, "Published GPU stats");
    }
}

/// Sampler loop; spawned once per worker process.
pub async fn run_monitor(cache: KvCache) {
    info!("Starting GPU monitor");
    let mut ticker = interval(SAMPLE_INTERVAL);
    loop {
        ticker.tick().await;
        update_gpu_stats(&cache).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi_csv() {
        let output = "NVIDIA GeForce RTX 4090, 8192, 24564, 16372, 87, 71, 320.5, 450.0\n";
        let gpus = parse_nvidia_smi_csv(output);
        assert_eq!(gpus.len(), 1);
        let gpu = &gpus[0];
        assert_eq!(gpu.name, "NVIDIA GeForce RTX 4090");
        assert_eq!(gpu.memory_used_mb, 8192.0);
        assert_eq!(gpu.memory_used_gb, 8.0);
        assert_eq!(gpu.memory_percent, 33.3);
        assert_eq!(gpu.utilization_percent, 87.0);
        assert_eq!(gpu.power_draw_w, 320.5);
    }

    #[test]
    fn test_parse_handles_na_and_garbage() {
        let output = "Tesla T4, 0, 15360, 15360, [N/A], [N/A], [N/A], 70.0\nshort,line\n";
        let gpus = parse_nvidia_smi_csv(output);
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].utilization_percent, 0.0);
        assert_eq!(gpus[0].temperature_c, 0.0);
        assert_eq!(gpus[0].power_limit_w, 70.0);
    }

    #[test]
    fn test_unavailable_document() {
        let doc = GpuStatsDocument::unavailable("nvidia-smi not found");
        assert!(!doc.available);
        assert_eq!(doc.gpu_count, 0);
        assert!(doc.primary_gpu.is_none());
    }
}
