use axum::extract::State;
use axum::Json;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::GalleryStatsResponse;
use crate::web::AppState;
use crate::worker::gpu_monitor::{GpuInfo, GpuStatsDocument, GPU_STATS_KEY};

pub async fn gallery_stats(
    State(state): State<AppState>,
) -> Result<Json<GalleryStatsResponse>, AppError> {
    let db = &state.database;
    let now = Utc::now();
    let (today, week, month) = crate::database::Database::stats_window_starts(now);

    let total_images = db.count_images().await.map_err(internal)?;
    let today_images = db.count_images_since(today).await.map_err(internal)?;
    let week_images = db.count_images_since(week).await.map_err(internal)?;
    let month_images = db.count_images_since(month).await.map_err(internal)?;
    let total_tasks = db.count_generation_tasks().await.map_err(internal)?;
    let last_30 = db
        .count_images_since(today - Duration::days(30))
        .await
        .map_err(internal)?;

    Ok(Json(GalleryStatsResponse {
        total_images,
        today_images,
        week_images,
        month_images,
        total_tasks,
        avg_images_per_day: (last_30 as f64 / 30.0 * 10.0).round() / 10.0,
        generated_at: now,
    }))
}

fn gpu_block(gpu: &GpuInfo, available: bool) -> Value {
    json!({
        "available": available,
        "name": gpu.name,
        "memory_used_gb": gpu.memory_used_gb,
        "memory_total_gb": gpu.memory_total_gb,
        "memory_free_gb": gpu.memory_free_gb,
        "memory_percent": gpu.memory_percent,
        "utilization_percent": gpu.utilization_percent,
        "temperature_c": gpu.temperature_c,
        "power_draw_w": gpu.power_draw_w,
        "power_limit_w": gpu.power_limit_w,
    })
}

pub async fn ml_status(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let stats: Option<GpuStatsDocument> = state.cache.get_json(GPU_STATS_KEY).await?;

    let (gpu, gpu_count) = match stats {
        Some(doc) if doc.available => {
            let primary = doc.primary_gpu.unwrap_or_default();
            (gpu_block(&primary, true), doc.gpu_count)
        }
        // Absent or stale key: zeroed structure, explicitly unavailable.
        _ => {
            let zeroed = GpuInfo {
                name: "NVIDIA GPU".to_string(),
                ..GpuInfo::default()
            };
            (gpu_block(&zeroed, false), 0)
        }
    };

    Ok(Json(json!({
        "status": "ready",
        "model": {
            "name": state.config.worker.model_name,
            "loaded": true,
        },
        "gpu": gpu,
        "gpu_count": gpu_count,
    })))
}

fn internal(e: anyhow::Error) -> AppError {
    AppError::internal(e.to_string())
}
