use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{GalleryQuery, ImageListResponse, ImageResponse};
use crate::web::{AppState, UserContext};

pub async fn list_images(
    Query(params): Query<GalleryQuery>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<ImageListResponse>, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(20).clamp(1, 100);

    let (images, total) = state
        .database
        .list_images(
            user.user_id,
            page,
            limit,
            params.favorites_only,
            params.search.as_deref(),
        )
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    Ok(Json(ImageListResponse {
        images: images.iter().map(ImageResponse::from).collect(),
        total,
        page,
        limit,
    }))
}

pub async fn get_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<ImageResponse>, AppError> {
    let image = state
        .database
        .get_image(id, user.user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("image", id))?;

    Ok(Json(ImageResponse::from(&image)))
}

pub async fn toggle_favorite(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<ImageResponse>, AppError> {
    let image = state
        .database
        .toggle_image_favorite(id, user.user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("image", id))?;

    Ok(Json(ImageResponse::from(&image)))
}

pub async fn delete_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .database
        .delete_image(id, user.user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    if !deleted {
        return Err(AppError::not_found("image", id));
    }
    Ok(StatusCode::NO_CONTENT)
}
