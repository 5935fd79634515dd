use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::OnceLock;

use crate::auth::{self, TOKEN_KIND_REFRESH};
use crate::errors::AppError;
use crate::models::{LoginRequest, RefreshRequest, RegisterRequest, TokenPair, UserResponse};
use crate::web::{AppState, UserContext};

fn email_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    })
}

fn validate_register(request: &RegisterRequest) -> Result<(), AppError> {
    if !email_regex().is_match(&request.email) {
        return Err(AppError::validation(
            "email",
            "format",
            "email must be a valid address",
        ));
    }
    let password_len = request.password.chars().count();
    if !(8..=100).contains(&password_len) {
        return Err(AppError::validation(
            "password",
            "length",
            "password must be 8-100 characters",
        ));
    }
    let name_len = request.name.chars().count();
    if !(2..=100).contains(&name_len) {
        return Err(AppError::validation(
            "name",
            "length",
            "name must be 2-100 characters",
        ));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenPair>), AppError> {
    validate_register(&request)?;

    let existing = state
        .database
        .get_user_by_email(&request.email)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;
    if existing.is_some() {
        return Err(AppError::validation(
            "email",
            "exists",
            "Email already registered",
        ));
    }

    let password_hash = auth::hash_password(&request.password, state.config.auth.bcrypt_cost)?;
    let user = state
        .database
        .create_user(&request.email, &password_hash, &request.name)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    tracing::info!(user_id = %user.id, "Registered user");

    let pair = state.tokens.create_token_pair(&user)?;
    Ok((StatusCode::CREATED, Json(pair)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let user = state
        .database
        .get_user_by_email(&request.email)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    let Some(user) = user else {
        // Unknown email costs the same as a wrong password.
        auth::equalize_timing(&request.password);
        return Err(AppError::unauthorized("Incorrect email or password"));
    };

    if !auth::verify_password(&request.password, &user.password_hash) {
        return Err(AppError::unauthorized("Incorrect email or password"));
    }
    if !user.is_active {
        return Err(AppError::unauthorized("Incorrect email or password"));
    }

    let pair = state.tokens.create_token_pair(&user)?;
    Ok(Json(pair))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let claims = state
        .tokens
        .decode_token_of_kind(&request.refresh_token, TOKEN_KIND_REFRESH)?;

    let user = state
        .database
        .get_user_by_id(claims.subject()?)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    let Some(user) = user else {
        return Err(AppError::unauthorized("User not found or inactive"));
    };
    if !user.is_active {
        return Err(AppError::unauthorized("User not found or inactive"));
    }

    let pair = state.tokens.create_token_pair(&user)?;
    Ok(Json(pair))
}

pub async fn me(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<UserResponse>, AppError> {
    let record = state
        .database
        .get_user_by_id(user.user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("user", user.user_id))?;

    Ok(Json(UserResponse::from(&record)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_validation() {
        let valid = RegisterRequest {
            email: "a@b.c".to_string(),
            password: "pass1234".to_string(),
            name: "Al".to_string(),
        };
        assert!(validate_register(&valid).is_ok());

        let mut bad_email = valid.clone();
        bad_email.email = "not-an-email".to_string();
        assert!(validate_register(&bad_email).is_err());

        let mut short_password = valid.clone();
        short_password.password = "short".to_string();
        assert!(validate_register(&short_password).is_err());

        let mut short_name = valid.clone();
        short_name.name = "A".to_string();
        assert!(validate_register(&short_name).is_err());
    }
}
