//! Login and admin user-management endpoints sitting on top of the
//! JWT/`UserStore` identity boundary stand-in (§7).

use crate::auth::{
    jwt::JwtHandler,
    middleware::extract_subject,
    models::{CreateUserRequest, LoginRequest, LoginResponse, UserResponse},
    user_store::UserStore,
};
use crate::models::Role;
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
}

impl AuthState {
    pub fn new(user_store: Arc<UserStore>, jwt_handler: Arc<JwtHandler>) -> Self {
        Self { user_store, jwt_handler }
    }
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    info!(username = %payload.username, "login attempt");

    let valid = state
        .user_store
        .verify_password(&payload.username, &payload.password)
        .map_err(|_| AuthApiError::InternalError)?;

    if !valid {
        warn!(username = %payload.username, "failed login attempt");
        return Err(AuthApiError::InvalidCredentials);
    }

    let user = state
        .user_store
        .get_user_by_username(&payload.username)
        .map_err(|_| AuthApiError::InternalError)?
        .ok_or(AuthApiError::InvalidCredentials)?;

    let (token, expires_in) = state
        .jwt_handler
        .generate_token(&user)
        .map_err(|_| AuthApiError::InternalError)?;

    info!(username = %user.username, role = user.role.as_str(), "login successful");

    Ok(Json(LoginResponse {
        token,
        expires_in,
        user: UserResponse::from_user(&user),
    }))
}

/// GET /api/auth/me
pub async fn get_current_user(
    State(state): State<AuthState>,
    req: Request,
) -> Result<Json<UserResponse>, AuthApiError> {
    let subject = extract_subject(&req).ok_or(AuthApiError::Unauthorized)?;

    let user = state
        .user_store
        .get_user_by_id(subject.user_id)
        .map_err(|_| AuthApiError::InternalError)?
        .ok_or(AuthApiError::UserNotFound)?;

    Ok(Json(UserResponse::from_user(&user)))
}

/// GET /api/admin/users (admin only)
pub async fn list_users(
    State(state): State<AuthState>,
    req: Request,
) -> Result<Json<Vec<UserResponse>>, AuthApiError> {
    let subject = extract_subject(&req).ok_or(AuthApiError::Unauthorized)?;
    if !subject.is_admin() {
        return Err(AuthApiError::Forbidden);
    }

    let users = state.user_store.list_users().map_err(|_| AuthApiError::InternalError)?;
    Ok(Json(users.iter().map(UserResponse::from_user).collect()))
}

/// POST /api/admin/users (admin only)
pub async fn create_user(
    State(state): State<AuthState>,
    req: Request,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, AuthApiError> {
    let subject = extract_subject(&req).ok_or(AuthApiError::Unauthorized)?;
    if !subject.is_admin() {
        return Err(AuthApiError::Forbidden);
    }

    if payload.password.len() < 8 {
        return Err(AuthApiError::WeakPassword);
    }

    let user = state
        .user_store
        .create_user(&payload.username, &payload.password, payload.role)
        .map_err(|e| {
            warn!(error = %e, "failed to create user");
            AuthApiError::UserAlreadyExists
        })?;

    info!(username = %user.username, role = user.role.as_str(), "user created");
    Ok(Json(UserResponse::from_user(&user)))
}

/// DELETE /api/admin/users/:id (admin only)
pub async fn delete_user(
    State(state): State<AuthState>,
    req: Request,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AuthApiError> {
    let subject = extract_subject(&req).ok_or(AuthApiError::Unauthorized)?;
    if !subject.is_admin() {
        return Err(AuthApiError::Forbidden);
    }

    let uuid = Uuid::parse_str(&user_id).map_err(|_| AuthApiError::InvalidUserId)?;
    if uuid == subject.user_id {
        return Err(AuthApiError::CannotDeleteSelf);
    }

    state.user_store.delete_user(uuid).map_err(|_| AuthApiError::UserNotFound)?;

    info!(%user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug)]
pub enum AuthApiError {
    InvalidCredentials,
    Unauthorized,
    Forbidden,
    UserNotFound,
    UserAlreadyExists,
    WeakPassword,
    InvalidUserId,
    CannotDeleteSelf,
    InternalError,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid username or password"),
            AuthApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthApiError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions"),
            AuthApiError::UserNotFound => (StatusCode::NOT_FOUND, "User not found"),
            AuthApiError::UserAlreadyExists => (StatusCode::CONFLICT, "Username already exists"),
            AuthApiError::WeakPassword => (StatusCode::BAD_REQUEST, "Password must be at least 8 characters"),
            AuthApiError::InvalidUserId => (StatusCode::BAD_REQUEST, "Invalid user ID format"),
            AuthApiError::CannotDeleteSelf => (StatusCode::BAD_REQUEST, "Cannot delete your own account"),
            AuthApiError::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::User;
    use chrono::Utc;

    #[test]
    fn user_response_from_user_strips_hash() {
        let user = User {
            id: Uuid::new_v4(),
            username: "testuser".to_string(),
            password_hash: "hash123".to_string(),
            role: Role::User,
            created_at: Utc::now(),
        };

        let response = UserResponse::from_user(&user);
        assert_eq!(response.username, "testuser");
        assert_eq!(response.role, Role::User);
    }

    #[test]
    fn auth_api_error_responses() {
        assert_eq!(AuthApiError::InvalidCredentials.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthApiError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthApiError::UserNotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(AuthApiError::UserAlreadyExists.into_response().status(), StatusCode::CONFLICT);
    }
}
