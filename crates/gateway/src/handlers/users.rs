//! User administration handlers (admin only)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::handlers::{Envelope, MessageResponse};
use crate::AppState;
use sitejo_common::{
    auth::{hash_password, AuthUser},
    db::{
        models::{User, UserRole},
        NewUser, Page, UserChanges, UserFilter,
    },
    errors::{AppError, Result},
    storage::BlobStore,
};

const ADMIN_ONLY: &[UserRole] = &[UserRole::Admin];

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1, max = 50))]
    pub nim_nip: String,

    pub role: UserRole,

    #[validate(length(max = 20))]
    pub phone: Option<String>,

    #[validate(length(min = 8, message = "The password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    #[validate(length(min = 1, max = 50))]
    pub nim_nip: Option<String>,

    pub role: Option<UserRole>,

    #[validate(length(max = 20))]
    pub phone: Option<String>,

    #[validate(length(min = 8, message = "The password must be at least 8 characters"))]
    pub password: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Page<User>>> {
    auth.require_role(ADMIN_ONLY)?;

    let users = state.repo.list_users(&filter).await?;
    Ok(Json(users))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<Envelope<User>>)> {
    auth.require_role(ADMIN_ONLY)?;
    request.validate()?;

    let user = state
        .repo
        .create_user(NewUser {
            name: request.name.trim().to_string(),
            email: request.email.trim().to_lowercase(),
            nim_nip: request.nim_nip.trim().to_string(),
            role: request.role,
            phone: request.phone,
            password_hash: hash_password(&request.password)?,
        })
        .await?;

    tracing::info!(admin_id = %auth.user.id, user_id = %user.id, "User created by admin");

    Ok((
        StatusCode::CREATED,
        Json(Envelope::new("User created successfully", user)),
    ))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<User>> {
    auth.require_role(ADMIN_ONLY)?;

    let user = state
        .repo
        .find_user_by_id(id)
        .await?
        .ok_or_else(|| AppError::UserNotFound { id: id.to_string() })?;

    Ok(Json(user))
}

/// Partial update; a new password signs the user out everywhere
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<Envelope<User>>> {
    auth.require_role(ADMIN_ONLY)?;
    request.validate()?;

    let password_hash = request
        .password
        .as_deref()
        .map(hash_password)
        .transpose()?;
    let password_changed = password_hash.is_some();

    let user = state
        .repo
        .update_user(
            id,
            UserChanges {
                name: request.name.map(|n| n.trim().to_string()),
                email: request.email.map(|e| e.trim().to_lowercase()),
                nim_nip: request.nim_nip.map(|n| n.trim().to_string()),
                role: request.role,
                phone: request.phone,
                password_hash,
            },
        )
        .await?;

    if password_changed {
        state.repo.revoke_user_tokens(user.id).await?;
    }

    tracing::info!(admin_id = %auth.user.id, user_id = %user.id, "User updated by admin");

    Ok(Json(Envelope::new("User updated successfully", user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>> {
    auth.require_role(ADMIN_ONLY)?;

    if id == auth.user.id {
        return Err(AppError::Validation {
            message: "Cannot delete your own account".to_string(),
            field: None,
        });
    }

    let blob_keys = state.repo.delete_user(id).await?;
    for key in &blob_keys {
        if let Err(e) = state.blobs.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to remove document blob");
        }
    }

    tracing::info!(admin_id = %auth.user.id, user_id = %id, "User deleted by admin");

    Ok(Json(MessageResponse {
        message: "User deleted successfully",
    }))
}
