//! Authentication handlers: login, logout and self-service profile

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::handlers::{Envelope, MessageResponse};
use crate::AppState;
use sitejo_common::{
    auth::{hash_password, hash_token, verify_password, AuthUser},
    db::{models::User, UserChanges},
    errors::{AppError, Result},
    metrics,
};

/// Login with email, NIM/NIP or display name
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 255))]
    pub identifier: String,

    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: User,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    #[validate(length(max = 20))]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub current_password: String,

    #[validate(length(min = 8, message = "The password must be at least 8 characters"))]
    pub password: String,

    pub password_confirmation: String,
}

/// Issue a bearer token, revoking any the user held before
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    request.validate()?;

    let user = state
        .repo
        .find_user_by_identifier(request.identifier.trim())
        .await?;

    let user = match user {
        Some(user) if verify_password(&request.password, &user.password_hash) => user,
        _ => {
            metrics::record_login(false);
            tracing::warn!(identifier = %request.identifier, "Failed login attempt");
            return Err(AppError::InvalidCredentials);
        }
    };

    let revoked = state.repo.revoke_user_tokens(user.id).await?;

    let issued = state.jwt.issue(user.id, user.role)?;
    state
        .repo
        .store_token(user.id, hash_token(&issued.token), issued.expires_at)
        .await?;

    metrics::record_login(true);
    tracing::info!(user_id = %user.id, role = %user.role, revoked, "User logged in");

    Ok(Json(LoginResponse {
        token: issued.token,
        token_type: "Bearer",
        expires_in: issued.expires_in,
        user,
    }))
}

/// Revoke the token used for this request
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<MessageResponse>> {
    state.repo.revoke_token(&auth.token_hash).await?;
    tracing::info!(user_id = %auth.user.id, "User logged out");

    Ok(Json(MessageResponse {
        message: "Logged out successfully",
    }))
}

/// The authenticated user
pub async fn me(auth: AuthUser) -> Json<User> {
    Json(auth.user)
}

pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<Envelope<User>>> {
    request.validate()?;

    let user = state
        .repo
        .update_user(
            auth.user.id,
            UserChanges {
                name: request.name.map(|n| n.trim().to_string()),
                email: request.email.map(|e| e.trim().to_lowercase()),
                phone: request.phone,
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(Envelope::new("Profile updated successfully", user)))
}

/// Change the password and sign out every session, this one included
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>> {
    request.validate()?;

    if !verify_password(&request.current_password, &auth.user.password_hash) {
        return Err(AppError::invalid_field(
            "current_password",
            "The current password is incorrect",
        ));
    }
    if request.password != request.password_confirmation {
        return Err(AppError::invalid_field(
            "password_confirmation",
            "The password confirmation does not match",
        ));
    }

    let password_hash = hash_password(&request.password)?;
    state
        .repo
        .update_user(
            auth.user.id,
            UserChanges {
                password_hash: Some(password_hash),
                ..Default::default()
            },
        )
        .await?;
    let revoked = state.repo.revoke_user_tokens(auth.user.id).await?;

    tracing::info!(user_id = %auth.user.id, revoked, "Password changed");

    Ok(Json(MessageResponse {
        message: "Password changed successfully, please log in again",
    }))
}
