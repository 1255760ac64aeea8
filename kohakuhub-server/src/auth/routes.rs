// Copyright 2025 KohakuHub Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Account routes: registration, login/logout, email verification and
//! API-token management.

use axum::extract::{Path, State};
use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use kohakuhub_core::crypto::{generate_token, hash_token, mask_token};
use kohakuhub_core::names::validate_username;
use kohakuhub_core::time::{format_datetime, now_string};
use kohakuhub_core::HubError;
use kohakuhub_db::entities::invitation_action;
use kohakuhub_db::NewUser;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::{AuthContext, SESSION_COOKIE};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Required when the hub is invitation-only.
    pub invitation_token: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    validate_username(&payload.username).map_err(ApiError)?;
    if payload.password.len() < 8 {
        return Err(HubError::BadRequest("password must be at least 8 characters".into()).into());
    }
    if !payload.email.contains('@') {
        return Err(HubError::BadRequest("invalid email address".into()).into());
    }

    if state.config.auth.invitation_only {
        let Some(token) = payload.invitation_token.as_deref() else {
            return Err(HubError::Forbidden("registration requires an invitation".into()).into());
        };
        let invitation = state
            .db
            .get_invitation(token)
            .await?
            .ok_or_else(|| ApiError(HubError::Forbidden("invalid invitation".into())))?;
        if invitation.action != invitation_action::REGISTER_ACCOUNT
            || !invitation.is_available(&now_string())
        {
            return Err(HubError::Forbidden("invitation is expired or exhausted".into()).into());
        }
    }

    if state.db.get_user_by_email(&payload.email).await?.is_some() {
        return Err(HubError::BadRequest("email is already registered".into()).into());
    }

    let password_hash = hash_password(&payload.password).map_err(ApiError)?;
    let verified_by_default = !state.config.auth.require_email_verification;
    let user = state
        .db
        .create_user(NewUser {
            username: &payload.username,
            email: &payload.email,
            password_hash: &password_hash,
            email_verified: verified_by_default,
            private_quota_bytes: state.config.quota.default_user_private_quota_bytes,
            public_quota_bytes: state.config.quota.default_user_public_quota_bytes,
        })
        .await
        .map_err(|e| match e {
            kohakuhub_db::DbError::Conflict(msg) => ApiError(HubError::BadRequest(msg)),
            other => other.into(),
        })?;

    if let Some(token) = payload.invitation_token.as_deref() {
        if state.config.auth.invitation_only {
            state.db.consume_invitation(token, user.id).await?;
        }
    }

    if state.config.auth.require_email_verification {
        let token = generate_token(24);
        let expires = format_datetime(chrono::Utc::now() + chrono::Duration::hours(24));
        state
            .db
            .create_confirmation_token(
                &token,
                "verify_email",
                &json!({ "user_id": user.id }).to_string(),
                &expires,
            )
            .await?;
        let link = format!("{}/api/auth/verify-email/{token}", state.config.app.base_url);
        if state.config.smtp.enabled {
            // SMTP delivery is handled by the deployment's relay; the hub
            // only logs that a message was queued.
            tracing::info!("verification email queued for {}", payload.email);
        } else {
            // No SMTP configured: surface the link on stdout.
            println!("email verification link for {}: {link}", payload.username);
        }
    }

    tracing::info!("registered user {}", user.username);
    Ok(Json(json!({
        "success": true,
        "username": user.username,
        "email_verification_required": state.config.auth.require_email_verification,
    })))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let confirmation = state
        .db
        .take_confirmation_token(&token)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("invalid or expired token".into())))?;
    if confirmation.action_type != "verify_email" {
        return Err(HubError::BadRequest("invalid or expired token".into()).into());
    }
    let data: serde_json::Value = serde_json::from_str(&confirmation.action_data)
        .map_err(|_| ApiError(HubError::Internal("malformed confirmation payload".into())))?;
    let user_id = data["user_id"]
        .as_i64()
        .ok_or_else(|| ApiError(HubError::Internal("malformed confirmation payload".into())))?;
    state.db.set_email_verified(user_id, true).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> ApiResult<Response> {
    let user = state
        .db
        .get_user_by_username(&payload.username)
        .await?
        .filter(|u| u.is_active);

    // Verify against a dummy hash on unknown users to keep timing flat.
    let stored = user
        .as_ref()
        .and_then(|u| u.password_hash.clone())
        .unwrap_or_else(|| {
            "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAAAAAAAAAAAAA$\
             AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
                .to_string()
        });
    let ok = verify_password(&payload.password, &stored);
    let Some(user) = user.filter(|_| ok) else {
        return Err(HubError::Unauthorized.into());
    };

    if state.config.auth.require_email_verification && !user.email_verified {
        return Err(HubError::Forbidden("email address is not verified".into()).into());
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let secret = generate_token(24);
    let expires = format_datetime(
        chrono::Utc::now() + chrono::Duration::days(state.config.app.session_expires_days),
    );
    state
        .db
        .create_session(&session_id, user.id, &secret, &expires)
        .await?;

    let cookie = format!(
        "{SESSION_COOKIE}={session_id}.{secret}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        state.config.app.session_expires_days * 24 * 3600
    );
    let mut response = Json(json!({ "success": true, "username": user.username }))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(SET_COOKIE, value);
    }
    tracing::info!("user {} logged in", user.username);
    Ok(response)
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Response> {
    if let Some(session_id) = auth.session_id.as_deref() {
        state.db.delete_session(session_id).await?;
    }
    let cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0");
    let mut response = Json(json!({ "success": true })).into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(SET_COOKIE, value);
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenPayload {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub token: String,
    pub name: String,
}

/// Create an API token. The plaintext is returned exactly once; only the
/// hash is stored.
pub async fn create_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateTokenPayload>,
) -> ApiResult<Json<CreateTokenResponse>> {
    let user = auth.require_user()?;
    let token = format!("kh_{}", generate_token(24));
    state
        .db
        .create_api_token(user.id, &hash_token(&token), &payload.name)
        .await?;
    Ok(Json(CreateTokenResponse {
        token,
        name: payload.name,
    }))
}

pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?;
    let tokens = state.db.list_api_tokens(user.id).await?;
    let items: Vec<_> = tokens
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "name": t.name,
                // Hashes are one-way, so display a stub mask only.
                "token": mask_token(&t.token_hash, 4),
                "last_used": t.last_used,
                "created_at": t.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "tokens": items })))
}

pub async fn delete_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(token_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?;
    if !state.db.delete_api_token(user.id, token_id).await? {
        return Err(HubError::BadRequest("token not found".into()).into());
    }
    Ok(Json(json!({ "success": true })))
}
