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

//! Admin API.
//!
//! Gated on a process-wide secret carried in `X-Admin-Token`, compared
//! in constant time. When the admin surface is disabled every route
//! answers 503. The SQL console accepts a single SELECT statement only;
//! defense in depth comes from pointing the configured DATABASE_URL at
//! a role with SELECT-only grants.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use kohakuhub_core::crypto::{constant_time_eq, mask_token};
use kohakuhub_core::{HubError, RepoType};
use kohakuhub_db::NewFallbackSource;

use crate::error::ApiError;
use crate::quota;
use crate::state::AppState;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Verify the admin secret. 503 when the surface is disabled, 401 on a
/// wrong or missing token.
fn gate(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if !state.config.app.admin_enabled {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "admin API is disabled").into_response());
    }
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq(presented, &state.config.app.admin_secret_token) {
        return Err(ApiError(HubError::Unauthorized).into_response());
    }
    Ok(())
}

/// GET `/api/admin/users`
pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    let users = state
        .db
        .list_users(500)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    let items: Vec<_> = users
        .iter()
        .map(|u| {
            json!({
                "id": u.id,
                "username": u.username,
                "is_org": u.is_org,
                "email": u.email,
                "email_verified": u.email_verified,
                "is_active": u.is_active,
                "private_used_bytes": u.private_used_bytes,
                "public_used_bytes": u.public_used_bytes,
            })
        })
        .collect();
    Ok(Json(json!({ "users": items })))
}

/// GET `/api/admin/commits`
pub async fn recent_commits(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    let commits = state
        .db
        .list_recent_commits(100)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    let items: Vec<_> = commits
        .iter()
        .map(|c| {
            json!({
                "commit_id": c.commit_id,
                "repository_id": c.repository_id,
                "branch": c.branch,
                "username": c.username,
                "message": c.message,
                "created_at": c.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "commits": items })))
}

#[derive(Debug, Deserialize)]
pub struct UserQuotaPayload {
    #[serde(default)]
    pub private_quota_bytes: Option<i64>,
    #[serde(default)]
    pub public_quota_bytes: Option<i64>,
}

/// PUT `/api/admin/users/{username}/quota` — null clears to unlimited.
pub async fn set_user_quota(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(payload): Json<UserQuotaPayload>,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    let account = state
        .db
        .get_account_by_name(&username)
        .await
        .map_err(|e| ApiError::from(e).into_response())?
        .ok_or_else(|| ApiError(HubError::BadRequest("User not found".into())).into_response())?;
    state
        .db
        .update_account_quota(
            account.id,
            payload.private_quota_bytes,
            payload.public_quota_bytes,
        )
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    Ok(Json(json!({ "success": true, "username": account.username })))
}

/// DELETE `/api/admin/users/{username}` — removes the account and its
/// memberships, sessions and tokens.
pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    let account = state
        .db
        .get_account_by_name(&username)
        .await
        .map_err(|e| ApiError::from(e).into_response())?
        .ok_or_else(|| ApiError(HubError::BadRequest("User not found".into())).into_response())?;

    let owned = state
        .db
        .list_repositories_by_owner(account.id)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    if !owned.is_empty() {
        return Err(ApiError(HubError::BadRequest(format!(
            "account still owns {} repositories",
            owned.len()
        )))
        .into_response());
    }

    state
        .db
        .delete_account(account.id)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    tracing::info!("admin deleted account {}", account.username);
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct RecalculatePayload {
    #[serde(rename = "type", default)]
    pub repo_type: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

/// POST `/api/admin/quota/recalculate`
pub async fn recalculate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RecalculatePayload>,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;

    if let Some(owner) = payload.owner.as_deref() {
        let account = state
            .db
            .get_account_by_name(owner)
            .await
            .map_err(|e| ApiError::from(e).into_response())?
            .ok_or_else(|| {
                ApiError(HubError::BadRequest("owner not found".into())).into_response()
            })?;
        let (private_used, public_used) = quota::recalculate_owner(&state.db, account.id)
            .await
            .map_err(|e| e.into_response())?;
        return Ok(Json(json!({
            "owner": account.username,
            "private_used_bytes": private_used,
            "public_used_bytes": public_used,
        })));
    }

    let (Some(repo_type), Some(namespace), Some(name)) = (
        payload.repo_type.as_deref(),
        payload.namespace.as_deref(),
        payload.name.as_deref(),
    ) else {
        return Err(
            ApiError(HubError::BadRequest("owner or (type, namespace, name) required".into()))
                .into_response(),
        );
    };
    let repo_type = RepoType::parse(repo_type).ok_or_else(|| {
        ApiError(HubError::InvalidRepoType(repo_type.to_string())).into_response()
    })?;
    let repo = state
        .db
        .get_repository(repo_type, namespace, name)
        .await
        .map_err(|e| ApiError::from(e).into_response())?
        .ok_or_else(|| {
            ApiError(HubError::RepoNotFound(format!("{namespace}/{name}"))).into_response()
        })?;
    let total = quota::recalculate_repo(&state.db, repo.id)
        .await
        .map_err(|e| e.into_response())?;
    Ok(Json(json!({ "repository": repo.full_id, "used_bytes": total })))
}

// --- fallback source management ----------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSourcePayload {
    #[serde(default)]
    pub namespace: String,
    pub url: String,
    pub name: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_source_type() -> String {
    "huggingface".to_string()
}

fn default_priority() -> i64 {
    100
}

fn default_enabled() -> bool {
    true
}

/// POST `/api/admin/fallback-sources`
pub async fn create_fallback_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateSourcePayload>,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    if !matches!(payload.source_type.as_str(), "huggingface" | "kohakuhub") {
        return Err(ApiError(HubError::BadRequest(format!(
            "invalid source_type '{}'",
            payload.source_type
        )))
        .into_response());
    }

    let encrypted = match payload.token.as_deref() {
        Some(token) if !token.is_empty() => {
            let cipher = state.cipher.as_ref().ok_or_else(|| {
                ApiError(HubError::Internal("DATABASE_KEY not configured".into())).into_response()
            })?;
            Some(
                cipher
                    .encrypt(token)
                    .map_err(|e| ApiError(e).into_response())?,
            )
        }
        _ => None,
    };

    let source = state
        .db
        .create_fallback_source(NewFallbackSource {
            namespace: &payload.namespace,
            url: payload.url.trim_end_matches('/'),
            name: &payload.name,
            source_type: &payload.source_type,
            priority: payload.priority,
            encrypted_token: encrypted.as_deref(),
            enabled: payload.enabled,
        })
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    Ok(Json(json!({ "id": source.id, "name": source.name })))
}

/// GET `/api/admin/fallback-sources`
pub async fn list_fallback_sources(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    let sources = state
        .db
        .list_all_fallback_sources()
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    let items: Vec<_> = sources
        .iter()
        .map(|s| {
            let token_masked = s
                .encrypted_token
                .as_deref()
                .and_then(|enc| state.cipher.as_ref().and_then(|c| c.decrypt(enc).ok()))
                .map(|plain| mask_token(&plain, 4));
            json!({
                "id": s.id,
                "namespace": s.namespace,
                "url": s.url,
                "name": s.name,
                "source_type": s.source_type,
                "priority": s.priority,
                "enabled": s.enabled,
                "token": token_masked,
            })
        })
        .collect();
    Ok(Json(json!({ "sources": items })))
}

/// DELETE `/api/admin/fallback-sources/{id}`
pub async fn delete_fallback_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    if !state
        .db
        .delete_fallback_source(id)
        .await
        .map_err(|e| ApiError::from(e).into_response())?
    {
        return Err(
            ApiError(HubError::BadRequest("Fallback source not found".into())).into_response(),
        );
    }
    Ok(Json(json!({ "success": true })))
}

/// GET `/api/admin/fallback-cache/stats`
pub async fn fallback_cache_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    let (entries, ttl) = state.fallback_cache.stats();
    Ok(Json(json!({ "size": entries, "ttl_seconds": ttl })))
}

/// POST `/api/admin/fallback-cache/clear`
pub async fn fallback_cache_clear(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    state.fallback_cache.clear();
    Ok(Json(json!({ "success": true })))
}

// --- invitations --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AdminInvitationPayload {
    #[serde(default = "default_invitation_action")]
    pub action: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(default = "default_invitation_hours")]
    pub expires_hours: i64,
    /// None = one-shot, -1 = unlimited, N = up to N uses.
    #[serde(default)]
    pub max_usage: Option<i64>,
}

fn default_invitation_action() -> String {
    kohakuhub_db::entities::invitation_action::REGISTER_ACCOUNT.to_string()
}

fn default_invitation_hours() -> i64 {
    7 * 24
}

/// POST `/api/admin/invitations` — mint registration (or arbitrary)
/// invitations with `created_by = NULL` so they survive admin turnover.
pub async fn create_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AdminInvitationPayload>,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    if let Some(max_usage) = payload.max_usage {
        if max_usage != -1 && max_usage < 1 {
            return Err(ApiError(HubError::BadRequest("max_usage must be -1 or >= 1".into()))
                .into_response());
        }
    }

    let token = kohakuhub_core::crypto::generate_token(24);
    let expires_at = kohakuhub_core::time::format_datetime(
        chrono::Utc::now() + chrono::Duration::hours(payload.expires_hours.clamp(1, 24 * 365)),
    );
    let parameters = payload
        .parameters
        .unwrap_or_else(|| serde_json::json!({}))
        .to_string();
    let invitation = state
        .db
        .create_invitation(kohakuhub_db::NewInvitation {
            token: &token,
            action: &payload.action,
            parameters: &parameters,
            created_by: None,
            expires_at: &expires_at,
            max_usage: payload.max_usage,
        })
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    Ok(Json(json!({
        "token": invitation.token,
        "action": invitation.action,
        "expires_at": invitation.expires_at,
        "max_usage": invitation.max_usage,
    })))
}

/// GET `/api/admin/invitations`
pub async fn list_invitations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    let invitations = state
        .db
        .list_invitations(500)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    let items: Vec<_> = invitations
        .iter()
        .map(|i| {
            json!({
                "token": i.token,
                "action": i.action,
                "parameters": serde_json::from_str::<serde_json::Value>(&i.parameters)
                    .unwrap_or(serde_json::Value::Null),
                "created_by": i.created_by,
                "expires_at": i.expires_at,
                "max_usage": i.max_usage,
                "usage_count": i.usage_count,
                "used_at": i.used_at,
            })
        })
        .collect();
    Ok(Json(json!({ "invitations": items })))
}

/// DELETE `/api/admin/invitations/{token}`
pub async fn delete_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    if !state
        .db
        .delete_invitation(&token)
        .await
        .map_err(|e| ApiError::from(e).into_response())?
    {
        return Err(
            ApiError(HubError::BadRequest("Invitation not found".into())).into_response(),
        );
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSourcePayload {
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// PATCH `/api/admin/fallback-sources/{id}`
pub async fn update_fallback_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateSourcePayload>,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;

    let encrypted = match payload.token.as_deref() {
        Some("") => Some(None),
        Some(token) => {
            let cipher = state.cipher.as_ref().ok_or_else(|| {
                ApiError(HubError::Internal("DATABASE_KEY not configured".into())).into_response()
            })?;
            Some(Some(
                cipher
                    .encrypt(token)
                    .map_err(|e| ApiError(e).into_response())?,
            ))
        }
        None => None,
    };
    let encrypted_ref = encrypted.as_ref().map(|o| o.as_deref());

    state
        .db
        .update_fallback_source(id, payload.priority, encrypted_ref, payload.enabled)
        .await
        .map_err(|e| match e {
            kohakuhub_db::DbError::NotFound(_) => {
                ApiError(HubError::BadRequest("Fallback source not found".into())).into_response()
            }
            other => ApiError::from(other).into_response(),
        })?;
    Ok(Json(json!({ "success": true })))
}

// --- read-only SQL console ---------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SqlQueryParams {
    pub query: String,
    #[serde(default = "default_sql_limit")]
    pub limit: usize,
}

fn default_sql_limit() -> usize {
    200
}

/// A statement is acceptable iff it is a single SELECT with no write
/// verbs anywhere. This is a guard rail, not a sandbox; the DB role is
/// the real boundary.
pub fn is_read_only_select(query: &str) -> bool {
    let trimmed = query.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() || trimmed.contains(';') {
        return false;
    }
    let lower = trimmed.to_lowercase();
    if !lower.starts_with("select") {
        return false;
    }
    const DENIED: &[&str] = &[
        "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
        "attach", "pragma", "vacuum", "replace", "into outfile",
    ];
    !DENIED.iter().any(|verb| {
        lower
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|word| word == *verb)
    })
}

/// GET `/api/admin/query?query=SELECT ...`
pub async fn sql_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SqlQueryParams>,
) -> Result<Json<serde_json::Value>, Response> {
    gate(&state, &headers)?;
    if !is_read_only_select(&params.query) {
        return Err(ApiError(HubError::BadRequest(
            "only a single SELECT statement is allowed".into(),
        ))
        .into_response());
    }
    let rows = state
        .db
        .raw_select(&params.query, params.limit.min(1000))
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    let count = rows.len();
    Ok(Json(json!({ "rows": rows, "count": count })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_denylist() {
        assert!(is_read_only_select("SELECT * FROM repository"));
        assert!(is_read_only_select("select count(*) from user_account;"));
        // Column names containing verbs are fine.
        assert!(is_read_only_select(
            "SELECT created_at, updated_at FROM repo_file"
        ));

        assert!(!is_read_only_select("DELETE FROM repository"));
        assert!(!is_read_only_select("SELECT 1; DROP TABLE repository"));
        assert!(!is_read_only_select(
            "select * from x where id in (select id from y); delete from x"
        ));
        assert!(!is_read_only_select("UPDATE user_account SET is_active=0"));
        assert!(!is_read_only_select("PRAGMA table_info(repository)"));
        assert!(!is_read_only_select(""));
    }

    #[test]
    fn nested_write_verbs_are_denied() {
        assert!(!is_read_only_select(
            "SELECT * FROM repository WHERE name = 'x' UNION SELECT 1 FROM y; DELETE FROM z"
        ));
        assert!(!is_read_only_select("select delete from x"));
    }
}
