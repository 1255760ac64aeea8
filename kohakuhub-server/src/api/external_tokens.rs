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

//! Per-user external-source tokens: stored encrypted, listed masked,
//! decrypted only when the fallback layer talks to the matching source.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use kohakuhub_core::crypto::mask_token;
use kohakuhub_core::HubError;

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetTokenPayload {
    pub url: String,
    pub token: String,
}

/// PUT `/api/auth/external-tokens`
pub async fn set_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<SetTokenPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?;
    let cipher = state
        .cipher
        .as_ref()
        .ok_or_else(|| ApiError(HubError::Internal("DATABASE_KEY not configured".into())))?;

    let url = payload.url.trim_end_matches('/').to_string();
    if url.is_empty() || !url.starts_with("http") {
        return Err(HubError::BadRequest("invalid source URL".into()).into());
    }
    let encrypted = cipher.encrypt(&payload.token).map_err(ApiError)?;
    state
        .db
        .set_user_external_token(user.id, &url, &encrypted)
        .await?;
    Ok(Json(json!({ "success": true, "url": url })))
}

/// GET `/api/auth/external-tokens`
pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?;
    let rows = state.db.list_user_external_tokens(user.id).await?;

    let mut tokens = Vec::with_capacity(rows.len());
    for row in &rows {
        // Decrypt only to produce the display mask.
        let masked = state
            .cipher
            .as_ref()
            .and_then(|c| c.decrypt(&row.encrypted_token).ok())
            .map(|plain| mask_token(&plain, 4))
            .unwrap_or_else(|| "***".to_string());
        tokens.push(json!({ "url": row.url, "token": masked }));
    }
    Ok(Json(json!({ "tokens": tokens })))
}

/// DELETE `/api/auth/external-tokens/{url}` (URL percent-encoded)
pub async fn delete_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(url): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?;
    if !state.db.delete_user_external_token(user.id, &url).await? {
        return Err(HubError::BadRequest("no token stored for this URL".into()).into());
    }
    Ok(Json(json!({ "success": true })))
}

/// Decrypted per-user tokens as a (url → token) map, merged into the
/// request-scoped overlay by the auth layer's callers.
pub async fn stored_tokens_for(
    state: &AppState,
    user_id: i64,
) -> std::collections::BTreeMap<String, String> {
    let mut map = std::collections::BTreeMap::new();
    let Some(cipher) = state.cipher.as_ref() else {
        return map;
    };
    match state.db.list_user_external_tokens(user_id).await {
        Ok(rows) => {
            for row in rows {
                match cipher.decrypt(&row.encrypted_token) {
                    Ok(token) if !token.is_empty() => {
                        map.insert(row.url, token);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("failed to decrypt stored token: {e}"),
                }
            }
        }
        Err(e) => tracing::warn!("failed to load stored tokens: {e}"),
    }
    map
}
