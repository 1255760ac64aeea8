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

//! Settings routes for repositories, users and organizations.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use kohakuhub_core::HubError;
use kohakuhub_db::RepositorySettings;

use crate::api::repo_path::load_repo;
use crate::auth::permissions::{check_org_admin, check_repo_delete};
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RepoSettingsPayload {
    #[serde(default)]
    pub private: Option<bool>,
    /// Nested Option: absent = unchanged, null = clear to unlimited.
    #[serde(default, with = "double_option")]
    pub quota_bytes: Option<Option<i64>>,
    #[serde(default, with = "double_option")]
    pub lfs_threshold_bytes: Option<Option<i64>>,
    #[serde(default, with = "double_option")]
    pub lfs_keep_versions: Option<Option<i64>>,
    #[serde(default)]
    pub lfs_suffix_rules: Option<Vec<String>>,
}

/// Distinguish "field absent" from "field: null".
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<i64>::deserialize(deserializer).map(Some)
    }
}

/// PUT `/api/{type}s/{ns}/{name}/settings`
pub async fn update_repo_settings(
    State(state): State<AppState>,
    Path((type_plural, namespace, name)): Path<(String, String, String)>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<RepoSettingsPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_delete(&state, &repo, auth.user.as_ref()).await?;

    if let Some(Some(threshold)) = payload.lfs_threshold_bytes {
        if threshold < 0 {
            return Err(HubError::BadRequest("lfs_threshold_bytes must be >= 0".into()).into());
        }
    }
    let suffix_rules = match &payload.lfs_suffix_rules {
        Some(rules) => Some(Some(
            serde_json::to_string(rules)
                .map_err(|e| ApiError(HubError::Internal(format!("encoding rules: {e}"))))?,
        )),
        None => None,
    };

    let visibility_changed = payload
        .private
        .map(|private| private != repo.private)
        .unwrap_or(false);

    state
        .db
        .update_repository_settings(
            repo.id,
            RepositorySettings {
                private: payload.private,
                quota_bytes: payload.quota_bytes,
                lfs_threshold_bytes: payload.lfs_threshold_bytes,
                lfs_keep_versions: payload.lfs_keep_versions,
                lfs_suffix_rules: suffix_rules,
            },
        )
        .await?;

    // Flipping visibility moves bytes between the owner's buckets.
    if visibility_changed {
        crate::quota::recalculate_owner(&state.db, repo.owner_id).await?;
    }

    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct AccountSettingsPayload {
    #[serde(default)]
    pub description: Option<String>,
}

/// PUT `/api/users/{username}/settings`
pub async fn update_user_settings(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<AccountSettingsPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?;
    if user.username != username {
        return Err(HubError::Forbidden("cannot edit another user's settings".into()).into());
    }
    if let Some(description) = payload.description.as_deref() {
        state
            .db
            .update_account_description(user.id, Some(description))
            .await?;
    }
    Ok(Json(json!({ "success": true })))
}

/// PUT `/api/org/{org_name}/settings`
pub async fn update_org_settings(
    State(state): State<AppState>,
    Path(org_name): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<AccountSettingsPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?.clone();
    let org = state
        .db
        .get_organization(&org_name)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Organization not found".into())))?;
    check_org_admin(&state, &org, &user).await?;

    if let Some(description) = payload.description.as_deref() {
        state
            .db
            .update_account_description(org.id, Some(description))
            .await?;
    }
    Ok(Json(json!({ "success": true })))
}

/// GET `/api/users/{username}/storage`
pub async fn user_storage(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let caller = auth.require_user()?;
    let account = state
        .db
        .get_account_by_name(&username)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("User not found".into())))?;
    // Own usage, or usage of an org the caller belongs to.
    let allowed = caller.id == account.id
        || state
            .db
            .get_user_organization(caller.id, account.id)
            .await?
            .is_some();
    if !allowed {
        return Err(HubError::Forbidden("not authorized to view this usage".into()).into());
    }

    Ok(Json(json!({
        "private_used_bytes": account.private_used_bytes,
        "private_quota_bytes": account.private_quota_bytes,
        "public_used_bytes": account.public_used_bytes,
        "public_quota_bytes": account.public_quota_bytes,
    })))
}
