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

//! Utility routes: version/site identification, YAML validation, name
//! availability and the HF-shaped identity endpoint.
//!
//! `/api/version` is how clients tell this hub apart from the public
//! one, which answers 404 there.

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use kohakuhub_core::names::{is_reserved, normalize_name};
use kohakuhub_core::{HubError, RepoType};

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub const API_NAME: &str = "kohakuhub";
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// GET `/api/version`
pub async fn version(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "api": API_NAME,
        "version": API_VERSION,
        "name": state.config.app.site_name,
    }))
}

/// GET `/api/site-config`
pub async fn site_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "site_name": state.config.app.site_name,
        "invitation_only": state.config.auth.invitation_only,
        "require_email_verification": state.config.auth.require_email_verification,
    }))
}

/// GET `/health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET `/api/whoami-v2`
pub async fn whoami_v2(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?;

    let memberships = state.db.list_user_organizations(user.id).await?;
    let mut orgs = Vec::with_capacity(memberships.len());
    for membership in &memberships {
        let Some(org) = state.db.get_user_by_id(membership.org_id).await? else {
            continue;
        };
        orgs.push(json!({
            "name": org.username,
            "fullname": org.username,
            "roleInOrg": membership.role,
        }));
    }

    Ok(Json(json!({
        "type": "user",
        "id": user.id.to_string(),
        "name": user.username,
        "fullname": user.username,
        "email": user.email,
        "emailVerified": user.email_verified,
        "canPay": false,
        "isPro": false,
        "orgs": orgs,
        "auth": {
            "type": "access_token",
            "accessToken": { "displayName": "Auto-generated token", "role": "write" },
        },
        "site": {
            "name": state.config.app.site_name,
            "api": API_NAME,
            "version": API_VERSION,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct ValidateYamlPayload {
    pub content: String,
    #[serde(default)]
    pub repo_type: Option<String>,
}

/// POST `/api/validate-yaml`
pub async fn validate_yaml(Json(payload): Json<ValidateYamlPayload>) -> Json<serde_json::Value> {
    let valid = serde_yaml::from_str::<serde_yaml::Value>(&payload.content).is_ok();
    Json(json!({ "valid": valid }))
}

#[derive(Debug, Deserialize)]
pub struct CheckNamePayload {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(rename = "type", default)]
    pub repo_type: Option<String>,
}

/// POST `/api/validate/check-name`
///
/// Conflicts are decided on normalized names, so `My-Repo` collides
/// with `my_repo`.
pub async fn check_name(
    State(state): State<AppState>,
    Json(payload): Json<CheckNamePayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = payload.name.trim().to_string();
    let normalized = normalize_name(&name);

    let taken = |conflict: String, message: String| {
        Json(json!({
            "available": false,
            "normalized_name": normalized,
            "conflict_with": conflict,
            "message": message,
        }))
    };

    // Repository name check.
    if let (Some(namespace), Some(repo_type)) = (payload.namespace.as_deref(), payload.repo_type.as_deref()) {
        let repo_type = RepoType::parse(repo_type)
            .ok_or(HubError::InvalidRepoType(repo_type.to_string()))?;
        let existing = state.db.list_repositories(repo_type, Some(namespace), None, 500).await?;
        for repo in &existing {
            if normalize_name(&repo.name) == normalized {
                return Ok(taken(
                    format!("{namespace}/{}", repo.name),
                    format!(
                        "Repository name conflicts with existing repository: {} (case-insensitive)",
                        repo.name
                    ),
                ));
            }
        }
        return Ok(Json(json!({
            "available": true,
            "normalized_name": normalized,
            "message": "Repository name is available",
        })));
    }

    // Username / org name check.
    if is_reserved(&name) {
        return Ok(taken(
            name.clone(),
            format!("Name '{name}' is reserved and cannot be used"),
        ));
    }
    if let Some(existing) = state.db.get_account_by_normalized_name(&normalized).await? {
        let kind = if existing.is_org { "organization" } else { "user" };
        return Ok(taken(
            existing.username.clone(),
            format!(
                "Name conflicts with existing {kind}: {} (case-insensitive)",
                existing.username
            ),
        ));
    }

    Ok(Json(json!({
        "available": true,
        "normalized_name": normalized,
        "message": "Name is available",
    })))
}
