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

//! Organization routes. All membership queries go through the explicit
//! association accessors; nothing chases back-references.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use kohakuhub_core::names::validate_username;
use kohakuhub_core::HubError;
use kohakuhub_db::entities::org_role;
use kohakuhub_db::{DbError, NewOrg};

use crate::auth::permissions::check_org_admin;
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrgPayload {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// POST `/api/org/create`
pub async fn create_org(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateOrgPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?.clone();
    validate_username(&payload.name).map_err(ApiError)?;

    let org = state
        .db
        .create_org(NewOrg {
            name: &payload.name,
            description: payload.description.as_deref(),
            private_quota_bytes: state.config.quota.default_org_private_quota_bytes,
            public_quota_bytes: state.config.quota.default_org_public_quota_bytes,
        })
        .await
        .map_err(|e| match e {
            DbError::Conflict(msg) => ApiError(HubError::BadRequest(msg)),
            other => other.into(),
        })?;

    // The creator owns the org.
    state
        .db
        .create_user_organization(user.id, org.id, org_role::SUPER_ADMIN)
        .await?;

    tracing::info!("user {} created organization {}", user.username, org.username);
    Ok(Json(json!({ "success": true, "name": org.username })))
}

/// GET `/api/org/{org_name}`
pub async fn org_info(
    State(state): State<AppState>,
    Path(org_name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let org = state
        .db
        .get_organization(&org_name)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Organization not found".into())))?;
    Ok(Json(json!({
        "name": org.username,
        "description": org.description,
        "created_at": org.created_at,
        "_source": "local",
    })))
}

#[derive(Debug, Deserialize)]
pub struct AddMemberPayload {
    pub username: String,
    pub role: String,
}

/// POST `/api/org/{org_name}/members`
pub async fn add_member(
    State(state): State<AppState>,
    Path(org_name): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<AddMemberPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let current = auth.require_user()?.clone();
    let org = state
        .db
        .get_organization(&org_name)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Organization not found".into())))?;
    check_org_admin(&state, &org, &current).await?;

    if !org_role::is_valid(&payload.role) {
        return Err(HubError::BadRequest(format!("invalid role '{}'", payload.role)).into());
    }
    let user = state
        .db
        .get_user_by_username(&payload.username)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("User not found".into())))?;

    state
        .db
        .create_user_organization(user.id, org.id, &payload.role)
        .await
        .map_err(|e| match e {
            DbError::Conflict(msg) => ApiError(HubError::BadRequest(msg)),
            other => other.into(),
        })?;
    Ok(Json(json!({ "success": true, "message": "Member added successfully" })))
}

/// DELETE `/api/org/{org_name}/members/{username}`
pub async fn remove_member(
    State(state): State<AppState>,
    Path((org_name, username)): Path<(String, String)>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let current = auth.require_user()?.clone();
    let org = state
        .db
        .get_organization(&org_name)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Organization not found".into())))?;
    check_org_admin(&state, &org, &current).await?;

    let user = state
        .db
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("User not found".into())))?;
    if !state.db.delete_user_organization(user.id, org.id).await? {
        return Err(
            HubError::BadRequest("User is not a member of the organization".into()).into(),
        );
    }
    Ok(Json(json!({ "success": true, "message": "Member removed successfully" })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRolePayload {
    pub role: String,
}

/// PUT `/api/org/{org_name}/members/{username}`
pub async fn update_member_role(
    State(state): State<AppState>,
    Path((org_name, username)): Path<(String, String)>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<UpdateRolePayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let current = auth.require_user()?.clone();
    let org = state
        .db
        .get_organization(&org_name)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Organization not found".into())))?;
    check_org_admin(&state, &org, &current).await?;

    if !org_role::is_valid(&payload.role) {
        return Err(HubError::BadRequest(format!("invalid role '{}'", payload.role)).into());
    }
    let user = state
        .db
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("User not found".into())))?;
    state
        .db
        .update_user_organization_role(user.id, org.id, &payload.role)
        .await
        .map_err(|e| match e {
            DbError::NotFound(_) => {
                ApiError(HubError::BadRequest("User is not a member of the organization".into()))
            }
            other => other.into(),
        })?;
    Ok(Json(json!({ "success": true, "message": "Member role updated successfully" })))
}

/// GET `/api/org/{org_name}/members`
pub async fn list_members(
    State(state): State<AppState>,
    Path(org_name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let org = state
        .db
        .get_organization(&org_name)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Organization not found".into())))?;

    let memberships = state.db.list_organization_members(org.id).await?;
    let mut members = Vec::with_capacity(memberships.len());
    for membership in &memberships {
        let Some(user) = state.db.get_user_by_id(membership.user_id).await? else {
            continue;
        };
        members.push(json!({ "user": user.username, "role": membership.role }));
    }
    Ok(Json(json!({ "members": members })))
}

/// GET `/api/org/users/{username}/orgs`
pub async fn list_user_orgs(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = state
        .db
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("User not found".into())))?;

    let memberships = state.db.list_user_organizations(user.id).await?;
    let mut organizations = Vec::with_capacity(memberships.len());
    for membership in &memberships {
        let Some(org) = state.db.get_user_by_id(membership.org_id).await? else {
            continue;
        };
        organizations.push(json!({
            "name": org.username,
            "description": org.description,
            "role": membership.role,
        }));
    }
    Ok(Json(json!({ "organizations": organizations })))
}
