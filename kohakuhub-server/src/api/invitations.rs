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

//! Invitation routes: org admins mint `join_org` invitations; accepting
//! one adds the caller with the invitation's role.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use kohakuhub_core::crypto::generate_token;
use kohakuhub_core::time::format_datetime;
use kohakuhub_core::HubError;
use kohakuhub_db::entities::{invitation_action, org_role};
use kohakuhub_db::{DbError, NewInvitation};

use crate::auth::permissions::check_org_admin;
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateInvitationPayload {
    pub org: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_expires_hours")]
    pub expires_hours: i64,
    /// None = one-shot, -1 = unlimited, N = up to N uses.
    #[serde(default)]
    pub max_usage: Option<i64>,
}

fn default_role() -> String {
    org_role::MEMBER.to_string()
}

fn default_expires_hours() -> i64 {
    72
}

/// POST `/api/invitations/create`
pub async fn create_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateInvitationPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?.clone();
    let org = state
        .db
        .get_organization(&payload.org)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Organization not found".into())))?;
    check_org_admin(&state, &org, &user).await?;

    if !org_role::is_valid(&payload.role) || payload.role == org_role::SUPER_ADMIN {
        return Err(HubError::BadRequest(format!("invalid role '{}'", payload.role)).into());
    }
    if let Some(max_usage) = payload.max_usage {
        if max_usage != -1 && max_usage < 1 {
            return Err(HubError::BadRequest("max_usage must be -1 or >= 1".into()).into());
        }
    }

    let token = generate_token(24);
    let expires_at = format_datetime(
        chrono::Utc::now() + chrono::Duration::hours(payload.expires_hours.clamp(1, 24 * 90)),
    );
    let parameters = json!({ "org": org.username, "role": payload.role }).to_string();
    let invitation = state
        .db
        .create_invitation(NewInvitation {
            token: &token,
            action: invitation_action::JOIN_ORG,
            parameters: &parameters,
            created_by: Some(user.id),
            expires_at: &expires_at,
            max_usage: payload.max_usage,
        })
        .await?;

    Ok(Json(json!({
        "token": invitation.token,
        "action": invitation.action,
        "expires_at": invitation.expires_at,
        "max_usage": invitation.max_usage,
    })))
}

/// POST `/api/invitations/{token}/accept`
pub async fn accept_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?.clone();
    let invitation = state
        .db
        .get_invitation(&token)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Invitation not found".into())))?;
    if invitation.action != invitation_action::JOIN_ORG {
        return Err(HubError::BadRequest("invitation cannot be accepted here".into()).into());
    }

    let parameters: serde_json::Value = serde_json::from_str(&invitation.parameters)
        .map_err(|_| ApiError(HubError::Internal("Invalid invitation data".into())))?;
    let org_name = parameters["org"]
        .as_str()
        .ok_or_else(|| ApiError(HubError::Internal("Invalid invitation data".into())))?;
    let role = parameters["role"].as_str().unwrap_or(org_role::MEMBER);

    let org = state
        .db
        .get_organization(org_name)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Organization not found".into())))?;

    // Consume first so a revoked/exhausted invitation cannot add members.
    state
        .db
        .consume_invitation(&token, user.id)
        .await
        .map_err(|e| match e {
            DbError::Conflict(msg) => ApiError(HubError::Forbidden(msg)),
            other => other.into(),
        })?;

    match state.db.create_user_organization(user.id, org.id, role).await {
        Ok(_) => {}
        Err(DbError::Conflict(_)) => {
            // Already a member: the invitation was still consumed, which
            // matches one-shot semantics.
        }
        Err(other) => return Err(other.into()),
    }

    Ok(Json(json!({
        "success": true,
        "organization": org.username,
        "role": role,
    })))
}

/// GET `/api/invitations` (own invitations)
pub async fn list_invitations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?;
    let invitations = state.db.list_invitations(500).await?;
    let items: Vec<_> = invitations
        .iter()
        .filter(|i| i.created_by == Some(user.id))
        .map(|i| {
            json!({
                "token": i.token,
                "action": i.action,
                "expires_at": i.expires_at,
                "max_usage": i.max_usage,
                "usage_count": i.usage_count,
            })
        })
        .collect();
    Ok(Json(json!({ "invitations": items })))
}

/// DELETE `/api/invitations/{token}`
pub async fn delete_invitation(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?;
    let invitation = state
        .db
        .get_invitation(&token)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("Invitation not found".into())))?;
    if invitation.created_by != Some(user.id) {
        return Err(HubError::Forbidden("not your invitation".into()).into());
    }
    state.db.delete_invitation(&token).await?;
    Ok(Json(json!({ "success": true })))
}
