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

//! Permission decisions over (user, repo) and (user, org).
//!
//! Read: public repos for everyone; private repos for the owner or any
//! member of the owning org. Write: owner, or org role ≥ member.
//! Delete/settings: owner, or org role ≥ admin.

use kohakuhub_core::HubError;
use kohakuhub_db::entities::{org_role, Repository, User};

use crate::error::ApiResult;
use crate::state::AppState;

async fn owner_role(
    state: &AppState,
    repo_owner_id: i64,
    user: &User,
) -> ApiResult<Option<String>> {
    if user.id == repo_owner_id {
        // Personal repo owned directly by this user.
        return Ok(Some(org_role::SUPER_ADMIN.to_string()));
    }
    let membership = state.db.get_user_organization(user.id, repo_owner_id).await?;
    Ok(membership.map(|m| m.role))
}

/// Hide private repos behind 404, not 403: their existence is itself
/// private.
fn not_found(repo: &Repository) -> HubError {
    HubError::RepoNotFound(repo.full_id.clone())
}

pub async fn check_repo_read(
    state: &AppState,
    repo: &Repository,
    user: Option<&User>,
) -> ApiResult<()> {
    if !repo.private {
        return Ok(());
    }
    let Some(user) = user else {
        return Err(not_found(repo).into());
    };
    match owner_role(state, repo.owner_id, user).await? {
        Some(_) => Ok(()),
        None => Err(not_found(repo).into()),
    }
}

pub async fn check_repo_write(
    state: &AppState,
    repo: &Repository,
    user: Option<&User>,
) -> ApiResult<()> {
    let Some(user) = user else {
        return Err(HubError::Unauthorized.into());
    };
    match owner_role(state, repo.owner_id, user).await? {
        Some(role) if org_role::can_write(&role) => Ok(()),
        Some(_) => Err(HubError::Forbidden(format!(
            "write access to '{}' denied",
            repo.full_id
        ))
        .into()),
        None => {
            if repo.private {
                Err(not_found(repo).into())
            } else {
                Err(HubError::Forbidden(format!(
                    "write access to '{}' denied",
                    repo.full_id
                ))
                .into())
            }
        }
    }
}

pub async fn check_repo_delete(
    state: &AppState,
    repo: &Repository,
    user: Option<&User>,
) -> ApiResult<()> {
    let Some(user) = user else {
        return Err(HubError::Unauthorized.into());
    };
    match owner_role(state, repo.owner_id, user).await? {
        Some(role) if org_role::can_admin(&role) => Ok(()),
        Some(_) => Err(HubError::Forbidden(format!(
            "admin access to '{}' denied",
            repo.full_id
        ))
        .into()),
        None => {
            if repo.private {
                Err(not_found(repo).into())
            } else {
                Err(HubError::Forbidden(format!(
                    "admin access to '{}' denied",
                    repo.full_id
                ))
                .into())
            }
        }
    }
}

/// Org management (add/remove members, update roles): role ≥ admin.
pub async fn check_org_admin(state: &AppState, org: &User, user: &User) -> ApiResult<()> {
    let membership = state.db.get_user_organization(user.id, org.id).await?;
    match membership {
        Some(m) if org_role::can_admin(&m.role) => Ok(()),
        _ => Err(HubError::Forbidden(format!(
            "not authorized to manage organization '{}'",
            org.username
        ))
        .into()),
    }
}

/// Namespace where a new repo will live: the user themselves, or an org
/// they can write to.
pub async fn check_namespace_write(
    state: &AppState,
    namespace: &str,
    user: &User,
) -> ApiResult<User> {
    if namespace == user.username {
        return Ok(user.clone());
    }
    let Some(org) = state.db.get_organization(namespace).await? else {
        return Err(HubError::BadRequest(format!("namespace '{namespace}' not found")).into());
    };
    let membership = state.db.get_user_organization(user.id, org.id).await?;
    match membership {
        Some(m) if org_role::can_write(&m.role) => Ok(org),
        _ => Err(HubError::Forbidden(format!(
            "not authorized to create repositories under '{namespace}'"
        ))
        .into()),
    }
}
