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

//! Repository routes: create, delete, list, info, tree and commit
//! history.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use kohakuhub_core::names::validate_repo_name;
use kohakuhub_core::{HubError, RepoType};
use kohakuhub_db::{DbError, NewRepository};

use crate::api::repo_path::{load_repo, parse_type};
use crate::auth::permissions::{
    check_namespace_write, check_repo_delete, check_repo_read,
};
use crate::auth::AuthContext;
use crate::commit::reconcile;
use crate::error::{ApiError, ApiResult};
use crate::fallback;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRepoPayload {
    #[serde(rename = "type", default = "default_repo_type")]
    pub repo_type: String,
    pub name: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub private: bool,
}

fn default_repo_type() -> String {
    "model".to_string()
}

/// POST `/api/repos/create`
pub async fn create_repo(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateRepoPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?.clone();
    let repo_type = RepoType::parse(&payload.repo_type)
        .ok_or_else(|| ApiError(HubError::InvalidRepoType(payload.repo_type.clone())))?;
    validate_repo_name(&payload.name).map_err(ApiError)?;

    let namespace = payload
        .organization
        .clone()
        .unwrap_or_else(|| user.username.clone());
    let owner = check_namespace_write(&state, &namespace, &user).await?;

    let quota_default = if owner.is_org {
        state.config.quota.default_org_private_quota_bytes
    } else {
        state.config.quota.default_user_private_quota_bytes
    };

    let repo = state
        .db
        .create_repository(NewRepository {
            repo_type,
            namespace: &namespace,
            name: &payload.name,
            private: payload.private,
            owner_id: owner.id,
            quota_bytes: quota_default,
        })
        .await
        .map_err(|e| match e {
            DbError::Conflict(_) => {
                ApiError(HubError::RepoExists(format!("{namespace}/{}", payload.name)))
            }
            other => other.into(),
        })?;

    // Provision the versioned store behind the metadata row. A failure
    // here rolls the row back so a retry starts clean.
    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    let storage_namespace = state.vos_storage_namespace(&vos_repo);
    let already_provisioned = state.vos.repo_exists(&vos_repo).await.unwrap_or(false);
    if already_provisioned {
        tracing::warn!("versioned store already has {vos_repo}, reusing it");
        return Ok(Json(json!({
            "url": format!("{}/{}/{}", state.config.app.base_url, repo_type.plural(), repo.full_id),
            "endpoint": state.config.app.base_url,
            "id": repo.full_id,
        })));
    }
    if let Err(e) = state
        .vos
        .create_repo(&vos_repo, &storage_namespace, "main")
        .await
    {
        tracing::error!("versioned store provisioning failed for {}: {e}", repo.full_id);
        let _ = state.db.delete_repository(repo.id).await;
        return Err(HubError::Upstream(format!("storage provisioning failed: {e}")).into());
    }

    tracing::info!("created {} repository {}", repo_type, repo.full_id);
    Ok(Json(json!({
        "url": format!("{}/{}/{}", state.config.app.base_url, repo_type.plural(), repo.full_id),
        "endpoint": state.config.app.base_url,
        "id": repo.full_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRepoPayload {
    #[serde(rename = "type", default = "default_repo_type")]
    pub repo_type: String,
    pub name: String,
    #[serde(default)]
    pub organization: Option<String>,
}

/// DELETE `/api/repos/delete`
pub async fn delete_repo(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<DeleteRepoPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = auth.require_user()?.clone();
    let repo_type = RepoType::parse(&payload.repo_type)
        .ok_or_else(|| ApiError(HubError::InvalidRepoType(payload.repo_type.clone())))?;
    let namespace = payload
        .organization
        .clone()
        .unwrap_or_else(|| user.username.clone());

    let repo = state
        .db
        .get_repository(repo_type, &namespace, &payload.name)
        .await?
        .ok_or_else(|| {
            ApiError(HubError::RepoNotFound(format!("{namespace}/{}", payload.name)))
        })?;
    check_repo_delete(&state, &repo, Some(&user)).await?;

    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    if let Err(e) = state.vos.delete_repo(&vos_repo).await {
        tracing::warn!("versioned store deletion failed for {}: {e}", repo.full_id);
    }
    state.db.delete_repository(repo.id).await?;
    // Usage shrinks with the repo.
    crate::quota::recalculate_owner(&state.db, repo.owner_id).await?;
    state
        .fallback_cache
        .invalidate(repo_type, &namespace, &payload.name);

    tracing::info!("deleted repository {}", repo.full_id);
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ListReposParams {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

fn default_list_limit() -> i64 {
    50
}

fn repo_summary(repo: &kohakuhub_db::entities::Repository) -> serde_json::Value {
    json!({
        "id": repo.full_id,
        "author": repo.namespace,
        "private": repo.private,
        "downloads": repo.downloads,
        "likes": repo.likes_count,
        "createdAt": repo.created_at,
        "lastModified": repo.created_at,
    })
}

/// GET `/api/{type}s`
pub async fn list_repos(
    State(state): State<AppState>,
    Path(type_plural): Path<String>,
    Query(params): Query<ListReposParams>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo_type = parse_type(&type_plural)?;
    let limit = params.limit.clamp(1, 500);

    let repos = state
        .db
        .list_repositories(
            repo_type,
            params.author.as_deref(),
            params.search.as_deref(),
            limit,
        )
        .await?;

    // Private repos only for callers who can read them.
    let mut items = Vec::new();
    for repo in &repos {
        if repo.private
            && check_repo_read(&state, repo, auth.user.as_ref())
                .await
                .is_err()
        {
            continue;
        }
        items.push(repo_summary(repo));
    }

    let mut query = String::new();
    if let Some(author) = params.author.as_deref() {
        query = format!("?author={author}");
        if let Some(search) = params.search.as_deref() {
            query.push_str(&format!("&search={search}"));
        }
    } else if let Some(search) = params.search.as_deref() {
        query = format!("?search={search}");
    }
    let merged =
        fallback::proxy::aggregate_repo_lists(&state, repo_type, &query, &auth, items).await;

    Ok(Json(serde_json::Value::Array(merged)))
}

/// GET `/api/{type}s/{namespace}/{name}`
pub async fn repo_info(
    State(state): State<AppState>,
    Path((type_plural, namespace, name)): Path<(String, String, String)>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Response> {
    let repo_type = parse_type(&type_plural)?;
    let Some(repo) = state
        .db
        .get_repository(repo_type, &namespace, &name)
        .await?
    else {
        if state.config.fallback.enabled {
            return fallback::proxy::proxy_repo_info(&state, repo_type, &namespace, &name, &auth)
                .await;
        }
        return Err(HubError::RepoNotFound(format!("{namespace}/{name}")).into());
    };
    check_repo_read(&state, &repo, auth.user.as_ref()).await?;

    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    let sha = state
        .vos
        .get_branch(&vos_repo, "main")
        .await
        .map(|b| b.commit_id)
        .unwrap_or_default();

    let files = state.db.list_live_files(repo.id).await?;
    let siblings: Vec<_> = files
        .iter()
        .map(|f| json!({ "rfilename": f.path_in_repo, "size": f.size }))
        .collect();

    Ok(Json(json!({
        "id": repo.full_id,
        "author": repo.namespace,
        "sha": sha,
        "private": repo.private,
        "downloads": repo.downloads,
        "likes": repo.likes_count,
        "createdAt": repo.created_at,
        "lastModified": repo.created_at,
        "siblings": siblings,
        "usedStorage": repo.used_bytes,
        "_source": "local",
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct TreeParams {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default = "default_tree_amount")]
    pub amount: u32,
}

fn default_tree_amount() -> u32 {
    1000
}

/// GET `/api/{type}s/{ns}/{name}/tree/{revision}`
pub async fn tree_root(
    State(state): State<AppState>,
    Path((type_plural, namespace, name, revision)): Path<(String, String, String, String)>,
    Query(params): Query<TreeParams>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    tree_impl(state, type_plural, namespace, name, revision, String::new(), params, auth).await
}

/// GET `/api/{type}s/{ns}/{name}/tree/{revision}/{path}`
pub async fn tree(
    State(state): State<AppState>,
    Path((type_plural, namespace, name, revision, path)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
    Query(params): Query<TreeParams>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    tree_impl(state, type_plural, namespace, name, revision, path, params, auth).await
}

#[allow(clippy::too_many_arguments)]
async fn tree_impl(
    state: AppState,
    type_plural: String,
    namespace: String,
    name: String,
    revision: String,
    path: String,
    params: TreeParams,
    auth: AuthContext,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_read(&state, &repo, auth.user.as_ref()).await?;
    let repo_type = parse_type(&type_plural)?;

    let mut prefix = path.trim_matches('/').to_string();
    if !prefix.is_empty() {
        prefix.push('/');
    }

    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    let listing = state
        .vos
        .list_objects(
            &vos_repo,
            &revision,
            &prefix,
            params.after.as_deref().unwrap_or(""),
            params.amount.min(1000),
        )
        .await
        .map_err(|e| {
            if e.is_not_found() {
                ApiError(HubError::RevisionNotFound {
                    repo: repo.full_id.clone(),
                    revision: revision.clone(),
                })
            } else {
                e.into()
            }
        })?;

    // Collapse deeper paths into immediate children.
    let mut directories: std::collections::BTreeSet<String> = Default::default();
    let mut files = Vec::new();
    for object in &listing.results {
        let relative = &object.path[prefix.len()..];
        match relative.split_once('/') {
            Some((dir, _)) => {
                directories.insert(format!("{prefix}{dir}"));
            }
            None => {
                let row = state.db.get_live_file(repo.id, &object.path).await?;
                files.push(json!({
                    "type": "file",
                    "path": object.path,
                    "size": object.size_bytes,
                    "oid": row.map(|r| r.sha256).unwrap_or_else(|| object.checksum.trim_matches('"').to_string()),
                }));
            }
        }
    }

    let mut entries: Vec<_> = directories
        .into_iter()
        .map(|d| json!({ "type": "directory", "path": d }))
        .collect();
    entries.extend(files);

    Ok(Json(json!({
        "tree": entries,
        "hasMore": listing.pagination.has_more,
        "nextCursor": if listing.pagination.has_more {
            Some(listing.pagination.next_offset)
        } else {
            None
        },
    })))
}

/// GET `/api/{type}s/{ns}/{name}/refs`
pub async fn list_refs(
    State(state): State<AppState>,
    Path((type_plural, namespace, name)): Path<(String, String, String)>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_read(&state, &repo, auth.user.as_ref()).await?;
    let repo_type = parse_type(&type_plural)?;

    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    let branches = state.vos.list_branches(&vos_repo).await?;
    let items: Vec<_> = branches
        .iter()
        .map(|b| json!({ "name": b.id, "ref": format!("refs/heads/{}", b.id), "targetCommit": b.commit_id }))
        .collect();
    Ok(Json(json!({ "branches": items, "tags": [] })))
}

#[derive(Debug, Deserialize)]
pub struct CreateBranchPayload {
    pub branch: String,
    #[serde(default)]
    pub revision: Option<String>,
}

/// POST `/api/{type}s/{ns}/{name}/branch`
pub async fn create_branch(
    State(state): State<AppState>,
    Path((type_plural, namespace, name)): Path<(String, String, String)>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateBranchPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    crate::auth::permissions::check_repo_write(&state, &repo, auth.user.as_ref()).await?;
    let repo_type = parse_type(&type_plural)?;

    if payload.branch.is_empty() || payload.branch.contains([' ', '~', '^', ':']) {
        return Err(HubError::BadRequest(format!("invalid branch name '{}'", payload.branch)).into());
    }
    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    let source = payload.revision.as_deref().unwrap_or("main");
    state
        .vos
        .create_branch(&vos_repo, &payload.branch, source)
        .await?;
    Ok(Json(json!({ "success": true, "branch": payload.branch })))
}

/// DELETE `/api/{type}s/{ns}/{name}/branch/{branch}`
pub async fn delete_branch(
    State(state): State<AppState>,
    Path((type_plural, namespace, name, branch)): Path<(String, String, String, String)>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    crate::auth::permissions::check_repo_write(&state, &repo, auth.user.as_ref()).await?;
    let repo_type = parse_type(&type_plural)?;

    if branch == "main" {
        return Err(HubError::BadRequest("the default branch cannot be deleted".into()).into());
    }
    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    state.vos.delete_branch(&vos_repo, &branch).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct CommitsParams {
    #[serde(default = "default_commits_limit")]
    pub limit: u32,
    #[serde(default)]
    pub after: Option<String>,
}

fn default_commits_limit() -> u32 {
    20
}

/// GET `/api/{type}s/{ns}/{name}/commits/{branch}`
pub async fn list_commits(
    State(state): State<AppState>,
    Path((type_plural, namespace, name, branch)): Path<(String, String, String, String)>,
    Query(params): Query<CommitsParams>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_read(&state, &repo, auth.user.as_ref()).await?;
    let repo_type = parse_type(&type_plural)?;

    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    let log = state
        .vos
        .log_commits(
            &vos_repo,
            &branch,
            params.limit.min(100),
            params.after.as_deref().unwrap_or(""),
        )
        .await
        .map_err(|e| {
            if e.is_not_found() {
                ApiError(HubError::RevisionNotFound {
                    repo: repo.full_id.clone(),
                    revision: branch.clone(),
                })
            } else {
                e.into()
            }
        })?;

    // Store commits without index rows mean the reconciler has work.
    let mut needs_reconcile = false;
    let mut commits = Vec::with_capacity(log.results.len());
    for commit in &log.results {
        if !state.db.has_commit(repo.id, &commit.id).await? {
            needs_reconcile = true;
        }
        let author = commit
            .metadata
            .as_ref()
            .and_then(|m| m.get("author").cloned())
            .unwrap_or_else(|| commit.committer.clone());
        commits.push(json!({
            "id": commit.id,
            "oid": commit.id,
            "title": commit.message,
            "message": commit.message,
            "date": commit.creation_date,
            "author": author,
            "parents": commit.parents,
        }));
    }

    if needs_reconcile {
        let state = state.clone();
        let repo = repo.clone();
        tokio::spawn(async move {
            if let Err(e) = reconcile::reconcile_repo(&state, &repo).await {
                tracing::error!("background reconcile of {} failed: {e}", repo.full_id);
            }
        });
    }

    Ok(Json(json!({
        "commits": commits,
        "hasMore": log.pagination.has_more,
        "nextCursor": if log.pagination.has_more {
            Some(log.pagination.next_offset)
        } else {
            None
        },
    })))
}
