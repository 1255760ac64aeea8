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

//! Resolve/download path.
//!
//! `GET /{type}s/{ns}/{name}/resolve/{revision}/{path}` answers with a
//! 302 to a presigned URL; the stat already binds a physical address, so
//! a branch advancing mid-request cannot tear the download. `HEAD` gets
//! the same headers without a body. Local misses fall through to the
//! fallback proxy when enabled.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Extension;

use kohakuhub_core::time::now_date_string;
use kohakuhub_core::HubError;
use kohakuhub_db::entities::Repository;

use crate::api::repo_path::parse_type;
use crate::auth::permissions::check_repo_read;
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::fallback;
use crate::state::AppState;

const PRESIGN_TTL_SECS: u64 = 3600;

pub async fn resolve(
    State(state): State<AppState>,
    Path((type_plural, namespace, name, revision, path)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let repo_type = parse_type(&type_plural)?;
    let path = path.trim_start_matches('/').to_string();

    let Some(repo) = state
        .db
        .get_repository(repo_type, &namespace, &name)
        .await?
    else {
        // Not ours: consult the mirrors.
        if state.config.fallback.enabled {
            return fallback::proxy::proxy_resolve(
                &state, repo_type, &namespace, &name, &revision, &path, &auth,
            )
            .await;
        }
        return Err(HubError::RepoNotFound(format!("{namespace}/{name}")).into());
    };
    check_repo_read(&state, &repo, auth.user.as_ref()).await?;

    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    let stat = match state.vos.stat_object(&vos_repo, &revision, &path).await {
        Ok(stat) => stat,
        Err(e) if e.is_not_found() => {
            return Err(entry_or_revision_error(&state, &vos_repo, &repo, &revision, &path).await);
        }
        Err(e) => return Err(e.into()),
    };

    let (bucket, key) = kohakuhub_storage::parse_s3_uri(&stat.physical_address)?;
    let filename = path.rsplit('/').next().unwrap_or(&path);
    let url = state
        .ros
        .presign_get(&bucket, &key, PRESIGN_TTL_SECS, Some(filename))
        .await?;

    record_download(&state, &repo, &auth, &headers).await;

    // The index row carries the content sha; the store checksum may be
    // an etag.
    let file_row = state.db.get_live_file(repo.id, &path).await?;
    let etag = file_row
        .as_ref()
        .map(|f| f.sha256.clone())
        .unwrap_or_else(|| stat.checksum.trim_matches('"').to_string());
    let commit_id = resolve_commit_id(&state, &vos_repo, &revision).await;

    let mut response = Response::new(axum::body::Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&url) {
        response_headers.insert(axum::http::header::LOCATION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&commit_id) {
        response_headers.insert("X-Repo-Commit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
        response_headers.insert(axum::http::header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&stat.size_bytes.to_string()) {
        response_headers.insert(axum::http::header::CONTENT_LENGTH, value);
    }
    if file_row.as_ref().map(|f| f.lfs).unwrap_or(false) {
        if let Ok(value) = HeaderValue::from_str(&stat.size_bytes.to_string()) {
            response_headers.insert("X-Linked-Size", value);
        }
        if let Ok(value) = HeaderValue::from_str(&etag) {
            response_headers.insert("X-Linked-Etag", value);
        }
    }
    Ok(response)
}

/// Decide between RevisionNotFound and EntryNotFound after a stat miss.
async fn entry_or_revision_error(
    state: &AppState,
    vos_repo: &str,
    repo: &Repository,
    revision: &str,
    path: &str,
) -> ApiError {
    let revision_exists = state.vos.get_branch(vos_repo, revision).await.is_ok()
        || state.vos.get_commit(vos_repo, revision).await.is_ok();
    if revision_exists {
        ApiError(HubError::EntryNotFound {
            repo: repo.full_id.clone(),
            path: path.to_string(),
        })
    } else {
        ApiError(HubError::RevisionNotFound {
            repo: repo.full_id.clone(),
            revision: revision.to_string(),
        })
    }
}

/// Branch tip commit id for a branch revision; commit-ish revisions are
/// already ids.
async fn resolve_commit_id(state: &AppState, vos_repo: &str, revision: &str) -> String {
    match state.vos.get_branch(vos_repo, revision).await {
        Ok(branch) => branch.commit_id,
        Err(_) => revision.to_string(),
    }
}

/// Count the download: the repo's lifetime counter always, the daily
/// session counter once per (repo, session-or-ip, UTC day).
pub(crate) async fn record_download(
    state: &AppState,
    repo: &Repository,
    auth: &AuthContext,
    headers: &HeaderMap,
) {
    let session_key = auth
        .session_id
        .clone()
        .or_else(|| auth.token.clone())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        })
        .unwrap_or_else(|| "anonymous".to_string());

    let date = now_date_string();
    let dedup_key = format!("{}:{}:{}", repo.id, session_key, date);
    let new_session = state.download_dedup.get(&dedup_key).is_none();
    if new_session {
        state.download_dedup.insert(dedup_key, ());
    }

    if let Err(e) = state
        .db
        .record_download(repo.id, &date, new_session, auth.is_authenticated())
        .await
    {
        tracing::warn!("failed to record download for {}: {e}", repo.full_id);
    }
    if let Err(e) = state.db.increment_repo_downloads(repo.id).await {
        tracing::warn!("failed to bump download counter for {}: {e}", repo.full_id);
    }
}
