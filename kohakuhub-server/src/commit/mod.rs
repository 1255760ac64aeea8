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

//! Commit subsystem: NDJSON parsing, the atomic engine, and the
//! reconciler for the post-commit index window.

pub mod engine;
pub mod ops;
pub mod reconcile;

use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;

use crate::api::repo_path::load_repo;
use crate::auth::permissions::check_repo_write;
use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

/// POST `/api/{type}s/{namespace}/{name}/commit/{revision}`
///
/// Body is NDJSON; response carries `commitOid`/`commitUrl`, plus
/// `X-Reconcile-Pending: 1` when the index write trails the store.
pub async fn commit_endpoint(
    State(state): State<AppState>,
    Path((type_plural, namespace, name, revision)): Path<(String, String, String, String)>,
    Extension(auth): Extension<AuthContext>,
    body: String,
) -> ApiResult<Response> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_write(&state, &repo, auth.user.as_ref()).await?;

    let request = ops::parse_commit_ndjson(&body)?;
    let outcome = engine::execute_commit(&state, &repo, &revision, &auth, request).await?;

    tracing::info!(
        "commit {} on {}/{revision} by {}",
        outcome.commit_id,
        repo.full_id,
        auth.user.as_ref().map(|u| u.username.as_str()).unwrap_or("anonymous")
    );

    let mut response = Json(json!({
        "success": true,
        "commitOid": outcome.commit_id,
        "commitUrl": outcome.commit_url,
    }))
    .into_response();
    if outcome.reconcile_pending {
        response
            .headers_mut()
            .insert("X-Reconcile-Pending", HeaderValue::from_static("1"));
    }
    Ok(response)
}
