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

//! Fallback orchestration: walk the source list on a local miss, relay
//! the first useful upstream answer, and remember which source had the
//! repo.

use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use futures::future::join_all;
use serde_json::Value;

use kohakuhub_core::{HubError, RepoType};

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::fallback::cache::CachedSource;
use crate::fallback::client::{fetch, should_try_next, source_headers};
use crate::fallback::sources::{resolve_sources, ResolvedSource};
use crate::state::AppState;

/// Relayed headers; everything else upstream sends stays upstream.
const RELAY_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "location",
    "etag",
    "x-repo-commit",
    "x-linked-size",
    "x-linked-etag",
];

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Per-request upstream token overlay: the user's stored tokens,
/// shadowed by any tokens carried in this request's Authorization
/// header.
async fn user_token_overlay(
    state: &AppState,
    auth: &AuthContext,
) -> std::collections::BTreeMap<String, String> {
    let mut overlay = match auth.user.as_ref() {
        Some(user) => crate::api::external_tokens::stored_tokens_for(state, user.id).await,
        None => Default::default(),
    };
    for (url, token) in &auth.external_tokens {
        overlay.insert(url.clone(), token.clone());
    }
    overlay
}

/// Find the source that has `(repo_type, namespace, name)`, consulting
/// the cache before probing mirrors in priority order.
pub async fn find_source(
    state: &AppState,
    repo_type: RepoType,
    namespace: &str,
    name: &str,
    auth: &AuthContext,
) -> ApiResult<Option<ResolvedSource>> {
    let overlay = user_token_overlay(state, auth).await;
    let sources = resolve_sources(state, namespace, &overlay).await;
    if sources.is_empty() {
        return Ok(None);
    }

    if let Some(cached) = state.fallback_cache.get(repo_type, namespace, name) {
        if !cached.exists {
            return Ok(None);
        }
        if let Some(source) = sources.iter().find(|s| s.url == cached.source_url) {
            return Ok(Some(source.clone()));
        }
        // Cached source is no longer configured; fall through to probing.
    }

    let probe_path = format!("/api/{}/{namespace}/{name}", repo_type.plural());
    for source in &sources {
        let response = match fetch(&state.http, source, &probe_path, repo_type).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("probe of {} failed: {e}, trying next", source.name);
                continue;
            }
        };
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            state.fallback_cache.set(
                repo_type,
                namespace,
                name,
                CachedSource {
                    source_url: source.url.clone(),
                    source_name: source.name.clone(),
                    source_type: source.source_type.clone(),
                    exists: true,
                    checked_at: unix_now(),
                },
            );
            return Ok(Some(source.clone()));
        }
        if !should_try_next(status) {
            tracing::debug!(
                "probe of {} returned {status}, giving up the walk",
                source.name
            );
            break;
        }
    }

    // Remember the negative result too.
    state.fallback_cache.set(
        repo_type,
        namespace,
        name,
        CachedSource {
            source_url: String::new(),
            source_name: String::new(),
            source_type: String::new(),
            exists: false,
            checked_at: unix_now(),
        },
    );
    Ok(None)
}

/// Turn an upstream response into ours, with source decoration.
async fn relay(source: &ResolvedSource, upstream: reqwest::Response) -> ApiResult<Response> {
    let status = upstream.status().as_u16();
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));

    for name in RELAY_HEADERS {
        if let Some(value) = upstream.headers().get(*name) {
            if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
                builder = builder.header(*name, value);
            }
        }
    }
    for (name, value) in source_headers(source, status) {
        if let Ok(value) = HeaderValue::from_str(&value) {
            builder = builder.header(name, value);
        }
    }

    let body = upstream
        .bytes()
        .await
        .map_err(|e| ApiError(HubError::Upstream(format!("reading upstream body: {e}"))))?;
    builder
        .body(axum::body::Body::from(body))
        .map_err(|e| ApiError(HubError::Internal(format!("building relay response: {e}"))))
}

/// Walk the sources with a request path, relaying the first answer that
/// is not a "try next" status. Surfaces the last upstream status when
/// every source fails.
async fn walk_and_relay(
    state: &AppState,
    repo_type: RepoType,
    namespace: &str,
    hub_path: &str,
    auth: &AuthContext,
    preferred: Option<ResolvedSource>,
) -> ApiResult<Response> {
    let overlay = user_token_overlay(state, auth).await;
    let mut sources = resolve_sources(state, namespace, &overlay).await;
    if let Some(preferred) = preferred {
        sources.retain(|s| s.url != preferred.url);
        sources.insert(0, preferred);
    }
    if sources.is_empty() {
        return Err(HubError::RepoNotFound(hub_path.to_string()).into());
    }

    let mut last_status = 404u16;
    for source in &sources {
        let response = match fetch(&state.http, source, hub_path, repo_type).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("fallback fetch via {} failed: {e}", source.name);
                last_status = 504;
                continue;
            }
        };
        let status = response.status().as_u16();
        if !should_try_next(status) {
            return relay(source, response).await;
        }
        last_status = status;
    }

    Err(HubError::Upstream(format!(
        "all fallback sources failed for {hub_path} (last status {last_status})"
    ))
    .into())
}

/// Resolve a file via the mirrors.
pub async fn proxy_resolve(
    state: &AppState,
    repo_type: RepoType,
    namespace: &str,
    name: &str,
    revision: &str,
    path: &str,
    auth: &AuthContext,
) -> ApiResult<Response> {
    let source = find_source(state, repo_type, namespace, name, auth).await?;
    let Some(source) = source else {
        return Err(HubError::RepoNotFound(format!("{namespace}/{name}")).into());
    };
    let hub_path = format!(
        "/{}/{namespace}/{name}/resolve/{revision}/{path}",
        repo_type.plural()
    );
    walk_and_relay(state, repo_type, namespace, &hub_path, auth, Some(source)).await
}

/// Repo info via the mirrors.
pub async fn proxy_repo_info(
    state: &AppState,
    repo_type: RepoType,
    namespace: &str,
    name: &str,
    auth: &AuthContext,
) -> ApiResult<Response> {
    let source = find_source(state, repo_type, namespace, name, auth).await?;
    let Some(source) = source else {
        return Err(HubError::RepoNotFound(format!("{namespace}/{name}")).into());
    };
    let hub_path = format!("/api/{}/{namespace}/{name}", repo_type.plural());
    walk_and_relay(state, repo_type, namespace, &hub_path, auth, Some(source)).await
}

/// Merge upstream repo listings into a local one. Local entries win on
/// `(type, id)` conflicts; every item keeps a `_source` tag.
pub async fn aggregate_repo_lists(
    state: &AppState,
    repo_type: RepoType,
    query: &str,
    auth: &AuthContext,
    local_items: Vec<Value>,
) -> Vec<Value> {
    let mut merged = Vec::new();
    let mut seen_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    for mut item in local_items {
        if let Some(obj) = item.as_object_mut() {
            obj.insert("_source".to_string(), Value::String("local".to_string()));
            if let Some(id) = obj.get("id").and_then(Value::as_str) {
                seen_ids.insert(id.to_string());
            }
        }
        merged.push(item);
    }

    if !state.config.fallback.enabled {
        return merged;
    }

    let overlay = user_token_overlay(state, auth).await;
    let sources = resolve_sources(state, "", &overlay).await;
    let hub_path = format!("/api/{}{query}", repo_type.plural());
    // All sources queried concurrently; failures degrade to local-only.
    let fetches = sources.iter().map(|source| {
        let path = hub_path.clone();
        async move {
            let response = fetch(&state.http, source, &path, repo_type).await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            let items: Vec<Value> = response.json().await.ok()?;
            Some((source.name.clone(), items))
        }
    });
    for result in join_all(fetches).await.into_iter().flatten() {
        let (source_name, items) = result;
        for mut item in items {
            let Some(obj) = item.as_object_mut() else {
                continue;
            };
            let id = obj
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if id.is_empty() || seen_ids.contains(&id) {
                continue;
            }
            seen_ids.insert(id);
            obj.insert("_source".to_string(), Value::String(source_name.clone()));
            merged.push(item);
        }
    }
    merged
}
