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

//! Authentication.
//!
//! Two credential kinds resolve to a user in parallel: the session
//! cookie (browser flows) and the API token carried in the composite
//! `Authorization` header (client libraries). The middleware resolves
//! whichever is present and attaches an [`AuthContext`] extension;
//! handlers that require a user call [`AuthContext::require_user`].

pub mod password;
pub mod permissions;
pub mod routes;

use std::collections::BTreeMap;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use kohakuhub_core::crypto::hash_token;
use kohakuhub_core::time::now_string;
use kohakuhub_core::{parse_auth_header, HubError};
use kohakuhub_db::entities::User;

use crate::error::ApiResult;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "kohaku_session";

/// Per-request authentication result.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub user: Option<User>,
    /// The raw API token when one was presented (forwarded to xet).
    pub token: Option<String>,
    /// Per-URL upstream token overrides, valid for this request only.
    pub external_tokens: BTreeMap<String, String>,
    /// Session cookie id when the request came from a browser session.
    pub session_id: Option<String>,
}

impl AuthContext {
    pub fn require_user(&self) -> ApiResult<&User> {
        self.user
            .as_ref()
            .ok_or_else(|| HubError::Unauthorized.into())
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Resolve credentials and attach an [`AuthContext`] to the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let cookie = request
        .headers()
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let context = resolve_auth(&state, header.as_deref(), cookie.as_deref()).await;
    request.extensions_mut().insert(context);
    next.run(request).await
}

async fn resolve_auth(
    state: &AppState,
    auth_header: Option<&str>,
    cookie_header: Option<&str>,
) -> AuthContext {
    let parsed = parse_auth_header(auth_header);
    let mut context = AuthContext {
        user: None,
        token: parsed.token.clone(),
        external_tokens: parsed.external_tokens,
        session_id: None,
    };

    // API token wins when both credentials are present.
    if let Some(token) = parsed.token.as_deref() {
        match lookup_token_user(state, token).await {
            Ok(Some(user)) => {
                context.user = Some(user);
                return context;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("token lookup failed: {e}"),
        }
    }

    if let Some(cookie_header) = cookie_header {
        if let Some((session_id, secret)) = session_from_cookies(cookie_header) {
            match lookup_session_user(state, &session_id, &secret).await {
                Ok(Some(user)) => {
                    context.session_id = Some(session_id);
                    context.user = Some(user);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("session lookup failed: {e}"),
            }
        }
    }

    context
}

async fn lookup_token_user(state: &AppState, token: &str) -> anyhow::Result<Option<User>> {
    let hashed = hash_token(token);
    let Some(row) = state.db.get_api_token_by_hash(&hashed).await? else {
        return Ok(None);
    };
    let Some(user) = state.db.get_user_by_id(row.user_id).await? else {
        return Ok(None);
    };
    if !user.is_active {
        return Ok(None);
    }
    state.db.touch_api_token(row.id).await?;
    Ok(Some(user))
}

async fn lookup_session_user(
    state: &AppState,
    session_id: &str,
    secret: &str,
) -> anyhow::Result<Option<User>> {
    let Some(session) = state.db.get_session(session_id).await? else {
        return Ok(None);
    };
    if session.expires_at <= now_string() {
        return Ok(None);
    }
    if !kohakuhub_core::crypto::constant_time_eq(&session.secret, secret) {
        return Ok(None);
    }
    let Some(user) = state.db.get_user_by_id(session.user_id).await? else {
        return Ok(None);
    };
    if !user.is_active {
        return Ok(None);
    }
    Ok(Some(user))
}

/// Extract `session_id.secret` from the cookie header.
fn session_from_cookies(cookie_header: &str) -> Option<(String, String)> {
    for pair in cookie_header.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        if name == SESSION_COOKIE {
            let (session_id, secret) = value.split_once('.')?;
            if session_id.is_empty() || secret.is_empty() {
                return None;
            }
            return Some((session_id.to_string(), secret.to_string()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_parsing() {
        assert_eq!(
            session_from_cookies("kohaku_session=sid123.sec456"),
            Some(("sid123".into(), "sec456".into()))
        );
        assert_eq!(
            session_from_cookies("other=x; kohaku_session=a.b; more=y"),
            Some(("a".into(), "b".into()))
        );
        assert_eq!(session_from_cookies("kohaku_session=malformed"), None);
        assert_eq!(session_from_cookies("unrelated=1"), None);
    }

    #[test]
    fn require_user_rejects_anonymous() {
        let context = AuthContext::default();
        assert!(context.require_user().is_err());
        assert!(!context.is_authenticated());
    }
}
