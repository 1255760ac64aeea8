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

//! Source resolution.
//!
//! For a namespace, sources come from three places in order: globals
//! from the environment, globals from the database (namespace ""), then
//! namespace-scoped database rows. Duplicates (by URL) keep the first
//! occurrence; the final list sorts ascending by priority. User-supplied
//! per-URL tokens override admin tokens for this request only.

use std::collections::{BTreeMap, HashSet};

use crate::state::AppState;

/// A fallback source ready to be queried.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub url: String,
    pub name: String,
    pub source_type: String,
    pub priority: i64,
    pub token: Option<String>,
}

/// All enabled sources for `namespace`, with `user_tokens` overlaid.
pub async fn resolve_sources(
    state: &AppState,
    namespace: &str,
    user_tokens: &BTreeMap<String, String>,
) -> Vec<ResolvedSource> {
    if !state.config.fallback.enabled {
        return Vec::new();
    }

    let mut sources: Vec<ResolvedSource> = Vec::new();

    // 1. Globals from the environment.
    for source in &state.config.fallback.sources {
        sources.push(ResolvedSource {
            url: source.url.trim_end_matches('/').to_string(),
            name: source.name.clone(),
            source_type: source.source_type.clone(),
            priority: source.priority,
            token: source.token.clone(),
        });
    }

    // 2. Globals from the database, 3. namespace-scoped rows.
    let mut scopes = vec![String::new()];
    if !namespace.is_empty() {
        scopes.push(namespace.to_string());
    }
    for scope in scopes {
        match state.db.list_enabled_fallback_sources(&scope).await {
            Ok(rows) => {
                for row in rows {
                    let token = row.encrypted_token.as_deref().and_then(|encrypted| {
                        let cipher = state.cipher.as_ref()?;
                        match cipher.decrypt(encrypted) {
                            Ok(token) if !token.is_empty() => Some(token),
                            Ok(_) => None,
                            Err(e) => {
                                tracing::warn!(
                                    "failed to decrypt token for source '{}': {e}",
                                    row.name
                                );
                                None
                            }
                        }
                    });
                    sources.push(ResolvedSource {
                        url: row.url.trim_end_matches('/').to_string(),
                        name: row.name,
                        source_type: row.source_type,
                        priority: row.priority,
                        token,
                    });
                }
            }
            Err(e) => {
                tracing::warn!("failed to load fallback sources for scope '{scope}': {e}");
            }
        }
    }

    // Dedup by URL (first wins) and order by priority.
    let mut seen = HashSet::new();
    sources.retain(|s| seen.insert(s.url.clone()));
    sources.sort_by_key(|s| s.priority);

    // Per-request user token overlay.
    for source in &mut sources {
        if let Some(token) = user_tokens.get(&source.url) {
            source.token = Some(token.clone());
        }
    }

    tracing::debug!(
        "resolved {} fallback source(s) for namespace '{namespace}'",
        sources.len()
    );
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_token_overlay_matches_by_url() {
        let mut sources = vec![
            ResolvedSource {
                url: "https://huggingface.co".into(),
                name: "HF".into(),
                source_type: "huggingface".into(),
                priority: 1,
                token: Some("admin-token".into()),
            },
            ResolvedSource {
                url: "https://peer.example".into(),
                name: "Peer".into(),
                source_type: "kohakuhub".into(),
                priority: 2,
                token: None,
            },
        ];
        let mut user_tokens = BTreeMap::new();
        user_tokens.insert("https://huggingface.co".to_string(), "user-token".to_string());

        for source in &mut sources {
            if let Some(token) = user_tokens.get(&source.url) {
                source.token = Some(token.clone());
            }
        }
        assert_eq!(sources[0].token.as_deref(), Some("user-token"));
        assert_eq!(sources[1].token, None);
    }
}
