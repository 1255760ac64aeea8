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

//! Composite `Authorization` header parsing.
//!
//! The header carries the caller's own token plus optional per-URL tokens
//! for external fallback sources:
//!
//! `Bearer <auth_token>|<url1>,<tok1>|<url2>,<tok2>...`
//!
//! The first `|`-segment may be empty ("only external tokens"). Each
//! following segment is split on the FIRST comma only, since URLs may
//! contain commas in query parameters. Malformed segments are dropped with
//! a warning and the request proceeds.

use std::collections::BTreeMap;

/// Result of parsing an `Authorization` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAuth {
    /// The caller's own token, if any.
    pub token: Option<String>,
    /// Per-URL token overrides for external sources, valid for this
    /// request only.
    pub external_tokens: BTreeMap<String, String>,
}

/// Parse an `Authorization` header value.
pub fn parse_auth_header(header: Option<&str>) -> ParsedAuth {
    let Some(header) = header else {
        return ParsedAuth::default();
    };

    let Some(token_string) = header.strip_prefix("Bearer ") else {
        tracing::debug!("Authorization header does not start with 'Bearer '");
        return ParsedAuth::default();
    };

    if token_string.is_empty() {
        return ParsedAuth::default();
    }

    if !token_string.contains('|') {
        return ParsedAuth {
            token: Some(token_string.to_string()),
            external_tokens: BTreeMap::new(),
        };
    }

    let mut parts = token_string.split('|');
    let token = match parts.next() {
        Some("") | None => None,
        Some(t) => Some(t.to_string()),
    };

    let mut external_tokens = BTreeMap::new();
    for part in parts {
        let Some((url, tok)) = part.split_once(',') else {
            tracing::warn!("Invalid external token segment (missing comma), dropping");
            continue;
        };
        if url.is_empty() {
            tracing::warn!("Invalid external token segment (empty URL), dropping");
            continue;
        }
        // Token may legitimately be empty (explicit "no token for this URL").
        external_tokens.insert(url.to_string(), tok.to_string());
    }

    ParsedAuth {
        token,
        external_tokens,
    }
}

/// Inverse of [`parse_auth_header`], used when forwarding credentials to
/// a peer hub.
pub fn format_auth_header(
    token: Option<&str>,
    external_tokens: &BTreeMap<String, String>,
) -> String {
    let mut parts = vec![token.unwrap_or("").to_string()];
    for (url, tok) in external_tokens {
        parts.push(format!("{url},{tok}"));
    }
    format!("Bearer {}", parts.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bearer_token() {
        let parsed = parse_auth_header(Some("Bearer hf_abc"));
        assert_eq!(parsed.token.as_deref(), Some("hf_abc"));
        assert!(parsed.external_tokens.is_empty());
    }

    #[test]
    fn token_with_external_overrides() {
        let parsed =
            parse_auth_header(Some("Bearer hf_abc|https://huggingface.co,hf_ext|https://peer,p"));
        assert_eq!(parsed.token.as_deref(), Some("hf_abc"));
        assert_eq!(
            parsed.external_tokens.get("https://huggingface.co"),
            Some(&"hf_ext".to_string())
        );
        assert_eq!(
            parsed.external_tokens.get("https://peer"),
            Some(&"p".to_string())
        );
    }

    #[test]
    fn empty_auth_token_with_externals() {
        let parsed = parse_auth_header(Some("Bearer |https://huggingface.co,hf_ext"));
        assert_eq!(parsed.token, None);
        assert_eq!(parsed.external_tokens.len(), 1);
    }

    #[test]
    fn url_with_comma_in_query_keeps_token_intact() {
        let parsed = parse_auth_header(Some("Bearer t|https://x/?a=1,2,tok"));
        // Split on the first comma only: URL is "https://x/?a=1", token "2,tok".
        assert_eq!(
            parsed.external_tokens.get("https://x/?a=1"),
            Some(&"2,tok".to_string())
        );
    }

    #[test]
    fn malformed_segments_are_dropped() {
        let parsed = parse_auth_header(Some("Bearer t|nocomma|,emptyurl|ok.com,tok"));
        assert_eq!(parsed.token.as_deref(), Some("t"));
        assert_eq!(parsed.external_tokens.len(), 1);
        assert_eq!(parsed.external_tokens.get("ok.com"), Some(&"tok".to_string()));
    }

    #[test]
    fn missing_or_non_bearer_header() {
        assert_eq!(parse_auth_header(None), ParsedAuth::default());
        assert_eq!(parse_auth_header(Some("Basic abc")), ParsedAuth::default());
        assert_eq!(parse_auth_header(Some("Bearer ")), ParsedAuth::default());
    }

    #[test]
    fn round_trip_through_formatter() {
        let parsed =
            parse_auth_header(Some("Bearer tok|https://a,1|https://b,2"));
        let formatted = format_auth_header(parsed.token.as_deref(), &parsed.external_tokens);
        assert_eq!(parse_auth_header(Some(&formatted)), parsed);
    }

    #[test]
    fn empty_token_formats_with_leading_pipe() {
        let mut ext = BTreeMap::new();
        ext.insert("https://a".to_string(), "1".to_string());
        assert_eq!(format_auth_header(None, &ext), "Bearer |https://a,1");
    }
}
