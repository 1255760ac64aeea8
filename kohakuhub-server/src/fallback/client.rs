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

//! Upstream HTTP for the fallback layer: URL rewriting per source type
//! and the try-next-source policy.
//!
//! Self-similar peers use our exact URL shape, so paths pass through.
//! HuggingFace is asymmetric: model resolve URLs drop the `/models/`
//! prefix while datasets and spaces keep theirs, and `/api/` paths are
//! identical everywhere.

use kohakuhub_core::RepoType;

use crate::fallback::sources::ResolvedSource;

/// Map a local hub path onto a source's URL space.
pub fn map_url(source: &ResolvedSource, hub_path: &str, repo_type: RepoType) -> String {
    match source.source_type.as_str() {
        "kohakuhub" => format!("{}{hub_path}", source.url),
        _ => {
            // huggingface-shaped
            if hub_path.starts_with("/api/") {
                return format!("{}{hub_path}", source.url);
            }
            if hub_path.contains("/resolve/")
                && repo_type == RepoType::Model
                && hub_path.starts_with("/models/")
            {
                let stripped = hub_path.replacen("/models/", "/", 1);
                return format!("{}{stripped}", source.url);
            }
            format!("{}{hub_path}", source.url)
        }
    }
}

/// Decide whether a response from one source means "try the next one".
///
/// 404/410 (maybe present elsewhere), server errors and timeouts move
/// on; any other 4xx is the client's problem and ends the walk.
pub fn should_try_next(status: u16) -> bool {
    match status {
        404 | 410 => true,
        408 | 504 | 524 => true,
        500..=599 => true,
        200..=299 => false,
        400..=499 => false,
        _ => false,
    }
}

/// Decorations for a response served via a fallback source.
pub fn source_headers(source: &ResolvedSource, status: u16) -> Vec<(&'static str, String)> {
    vec![
        ("X-Source", source.name.clone()),
        ("X-Source-URL", source.url.clone()),
        ("X-Source-Status", status.to_string()),
    ]
}

/// GET an upstream path with the source's token, without following
/// redirects (the caller relays the redirect to its own client).
pub async fn fetch(
    http: &reqwest::Client,
    source: &ResolvedSource,
    hub_path: &str,
    repo_type: RepoType,
) -> Result<reqwest::Response, reqwest::Error> {
    let url = map_url(source, hub_path, repo_type);
    tracing::debug!("fallback GET {url} via {}", source.name);
    let mut request = http.get(&url);
    if let Some(token) = source.token.as_deref() {
        request = request.bearer_auth(token);
    }
    request.send().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hf(url: &str) -> ResolvedSource {
        ResolvedSource {
            url: url.to_string(),
            name: "HF".into(),
            source_type: "huggingface".into(),
            priority: 1,
            token: None,
        }
    }

    fn peer(url: &str) -> ResolvedSource {
        ResolvedSource {
            url: url.to_string(),
            name: "Peer".into(),
            source_type: "kohakuhub".into(),
            priority: 1,
            token: None,
        }
    }

    #[test]
    fn kohakuhub_paths_pass_through() {
        let source = peer("https://peer.example");
        assert_eq!(
            map_url(&source, "/models/org/m/resolve/main/config.json", RepoType::Model),
            "https://peer.example/models/org/m/resolve/main/config.json"
        );
        assert_eq!(
            map_url(&source, "/api/models/org/m", RepoType::Model),
            "https://peer.example/api/models/org/m"
        );
    }

    #[test]
    fn huggingface_model_resolve_drops_prefix() {
        let source = hf("https://huggingface.co");
        assert_eq!(
            map_url(&source, "/models/org/m/resolve/main/config.json", RepoType::Model),
            "https://huggingface.co/org/m/resolve/main/config.json"
        );
    }

    #[test]
    fn huggingface_datasets_and_spaces_keep_prefix() {
        let source = hf("https://huggingface.co");
        assert_eq!(
            map_url(
                &source,
                "/datasets/org/d/resolve/main/data.parquet",
                RepoType::Dataset
            ),
            "https://huggingface.co/datasets/org/d/resolve/main/data.parquet"
        );
        assert_eq!(
            map_url(&source, "/spaces/org/s/resolve/main/app.py", RepoType::Space),
            "https://huggingface.co/spaces/org/s/resolve/main/app.py"
        );
    }

    #[test]
    fn huggingface_api_paths_unchanged() {
        let source = hf("https://huggingface.co");
        assert_eq!(
            map_url(&source, "/api/models/org/m", RepoType::Model),
            "https://huggingface.co/api/models/org/m"
        );
    }

    #[test]
    fn try_next_policy() {
        assert!(should_try_next(404));
        assert!(should_try_next(410));
        assert!(should_try_next(500));
        assert!(should_try_next(503));
        assert!(should_try_next(408));
        assert!(should_try_next(504));

        assert!(!should_try_next(200));
        assert!(!should_try_next(302));
        assert!(!should_try_next(401));
        assert!(!should_try_next(403));
        assert!(!should_try_next(400));
    }
}
