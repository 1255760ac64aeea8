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

//! Content-addressed reconstruction for chunk-streaming clients.
//!
//! Files are served as contiguous 64 MiB windows over one presigned URL.
//! Chunk lengths stay below `u32::MAX` so the downstream client can
//! carry counts in 32 bits. Chunk 0 reuses the file's own sha256; chunk
//! i > 0 is `sha256("{file_sha}-chunk{i}")`, deterministic so repeated
//! manifests agree.

use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use serde_json::json;
use sha2::Digest;
use std::collections::HashMap;

use kohakuhub_core::time::unix_timestamp_in_days;
use kohakuhub_core::HubError;

use crate::api::repo_path::load_repo;
use crate::auth::permissions::check_repo_read;
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 64 MiB windows; must stay below u32::MAX.
pub const CHUNK_SIZE_BYTES: i64 = 64 * 1024 * 1024;
const PRESIGN_TTL_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Term {
    pub hash: String,
    pub unpacked_length: i64,
    pub range: ChunkRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchTerm {
    pub range: ChunkRange,
    pub url: String,
    pub url_range: ChunkRange,
}

#[derive(Debug, Serialize)]
pub struct ReconstructionResponse {
    pub offset_into_first_range: i64,
    pub terms: Vec<Term>,
    pub fetch_info: HashMap<String, Vec<FetchTerm>>,
}

/// Deterministic per-chunk hash.
fn chunk_hash(file_sha: &str, index: usize, chunk_count: usize) -> String {
    if chunk_count == 1 || index == 0 {
        file_sha.to_string()
    } else {
        hex::encode(sha2::Sha256::digest(format!("{file_sha}-chunk{index}")))
    }
}

/// Build the manifest for a file of `size` bytes behind `url`.
pub fn build_reconstruction(file_sha: &str, size: i64, url: &str) -> ReconstructionResponse {
    // Empty files still emit one zero-length term.
    let chunk_count = if size == 0 {
        1
    } else {
        (size as u64).div_ceil(CHUNK_SIZE_BYTES as u64) as usize
    };

    let mut terms = Vec::with_capacity(chunk_count);
    let mut fetch_info: HashMap<String, Vec<FetchTerm>> = HashMap::with_capacity(chunk_count);

    for index in 0..chunk_count {
        let chunk_start = index as i64 * CHUNK_SIZE_BYTES;
        let chunk_end = (chunk_start + CHUNK_SIZE_BYTES).min(size);
        let length = chunk_end - chunk_start;
        let hash = chunk_hash(file_sha, index, chunk_count);

        terms.push(Term {
            hash: hash.clone(),
            unpacked_length: length,
            range: ChunkRange {
                start: index as i64,
                end: index as i64 + 1,
            },
        });
        fetch_info.insert(
            hash,
            vec![FetchTerm {
                range: ChunkRange {
                    start: index as i64,
                    end: index as i64 + 1,
                },
                url: url.to_string(),
                // HTTP ranges are inclusive.
                url_range: ChunkRange {
                    start: chunk_start,
                    end: if length > 0 { chunk_end - 1 } else { 0 },
                },
            }],
        );
    }

    ReconstructionResponse {
        offset_into_first_range: 0,
        terms,
        fetch_info,
    }
}

/// GET `/api/cas/reconstructions/{sha256}` (also mounted at
/// `/cas/reconstructions/{sha256}` for direct clients).
pub async fn get_reconstruction(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ReconstructionResponse>> {
    let file = state
        .db
        .find_live_file_by_sha256(&file_id)
        .await?
        .ok_or_else(|| {
            ApiError(HubError::EntryNotFound {
                repo: String::new(),
                path: format!("sha256 {file_id}"),
            })
        })?;
    let repo = state
        .db
        .get_repository_by_id(file.repository_id)
        .await?
        .ok_or_else(|| ApiError(HubError::Internal("file row without repository".into())))?;
    check_repo_read(&state, &repo, auth.user.as_ref()).await?;

    let repo_type = kohakuhub_core::RepoType::parse(&repo.repo_type)
        .ok_or_else(|| ApiError(HubError::InvalidRepoType(repo.repo_type.clone())))?;
    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    let stat = state
        .vos
        .stat_object(&vos_repo, "main", &file.path_in_repo)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                ApiError(HubError::EntryNotFound {
                    repo: repo.full_id.clone(),
                    path: file.path_in_repo.clone(),
                })
            } else {
                e.into()
            }
        })?;

    let (bucket, key) = kohakuhub_storage::parse_s3_uri(&stat.physical_address)?;
    let filename = file.path_in_repo.rsplit('/').next().unwrap_or("file");
    let url = state
        .ros
        .presign_get(&bucket, &key, PRESIGN_TTL_SECS, Some(filename))
        .await?;

    tracing::debug!(
        "reconstruction manifest for {} ({} bytes, {} terms)",
        file.sha256,
        file.size,
        if file.size == 0 { 1 } else { (file.size as u64).div_ceil(CHUNK_SIZE_BYTES as u64) as i64 }
    );
    Ok(Json(build_reconstruction(&file.sha256, file.size, &url)))
}

/// GET `/api/{type}s/{ns}/{name}/xet-read-token/{revision}/{path}`
///
/// Hands the chunk-streaming client its CAS base URL and access token.
/// Body is empty JSON; everything travels in headers.
pub async fn xet_read_token(
    State(state): State<AppState>,
    Path((type_plural, namespace, name, _revision, _path)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Response> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_read(&state, &repo, auth.user.as_ref()).await?;

    let expiration = unix_timestamp_in_days(7);
    let token = auth.token.clone().unwrap_or_default();

    let mut response = Json(json!({})).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&state.config.app.base_url) {
        headers.insert("X-Xet-Cas-Url", value);
    }
    if let Ok(value) = HeaderValue::from_str(&token) {
        headers.insert("X-Xet-Access-Token", value);
    }
    if let Ok(value) = HeaderValue::from_str(&expiration.to_string()) {
        headers.insert("X-Xet-Token-Expiration", value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn single_chunk_uses_file_hash() {
        let manifest = build_reconstruction(SHA, 1000, "https://u");
        assert_eq!(manifest.terms.len(), 1);
        assert_eq!(manifest.terms[0].hash, SHA);
        assert_eq!(manifest.terms[0].unpacked_length, 1000);
        let fetch = &manifest.fetch_info[SHA][0];
        assert_eq!(fetch.url_range, ChunkRange { start: 0, end: 999 });
    }

    #[test]
    fn empty_file_emits_one_zero_length_term() {
        let manifest = build_reconstruction(SHA, 0, "https://u");
        assert_eq!(manifest.terms.len(), 1);
        assert_eq!(manifest.terms[0].unpacked_length, 0);
        assert_eq!(
            manifest.fetch_info[SHA][0].url_range,
            ChunkRange { start: 0, end: 0 }
        );
    }

    #[test]
    fn multi_chunk_manifest_is_contiguous_and_complete() {
        // 130 MiB → 3 chunks.
        let size = 130 * 1024 * 1024;
        let manifest = build_reconstruction(SHA, size, "https://u");
        assert_eq!(manifest.terms.len(), 3);

        // Chunk 0 keeps the file hash; later chunks derive from it.
        assert_eq!(manifest.terms[0].hash, SHA);
        let expected_1 = hex::encode(sha2::Sha256::digest(format!("{SHA}-chunk1")));
        let expected_2 = hex::encode(sha2::Sha256::digest(format!("{SHA}-chunk2")));
        assert_eq!(manifest.terms[1].hash, expected_1);
        assert_eq!(manifest.terms[2].hash, expected_2);

        // Exact inclusive windows.
        let ranges: Vec<_> = manifest
            .terms
            .iter()
            .map(|t| manifest.fetch_info[&t.hash][0].url_range.clone())
            .collect();
        assert_eq!(ranges[0], ChunkRange { start: 0, end: 67_108_863 });
        assert_eq!(
            ranges[1],
            ChunkRange { start: 67_108_864, end: 134_217_727 }
        );
        assert_eq!(
            ranges[2],
            ChunkRange { start: 134_217_728, end: 136_314_879 }
        );

        // Windows cover the file exactly, contiguously.
        let total: i64 = ranges.iter().map(|r| r.end - r.start + 1).sum();
        assert_eq!(total, size);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
        }
        for term in &manifest.terms {
            assert!(term.unpacked_length <= CHUNK_SIZE_BYTES);
        }
    }

    #[test]
    fn sizes_beyond_32_bits_chunk_correctly() {
        let size = 1i64 << 34; // 16 GiB
        let manifest = build_reconstruction(SHA, size, "https://u");
        assert_eq!(manifest.terms.len(), 256);
        let total: i64 = manifest.terms.iter().map(|t| t.unpacked_length).sum();
        assert_eq!(total, size);
    }
}
