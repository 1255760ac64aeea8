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

//! LFS protocol engine.
//!
//! Batch negotiation per oid: already-present objects get empty actions;
//! small objects get one presigned PUT plus a verify callback; large
//! objects get a multipart plan (part URLs in the action header, the
//! completion endpoint as href). Objects live at the canonical key
//! `lfs/{oid[:2]}/{oid[2:4]}/{oid}` and are shared across repos.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use kohakuhub_core::HubError;
use kohakuhub_db::entities::Repository;
use kohakuhub_storage::MultipartPart;

use crate::api::repo_path::load_repo;
use crate::auth::permissions::{check_repo_read, check_repo_write};
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Single presigned PUT limit; larger objects go multipart.
pub const MAX_SINGLE_PUT_BYTES: i64 = 5 * 1024 * 1024 * 1024;
/// Upper bound per multipart part.
pub const PART_SIZE_BYTES: i64 = 1024 * 1024 * 1024;
const PRESIGN_TTL_SECS: u64 = 3600;

/// Canonical raw-store key for an LFS object.
pub fn lfs_key(oid: &str) -> String {
    format!("lfs/{}/{}/{}", &oid[..2], &oid[2..4], oid)
}

/// LFS routing decision for a file. Threshold 0 sends everything to LFS.
pub fn is_lfs_eligible(threshold: i64, suffix_rules: &[String], path: &str, size: i64) -> bool {
    if size >= threshold {
        return true;
    }
    if suffix_rules.is_empty() {
        return false;
    }
    let mut builder = GlobSetBuilder::new();
    for rule in suffix_rules {
        match Glob::new(rule) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::warn!("ignoring malformed LFS suffix rule '{rule}': {e}"),
        }
    }
    match builder.build() {
        Ok(set) => {
            // Rules are written against the basename or the full path.
            let basename = path.rsplit('/').next().unwrap_or(path);
            set.is_match(path) || set.is_match(basename)
        }
        Err(e) => {
            tracing::warn!("failed to build LFS suffix matcher: {e}");
            false
        }
    }
}

fn effective_threshold(state: &AppState, repo: &Repository) -> i64 {
    state.config.lfs_threshold_for(repo.lfs_threshold_bytes)
}

/// Routing decision for a path in a given repo.
pub fn repo_lfs_eligible(state: &AppState, repo: &Repository, path: &str, size: i64) -> bool {
    is_lfs_eligible(effective_threshold(state, repo), &repo.suffix_rules(), path, size)
}

fn valid_oid(oid: &str) -> bool {
    oid.len() == 64 && oid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

// --- batch ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub operation: String,
    #[serde(default)]
    pub objects: Vec<BatchObject>,
}

#[derive(Debug, Deserialize)]
pub struct BatchObject {
    pub oid: String,
    pub size: i64,
}

#[derive(Debug, Serialize)]
pub struct BatchAction {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<HashMap<String, String>>,
    pub expires_in: u64,
}

/// POST `/{type}s/{ns}/{name}.git/info/lfs/objects/batch`
pub async fn batch(
    State(state): State<AppState>,
    Path((type_plural, namespace, name)): Path<(String, String, String)>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    match request.operation.as_str() {
        "upload" => check_repo_write(&state, &repo, auth.user.as_ref()).await?,
        "download" => check_repo_read(&state, &repo, auth.user.as_ref()).await?,
        other => {
            return Err(HubError::BadRequest(format!("unknown LFS operation '{other}'")).into())
        }
    }

    let bucket = state.config.s3.bucket.clone();
    let mut objects = Vec::with_capacity(request.objects.len());
    for object in &request.objects {
        if !valid_oid(&object.oid) || object.size < 0 {
            objects.push(json!({
                "oid": object.oid,
                "size": object.size,
                "error": { "code": 422, "message": "invalid oid or size" },
            }));
            continue;
        }

        let key = lfs_key(&object.oid);
        if request.operation == "download" {
            match state.ros.head(&bucket, &key).await? {
                Some(_) => {
                    let href = state
                        .ros
                        .presign_get(&bucket, &key, PRESIGN_TTL_SECS, None)
                        .await?;
                    objects.push(json!({
                        "oid": object.oid,
                        "size": object.size,
                        "actions": {
                            "download": BatchAction { href, header: None, expires_in: PRESIGN_TTL_SECS },
                        },
                    }));
                }
                None => objects.push(json!({
                    "oid": object.oid,
                    "size": object.size,
                    "error": { "code": 404, "message": "object not found" },
                })),
            }
            continue;
        }

        // Upload path. Dedup: known in history AND physically present.
        let known = state.db.get_lfs_object(&object.oid).await?.is_some();
        let present = known && state.ros.head(&bucket, &key).await?.is_some();
        if present {
            state.db.touch_lfs_object(&object.oid, object.size).await?;
            objects.push(json!({
                "oid": object.oid,
                "size": object.size,
                // Already stored: nothing for the client to do.
                "actions": {},
            }));
            continue;
        }

        let verify_href = format!(
            "{}/{}/{}/{}.git/info/lfs/verify",
            state.config.app.base_url, type_plural, namespace, repo.name
        );

        if object.size <= MAX_SINGLE_PUT_BYTES {
            let href = state.ros.presign_put(&bucket, &key, PRESIGN_TTL_SECS).await?;
            objects.push(json!({
                "oid": object.oid,
                "size": object.size,
                "actions": {
                    "upload": BatchAction { href, header: None, expires_in: PRESIGN_TTL_SECS },
                    "verify": { "href": verify_href },
                },
            }));
        } else {
            let plan = multipart_plan(&state, &bucket, &key, object, &type_plural, &namespace, &repo)
                .await?;
            objects.push(json!({
                "oid": object.oid,
                "size": object.size,
                "actions": {
                    "upload": plan,
                    "verify": { "href": verify_href },
                },
            }));
        }
    }

    Ok(Json(json!({ "transfer": "basic", "objects": objects })))
}

/// Multipart upload action: numbered part URLs in the header, the
/// completion endpoint as href, chunk size alongside.
async fn multipart_plan(
    state: &AppState,
    bucket: &str,
    key: &str,
    object: &BatchObject,
    type_plural: &str,
    namespace: &str,
    repo: &Repository,
) -> ApiResult<BatchAction> {
    let upload_id = state.ros.multipart_create(bucket, key).await?;
    let part_count = (object.size as u64).div_ceil(PART_SIZE_BYTES as u64) as i64;

    let mut header = HashMap::new();
    header.insert("chunk_size".to_string(), PART_SIZE_BYTES.to_string());
    for part_number in 1..=part_count {
        let url = state
            .ros
            .multipart_presign_part(bucket, key, &upload_id, part_number as i32, PRESIGN_TTL_SECS)
            .await?;
        header.insert(format!("{part_number:05}"), url);
    }

    // Track the pending upload so the completion endpoint and the reaper
    // can find it.
    state
        .db
        .create_staging_upload(&upload_id, repo.id, key, object.size, &object.oid)
        .await?;

    let complete_href = format!(
        "{}/{}/{}/{}.git/info/lfs/complete/{}",
        state.config.app.base_url, type_plural, namespace, repo.name, upload_id
    );
    Ok(BatchAction {
        href: complete_href,
        header: Some(header),
        expires_in: PRESIGN_TTL_SECS,
    })
}

// --- completion and verification --------------------------------------

#[derive(Debug, Deserialize)]
pub struct CompletePayload {
    pub oid: String,
    pub parts: Vec<CompletePart>,
}

#[derive(Debug, Deserialize)]
pub struct CompletePart {
    #[serde(alias = "partNumber")]
    pub part_number: i32,
    pub etag: String,
}

/// POST `/{type}s/{ns}/{name}.git/info/lfs/complete/{upload_id}`
pub async fn complete_multipart(
    State(state): State<AppState>,
    Path((type_plural, namespace, name, upload_id)): Path<(String, String, String, String)>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CompletePayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_write(&state, &repo, auth.user.as_ref()).await?;

    let staging = state
        .db
        .get_staging_upload(&upload_id)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("unknown upload id".into())))?;
    if staging.sha256 != payload.oid {
        return Err(HubError::BadRequest("oid does not match upload".into()).into());
    }

    let parts: Vec<MultipartPart> = payload
        .parts
        .iter()
        .map(|p| MultipartPart {
            part_number: p.part_number,
            etag: p.etag.trim_matches('"').to_string(),
        })
        .collect();

    let bucket = state.config.s3.bucket.clone();
    let key = lfs_key(&payload.oid);
    state
        .ros
        .multipart_complete(&bucket, &key, &upload_id, &parts)
        .await?;
    state.db.delete_staging_upload(&upload_id).await?;

    Ok(Json(json!({ "success": true, "oid": payload.oid })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPayload {
    pub oid: String,
    pub size: i64,
}

/// POST `/{type}s/{ns}/{name}.git/info/lfs/verify`
///
/// Confirms the object landed with the right size and records it in the
/// LFS history.
pub async fn verify(
    State(state): State<AppState>,
    Path((type_plural, namespace, name)): Path<(String, String, String)>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<VerifyPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_write(&state, &repo, auth.user.as_ref()).await?;

    if !valid_oid(&payload.oid) {
        return Err(HubError::BadRequest("invalid oid".into()).into());
    }

    let bucket = state.config.s3.bucket.clone();
    let key = lfs_key(&payload.oid);
    let head = state
        .ros
        .head(&bucket, &key)
        .await?
        .ok_or_else(|| ApiError(HubError::BadRequest("object not uploaded".into())))?;
    if head.size != payload.size {
        return Err(HubError::BadRequest(format!(
            "size mismatch: expected {}, stored {}",
            payload.size, head.size
        ))
        .into());
    }

    state.db.touch_lfs_object(&payload.oid, payload.size).await?;
    tracing::debug!("verified LFS object {} ({} bytes)", payload.oid, payload.size);
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_shape() {
        let oid = "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789";
        assert_eq!(lfs_key(oid), format!("lfs/ab/cd/{oid}"));
    }

    #[test]
    fn oid_validation() {
        assert!(valid_oid(
            "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789"
        ));
        assert!(!valid_oid("short"));
        assert!(!valid_oid(
            "ABCDEF0123456789abcdef0123456789abcdef0123456789abcdef0123456789"
        ));
    }

    #[test]
    fn threshold_zero_forces_lfs() {
        assert!(is_lfs_eligible(0, &[], "README.md", 1));
        assert!(is_lfs_eligible(0, &[], "x", 0));
    }

    #[test]
    fn threshold_routes_by_size() {
        assert!(!is_lfs_eligible(1024, &[], "small.txt", 1023));
        assert!(is_lfs_eligible(1024, &[], "exact.bin", 1024));
        assert!(is_lfs_eligible(1024, &[], "big.bin", 4096));
    }

    #[test]
    fn suffix_rules_match_below_threshold() {
        let rules = vec!["*.safetensors".to_string()];
        assert!(is_lfs_eligible(i64::MAX, &rules, "weights/model.safetensors", 10));
        assert!(!is_lfs_eligible(i64::MAX, &rules, "README.md", 10));
    }

    #[test]
    fn malformed_rules_are_ignored() {
        let rules = vec!["[bad".to_string(), "*.bin".to_string()];
        assert!(is_lfs_eligible(i64::MAX, &rules, "a.bin", 1));
    }

    #[test]
    fn part_count_covers_size() {
        // 2.5 GiB → 3 parts of ≤ 1 GiB.
        let size = 5 * PART_SIZE_BYTES / 2;
        assert_eq!((size as u64).div_ceil(PART_SIZE_BYTES as u64), 3);
    }
}
