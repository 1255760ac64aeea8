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

//! The commit engine.
//!
//! Turns a parsed operation batch into one atomic update: plan the index
//! and quota effects, enforce budgets, stage every object on the branch,
//! land a single versioned-store commit, then persist the metadata in
//! one DB transaction.
//!
//! Two commits racing on one (repo, branch) serialize on the advisory
//! lock; if the versioned store still reports non-fast-forward, the plan
//! is rebuilt once from the new tip before giving up with a conflict.
//!
//! Failure ordering matters: nothing observable happens before the
//! versioned-store commit. After it, a DB failure leaves the store ahead
//! of the index; that window is repaired by the reconciler, and the
//! caller is told via `reconcile_pending`.

use std::collections::{HashMap, HashSet};

use sha2::Digest;

use kohakuhub_core::{HubError, RepoType};
use kohakuhub_db::entities::{Repository, User};
use kohakuhub_db::{CommitApply, FileUpsert};
use kohakuhub_storage::StorageError;

use crate::auth::AuthContext;
use crate::commit::ops::{CommitLine, CommitRequest};
use crate::error::{ApiError, ApiResult};
use crate::lfs::{lfs_key, repo_lfs_eligible};
use crate::quota::check_commit_quota;
use crate::state::AppState;

pub struct CommitOutcome {
    pub commit_id: String,
    pub commit_url: String,
    /// True when the store advanced but the index write failed; the
    /// reconciler will repair, the caller sees `X-Reconcile-Pending`.
    pub reconcile_pending: bool,
}

/// One staging action to perform against the stores.
enum StageAction {
    /// Upload decoded bytes to a per-branch staging key, then stage.
    Inline {
        path: String,
        bytes: Vec<u8>,
        sha256: String,
    },
    /// Stage an already-present physical object (canonical LFS key).
    Physical {
        path: String,
        key: String,
        size: i64,
        checksum: String,
    },
    /// Server-side copy within the versioned store.
    Copy {
        src_path: String,
        src_ref: String,
        dst_path: String,
    },
    Delete {
        path: String,
    },
}

struct CommitPlan {
    stages: Vec<StageAction>,
    upserts: Vec<FileUpsert>,
    delta: i64,
    lfs_touches: Vec<(String, i64)>,
}

pub async fn execute_commit(
    state: &AppState,
    repo: &Repository,
    branch: &str,
    auth: &AuthContext,
    request: CommitRequest,
) -> ApiResult<CommitOutcome> {
    let repo_type = RepoType::parse(&repo.repo_type)
        .ok_or_else(|| ApiError(HubError::InvalidRepoType(repo.repo_type.clone())))?;
    let vos_repo = state.vos_name(repo_type, &repo.full_id);

    let owner = state
        .db
        .get_user_by_id(repo.owner_id)
        .await?
        .ok_or_else(|| ApiError(HubError::Internal("repository owner missing".into())))?;

    // Serialize with concurrent commits to the same branch.
    let lock = state.commit_lock(repo.id, branch);
    let _guard = lock.lock().await;

    // Validate the declared parent before doing any work.
    if let Some(parent) = request.header.parent_commit.as_deref() {
        if let Err(e) = state.vos.get_commit(&vos_repo, parent).await {
            if e.is_not_found() {
                return Err(HubError::RevisionNotFound {
                    repo: repo.full_id.clone(),
                    revision: parent.to_string(),
                }
                .into());
            }
            return Err(e.into());
        }
    }

    let message = request.header.summary.clone();
    let description = request.header.description.clone().unwrap_or_default();
    let username = auth
        .user
        .as_ref()
        .map(|u| u.username.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    let mut metadata = HashMap::new();
    metadata.insert("author".to_string(), username.clone());

    // One retry from the fresh tip on non-fast-forward.
    let mut attempt = 0;
    let commit_info = loop {
        let plan = build_plan(state, repo, &request).await?;
        check_commit_quota(&owner, repo, plan.delta)?;

        let staged_keys = stage_all(state, &vos_repo, branch, &plan).await?;

        match state.vos.commit(&vos_repo, branch, &message, &metadata).await {
            Ok(info) => break (info, plan),
            Err(StorageError::Conflict(msg)) => {
                if attempt == 0 {
                    tracing::warn!(
                        "commit to {}/{branch} lost the race, replanning: {msg}",
                        repo.full_id
                    );
                    attempt += 1;
                    continue;
                }
                return Err(HubError::BadRequest(format!(
                    "commit conflict on branch '{branch}': {msg}"
                ))
                .into());
            }
            Err(e) => {
                cleanup_staged(state, &staged_keys).await;
                return Err(HubError::Upstream(format!("versioned store commit failed: {e}"))
                    .into());
            }
        }
    };
    let (commit_info, plan) = commit_info;

    // The store has advanced; persist the index. A failure here is the
    // reconciler's window, not a rollback.
    let apply = CommitApply {
        repository_id: repo.id,
        repo_type: repo.repo_type.clone(),
        branch: branch.to_string(),
        commit_id: commit_info.id.clone(),
        author_id: auth.user.as_ref().map(|u| u.id),
        username,
        message,
        description,
        file_upserts: plan.upserts,
        used_delta: plan.delta,
        owner_id: owner.id,
        owner_private: repo.private,
        lfs_touches: plan.lfs_touches,
    };
    let reconcile_pending = match state.db.apply_commit(apply).await {
        Ok(_) => false,
        Err(e) => {
            tracing::error!(
                "index write failed after store commit {} on {}/{branch}: {e}",
                commit_info.id,
                repo.full_id
            );
            true
        }
    };

    let commit_url = format!(
        "{}/{}/{}/commit/{}",
        state.config.app.base_url,
        repo_type.plural(),
        repo.full_id,
        commit_info.id
    );
    Ok(CommitOutcome {
        commit_id: commit_info.id,
        commit_url,
        reconcile_pending,
    })
}

/// Compute index effects and the quota delta for every operation.
///
/// Usage counts each distinct LFS oid once per repo, so additions only
/// charge oids the repo does not already reference and deletions only
/// credit the last reference.
async fn build_plan(
    state: &AppState,
    repo: &Repository,
    request: &CommitRequest,
) -> ApiResult<CommitPlan> {
    let mut plan = CommitPlan {
        stages: Vec::new(),
        upserts: Vec::new(),
        delta: 0,
        lfs_touches: Vec::new(),
    };
    // Oids charged by earlier operations in this same request.
    let mut counted_oids: HashSet<String> = HashSet::new();
    let bucket = &state.config.s3.bucket;

    for op in &request.operations {
        match op {
            CommitLine::Header(_) => {}
            CommitLine::DeletedFile(d) => {
                plan_delete(state, repo, &d.path, &mut plan).await?;
            }
            CommitLine::DeletedFolder(d) => {
                let mut prefix = d.path.trim_end_matches('/').to_string();
                prefix.push('/');
                let files = state.db.list_live_files_under_prefix(repo.id, &prefix).await?;
                if files.is_empty() {
                    tracing::debug!("deletedFolder '{}' matched nothing", d.path);
                }
                for file in files {
                    plan_delete(state, repo, &file.path_in_repo, &mut plan).await?;
                }
            }
            CommitLine::File(f) => {
                let bytes = f.decode()?;
                let size = bytes.len() as i64;
                if repo_lfs_eligible(state, repo, &f.path, size) {
                    return Err(HubError::BadRequest(format!(
                        "'{}' must be uploaded through LFS (size {size})",
                        f.path
                    ))
                    .into());
                }
                let sha256 = hex::encode(sha2::Sha256::digest(&bytes));
                let old = state.db.get_live_file(repo.id, &f.path).await?;
                plan.delta += size - old.as_ref().map(|o| o.size).unwrap_or(0);
                plan.stages.push(StageAction::Inline {
                    path: f.path.clone(),
                    bytes,
                    sha256: sha256.clone(),
                });
                plan.upserts.push(FileUpsert {
                    path_in_repo: f.path.clone(),
                    sha256,
                    size,
                    lfs: false,
                    is_deleted: false,
                });
            }
            CommitLine::LfsFile(f) => {
                let key = lfs_key(&f.oid);
                let head = state.ros.head(bucket, &key).await?;
                let Some(head) = head else {
                    return Err(HubError::BadRequest(format!(
                        "LFS object {} for '{}' has not been uploaded",
                        f.oid, f.path
                    ))
                    .into());
                };
                if head.size != f.size {
                    return Err(HubError::BadRequest(format!(
                        "LFS object {} size mismatch: declared {}, stored {}",
                        f.oid, f.size, head.size
                    ))
                    .into());
                }

                let old = state.db.get_live_file(repo.id, &f.path).await?;
                if old.as_ref().map(|o| o.sha256.as_str()) != Some(f.oid.as_str()) {
                    // Credit the replaced content.
                    if let Some(old) = &old {
                        plan_release(state, repo, old, &plan.upserts, &mut plan.delta).await?;
                    }
                    // Charge only the first reference in this repo.
                    let already = counted_oids.contains(&f.oid)
                        || state.db.repo_references_sha256(repo.id, &f.oid).await?;
                    if !already {
                        plan.delta += f.size;
                        counted_oids.insert(f.oid.clone());
                    }
                }

                plan.stages.push(StageAction::Physical {
                    path: f.path.clone(),
                    key,
                    size: f.size,
                    checksum: f.oid.clone(),
                });
                plan.upserts.push(FileUpsert {
                    path_in_repo: f.path.clone(),
                    sha256: f.oid.clone(),
                    size: f.size,
                    lfs: true,
                    is_deleted: false,
                });
                plan.lfs_touches.push((f.oid.clone(), f.size));
            }
            CommitLine::CopyFile(c) => {
                let src = state
                    .db
                    .get_live_file(repo.id, &c.src_path)
                    .await?
                    .ok_or_else(|| {
                        ApiError(HubError::EntryNotFound {
                            repo: repo.full_id.clone(),
                            path: c.src_path.clone(),
                        })
                    })?;

                let old = state.db.get_live_file(repo.id, &c.path).await?;
                if old.as_ref().map(|o| o.sha256.as_str()) != Some(src.sha256.as_str()) {
                    if let Some(old) = &old {
                        plan_release(state, repo, old, &plan.upserts, &mut plan.delta).await?;
                    }
                    let dedup = src.lfs
                        && (counted_oids.contains(&src.sha256)
                            || state.db.repo_references_sha256(repo.id, &src.sha256).await?);
                    if !dedup {
                        plan.delta += src.size;
                        if src.lfs {
                            counted_oids.insert(src.sha256.clone());
                        }
                    }
                }

                plan.stages.push(StageAction::Copy {
                    src_path: c.src_path.clone(),
                    src_ref: c.src_revision.clone().unwrap_or_else(|| "main".to_string()),
                    dst_path: c.path.clone(),
                });
                plan.upserts.push(FileUpsert {
                    path_in_repo: c.path.clone(),
                    sha256: src.sha256.clone(),
                    size: src.size,
                    lfs: src.lfs,
                    is_deleted: false,
                });
                if src.lfs {
                    plan.lfs_touches.push((src.sha256.clone(), src.size));
                }
            }
        }
    }

    Ok(plan)
}

async fn plan_delete(
    state: &AppState,
    repo: &Repository,
    path: &str,
    plan: &mut CommitPlan,
) -> ApiResult<()> {
    let Some(existing) = state.db.get_live_file(repo.id, path).await? else {
        tracing::debug!("deletedFile '{path}' not present at tip, skipping");
        return Ok(());
    };
    plan_release(state, repo, &existing, &plan.upserts, &mut plan.delta).await?;
    plan.stages.push(StageAction::Delete {
        path: path.to_string(),
    });
    plan.upserts.push(FileUpsert {
        path_in_repo: path.to_string(),
        sha256: existing.sha256.clone(),
        size: existing.size,
        lfs: existing.lfs,
        is_deleted: true,
    });
    Ok(())
}

/// Credit the bytes of a row leaving the live index, honoring LFS
/// once-per-repo accounting: only the last live reference is credited.
async fn plan_release(
    state: &AppState,
    repo: &Repository,
    row: &kohakuhub_db::entities::RepoFile,
    pending: &[FileUpsert],
    delta: &mut i64,
) -> ApiResult<()> {
    if !row.lfs {
        *delta -= row.size;
        return Ok(());
    }
    // Another live path keeps the oid alive in this repo.
    let live_paths = state
        .db
        .list_live_files(repo.id)
        .await?
        .into_iter()
        .filter(|f| f.sha256 == row.sha256 && f.path_in_repo != row.path_in_repo)
        // Paths this very commit is tombstoning no longer count.
        .filter(|f| {
            !pending
                .iter()
                .any(|u| u.is_deleted && u.path_in_repo == f.path_in_repo)
        })
        .count();
    if live_paths == 0 {
        *delta -= row.size;
    }
    Ok(())
}

/// Perform all staging actions; returns inline staging keys written to
/// the raw store for best-effort cleanup on a later failure.
async fn stage_all(
    state: &AppState,
    vos_repo: &str,
    branch: &str,
    plan: &CommitPlan,
) -> ApiResult<Vec<String>> {
    let bucket = &state.config.s3.bucket;
    let mut staged_keys = Vec::new();

    for action in &plan.stages {
        match action {
            StageAction::Inline { path, bytes, sha256 } => {
                let key = format!("staging/{vos_repo}/{branch}/{sha256}");
                state
                    .ros
                    .put(bucket, &key, bytes::Bytes::from(bytes.clone()))
                    .await?;
                staged_keys.push(key.clone());
                let physical = format!("s3://{bucket}/{key}");
                state
                    .vos
                    .stage_object(vos_repo, branch, path, &physical, bytes.len() as i64, sha256)
                    .await?;
            }
            StageAction::Physical {
                path,
                key,
                size,
                checksum,
            } => {
                let physical = format!("s3://{bucket}/{key}");
                state
                    .vos
                    .stage_object(vos_repo, branch, path, &physical, *size, checksum)
                    .await?;
            }
            StageAction::Copy {
                src_path,
                src_ref,
                dst_path,
            } => {
                state
                    .vos
                    .copy_object(vos_repo, src_ref, src_path, branch, dst_path)
                    .await?;
            }
            StageAction::Delete { path } => {
                state.vos.delete_object(vos_repo, branch, path).await?;
            }
        }
    }

    Ok(staged_keys)
}

/// Best-effort removal of inline staging blobs after a failed commit;
/// anything missed is the reaper's job.
async fn cleanup_staged(state: &AppState, keys: &[String]) {
    let bucket = &state.config.s3.bucket;
    for key in keys {
        if let Err(e) = state.ros.delete(bucket, key).await {
            tracing::warn!("failed to clean staged blob {key}: {e}");
        }
    }
}
