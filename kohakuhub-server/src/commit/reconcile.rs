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

//! Reconciler for the commit engine's only partial-failure window.
//!
//! A versioned-store commit is durable; if the follow-up DB transaction
//! failed, the store is ahead of the index. Recovery re-derives the file
//! index from the store listing, recomputes usage, and inserts the
//! missing commit rows. Store commits are never rolled back.

use std::collections::HashSet;

use kohakuhub_core::RepoType;
use kohakuhub_db::entities::Repository;
use kohakuhub_db::CommitApply;

use crate::quota;
use crate::state::AppState;

const DEFAULT_BRANCH: &str = "main";
const LOG_SCAN_DEPTH: u32 = 50;

/// True when the newest store commits all have index rows.
pub async fn is_consistent(state: &AppState, repo: &Repository) -> anyhow::Result<bool> {
    let repo_type = RepoType::parse(&repo.repo_type)
        .ok_or_else(|| anyhow::anyhow!("bad repo type {}", repo.repo_type))?;
    let vos_repo = state.vos_name(repo_type, &repo.full_id);
    let log = state
        .vos
        .log_commits(&vos_repo, DEFAULT_BRANCH, LOG_SCAN_DEPTH, "")
        .await?;
    for commit in &log.results {
        if !state.db.has_commit(repo.id, &commit.id).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Repair one repository. Idempotent: running it on a consistent repo
/// changes nothing.
pub async fn reconcile_repo(state: &AppState, repo: &Repository) -> anyhow::Result<usize> {
    let repo_type = RepoType::parse(&repo.repo_type)
        .ok_or_else(|| anyhow::anyhow!("bad repo type {}", repo.repo_type))?;
    let vos_repo = state.vos_name(repo_type, &repo.full_id);

    let log = match state
        .vos
        .log_commits(&vos_repo, DEFAULT_BRANCH, LOG_SCAN_DEPTH, "")
        .await
    {
        Ok(log) => log,
        Err(e) if e.is_not_found() => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    // Missing rows, oldest first so history lands in order.
    let mut missing = Vec::new();
    for commit in &log.results {
        if !state.db.has_commit(repo.id, &commit.id).await? {
            missing.push(commit.clone());
        }
    }
    if missing.is_empty() {
        return Ok(0);
    }
    missing.reverse();
    let repaired = missing.len();

    tracing::warn!(
        "reconciling {}: {} store commit(s) missing from the index",
        repo.full_id,
        repaired
    );

    // Re-derive the live file set from the branch tip.
    let mut live_paths: HashSet<String> = HashSet::new();
    let mut after = String::new();
    loop {
        let page = state
            .vos
            .list_objects(&vos_repo, DEFAULT_BRANCH, "", &after, 1000)
            .await?;
        for object in &page.results {
            live_paths.insert(object.path.clone());
            let existing = state.db.get_file(repo.id, &object.path).await?;
            let unchanged = existing
                .as_ref()
                .map(|f| !f.is_deleted && f.size == object.size_bytes)
                .unwrap_or(false);
            if !unchanged {
                // The store checksum is not necessarily a sha256; keep
                // the previous hash when sizes agree, else record the
                // store checksum until the next commit refreshes it.
                let sha = existing
                    .as_ref()
                    .filter(|f| f.size == object.size_bytes)
                    .map(|f| f.sha256.clone())
                    .unwrap_or_else(|| object.checksum.trim_matches('"').to_string());
                let lfs = existing.as_ref().map(|f| f.lfs).unwrap_or(false);
                state
                    .db
                    .upsert_file(repo.id, &object.path, &sha, object.size_bytes, lfs, false)
                    .await?;
            }
        }
        if !page.pagination.has_more {
            break;
        }
        after = page.pagination.next_offset;
    }

    // Tombstone rows the store no longer has.
    for file in state.db.list_live_files(repo.id).await? {
        if !live_paths.contains(&file.path_in_repo) {
            state
                .db
                .upsert_file(
                    repo.id,
                    &file.path_in_repo,
                    &file.sha256,
                    file.size,
                    file.lfs,
                    true,
                )
                .await?;
        }
    }

    // Insert the missing commit rows (no usage delta: recalculation
    // below rebuilds totals from the ground truth).
    for commit in &missing {
        let username = commit
            .metadata
            .as_ref()
            .and_then(|m| m.get("author").cloned())
            .unwrap_or_else(|| commit.committer.clone());
        let apply = CommitApply {
            repository_id: repo.id,
            repo_type: repo.repo_type.clone(),
            branch: DEFAULT_BRANCH.to_string(),
            commit_id: commit.id.clone(),
            author_id: None,
            username,
            message: commit.message.clone(),
            description: String::new(),
            file_upserts: Vec::new(),
            used_delta: 0,
            owner_id: repo.owner_id,
            owner_private: repo.private,
            lfs_touches: Vec::new(),
        };
        if let Err(e) = state.db.apply_commit(apply).await {
            tracing::error!("reconcile: failed to insert commit {}: {e}", commit.id);
        }
    }

    quota::recalculate_owner(&state.db, repo.owner_id)
        .await
        .map_err(|e| anyhow::anyhow!("usage recalculation failed: {:?}", e.0))?;

    Ok(repaired)
}
