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

//! Background tasks, spawned at startup and stopped by a shared
//! shutdown signal: session TTL cleanup, the staging reaper, the LFS
//! retention reaper and the commit reconciler sweep.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use kohakuhub_core::time::format_datetime;
use kohakuhub_core::RepoType;

use crate::commit::reconcile;
use crate::lfs::lfs_key;
use crate::state::AppState;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const STAGING_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 3600);
const RECONCILE_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);
const LFS_REAPER_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Multipart uploads older than this are abandoned.
const STAGING_MAX_AGE_HOURS: i64 = 48;
/// Unreferenced LFS objects must be this stale before deletion.
const LFS_ORPHAN_MIN_AGE_DAYS: i64 = 7;

pub fn spawn_background_tasks(state: AppState, shutdown: watch::Receiver<bool>) {
    tokio::spawn(run_loop(
        "session-sweeper",
        SESSION_SWEEP_INTERVAL,
        state.clone(),
        shutdown.clone(),
        |state| Box::pin(sweep_sessions(state)),
    ));
    tokio::spawn(run_loop(
        "staging-reaper",
        STAGING_SWEEP_INTERVAL,
        state.clone(),
        shutdown.clone(),
        |state| Box::pin(reap_staging(state)),
    ));
    tokio::spawn(run_loop(
        "reconciler",
        RECONCILE_SWEEP_INTERVAL,
        state.clone(),
        shutdown.clone(),
        |state| Box::pin(reconcile_sweep(state)),
    ));
    tokio::spawn(run_loop(
        "lfs-reaper",
        LFS_REAPER_INTERVAL,
        state,
        shutdown,
        |state| Box::pin(reap_lfs_orphans(state)),
    ));
}

type TaskFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

async fn run_loop(
    name: &'static str,
    interval: Duration,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
    task: fn(AppState) -> TaskFuture,
) {
    tracing::info!("background task '{name}' started (every {interval:?})");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = task(state.clone()).await {
                    tracing::warn!("background task '{name}' failed: {e}");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("background task '{name}' stopping");
                return;
            }
        }
    }
}

async fn sweep_sessions(state: AppState) -> anyhow::Result<()> {
    let removed = state.db.delete_expired_sessions().await?;
    if removed > 0 {
        tracing::debug!("removed {removed} expired session(s)");
    }
    state.db.delete_expired_confirmation_tokens().await?;
    Ok(())
}

/// Abort multipart uploads nobody finished and drop their rows.
async fn reap_staging(state: AppState) -> anyhow::Result<()> {
    let cutoff = format_datetime(Utc::now() - chrono::Duration::hours(STAGING_MAX_AGE_HOURS));
    let stale = state.db.list_stale_staging_uploads(&cutoff).await?;
    let bucket = state.config.s3.bucket.clone();
    for upload in stale {
        tracing::info!(
            "reaping stale multipart upload {} ({} bytes, path {})",
            upload.upload_id,
            upload.size,
            upload.path_in_repo
        );
        if let Err(e) = state
            .ros
            .multipart_abort(&bucket, &upload.path_in_repo, &upload.upload_id)
            .await
        {
            tracing::debug!("abort of {} failed (may be complete): {e}", upload.upload_id);
        }
        state.db.delete_staging_upload(&upload.upload_id).await?;
    }
    Ok(())
}

/// Repair repos whose versioned store ran ahead of the index.
async fn reconcile_sweep(state: AppState) -> anyhow::Result<()> {
    for repo_type in [RepoType::Model, RepoType::Dataset, RepoType::Space] {
        let repos = state.db.list_repositories(repo_type, None, None, 200).await?;
        for repo in repos {
            match reconcile::is_consistent(&state, &repo).await {
                Ok(true) => {}
                Ok(false) => {
                    let repaired = reconcile::reconcile_repo(&state, &repo).await?;
                    tracing::info!("reconciled {} ({repaired} commit(s))", repo.full_id);
                }
                Err(e) => tracing::debug!("consistency probe of {} failed: {e}", repo.full_id),
            }
        }
    }
    Ok(())
}

/// Delete raw LFS objects whose oid no repository references anymore.
/// The once-per-oid canonical key makes the liveness check O(1).
async fn reap_lfs_orphans(state: AppState) -> anyhow::Result<()> {
    let cutoff = format_datetime(Utc::now() - chrono::Duration::days(LFS_ORPHAN_MIN_AGE_DAYS));
    let bucket = state.config.s3.bucket.clone();

    // Walk the canonical prefix; history rows alone don't say whether
    // the blob still exists.
    let mut continuation: Option<String> = None;
    loop {
        let (entries, next) = state.ros.list(&bucket, "lfs/", continuation.as_deref()).await?;
        for entry in &entries {
            let Some(oid) = entry.key.rsplit('/').next() else {
                continue;
            };
            let references = state.db.count_repos_referencing_sha256(oid).await?;
            if references > 0 {
                continue;
            }
            let stale = match state.db.get_lfs_object(oid).await? {
                Some(history) => history.last_seen_at < cutoff,
                // Unknown object under our prefix: leave it alone.
                None => false,
            };
            if stale {
                tracing::info!("reaping unreferenced LFS object {oid} ({} bytes)", entry.size);
                if let Err(e) = state.ros.delete(&bucket, &lfs_key(oid)).await {
                    tracing::warn!("failed to delete LFS object {oid}: {e}");
                }
            }
        }
        match next {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }
    Ok(())
}
