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

//! Quota accounting.
//!
//! Each owner (user or org) carries a private and a public byte budget;
//! each repo carries its own. A null quota means unlimited. The commit
//! engine calls [`check_commit_quota`] with the aggregated net delta
//! before staging anything; [`recalculate_repo`] and
//! [`recalculate_owner`] rebuild usage from the live file index.

use kohakuhub_core::HubError;
use kohakuhub_db::entities::{Repository, User};
use kohakuhub_db::Db;

use crate::error::ApiResult;

/// Reject a commit whose net delta would exceed any applicable budget.
pub fn check_commit_quota(owner: &User, repo: &Repository, delta: i64) -> ApiResult<()> {
    if delta <= 0 {
        return Ok(());
    }

    let (bucket, used, quota) = if repo.private {
        ("private", owner.private_used_bytes, owner.private_quota_bytes)
    } else {
        ("public", owner.public_used_bytes, owner.public_quota_bytes)
    };
    if let Some(limit) = quota {
        if used + delta > limit {
            return Err(HubError::QuotaExceeded {
                bucket: format!("{bucket} storage of '{}'", owner.username),
                delta,
                used,
                limit,
            }
            .into());
        }
    }

    if let Some(limit) = repo.quota_bytes {
        if repo.used_bytes + delta > limit {
            return Err(HubError::QuotaExceeded {
                bucket: format!("repository '{}'", repo.full_id),
                delta,
                used: repo.used_bytes,
                limit,
            }
            .into());
        }
    }

    Ok(())
}

/// Recompute one repo's usage from its live file rows and persist it.
/// Regular files count per path; LFS content counts each distinct
/// sha256 once per repo, matching the commit engine's dedup. Returns
/// the new total.
pub async fn recalculate_repo(db: &Db, repo_id: i64) -> ApiResult<i64> {
    let files = db.list_live_files(repo_id).await?;
    let mut total = 0i64;
    let mut seen_oids = std::collections::HashSet::new();
    for file in &files {
        if file.lfs {
            if seen_oids.insert(file.sha256.as_str()) {
                total += file.size;
            }
        } else {
            total += file.size;
        }
    }
    db.set_repo_used_bytes(repo_id, total).await?;
    Ok(total)
}

/// Recompute an owner's private/public usage from their repos' live
/// files. Repos are recalculated first so both levels agree.
pub async fn recalculate_owner(db: &Db, owner_id: i64) -> ApiResult<(i64, i64)> {
    let repos = db.list_repositories_by_owner(owner_id).await?;
    let mut private_total = 0i64;
    let mut public_total = 0i64;
    for repo in &repos {
        let total = recalculate_repo(db, repo.id).await?;
        if repo.private {
            private_total += total;
        } else {
            public_total += total;
        }
    }
    db.set_owner_used_bytes(owner_id, private_total, public_total)
        .await?;
    Ok((private_total, public_total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(private_quota: Option<i64>, public_quota: Option<i64>, used: i64) -> User {
        User {
            id: 1,
            username: "alice".into(),
            normalized_name: "alice".into(),
            is_org: false,
            email: None,
            password_hash: None,
            email_verified: true,
            is_active: true,
            private_quota_bytes: private_quota,
            public_quota_bytes: public_quota,
            private_used_bytes: used,
            public_used_bytes: used,
            description: None,
            avatar: None,
            created_at: String::new(),
        }
    }

    fn repo(private: bool, quota: Option<i64>, used: i64) -> Repository {
        Repository {
            id: 1,
            repo_type: "model".into(),
            namespace: "alice".into(),
            name: "r".into(),
            full_id: "alice/r".into(),
            private,
            owner_id: 1,
            created_at: String::new(),
            quota_bytes: quota,
            used_bytes: used,
            lfs_threshold_bytes: None,
            lfs_keep_versions: None,
            lfs_suffix_rules: None,
            downloads: 0,
            likes_count: 0,
        }
    }

    #[test]
    fn null_quota_is_unlimited() {
        let owner = owner(None, None, i64::MAX / 2);
        let repo = repo(false, None, i64::MAX / 2);
        assert!(check_commit_quota(&owner, &repo, 1 << 40).is_ok());
    }

    #[test]
    fn public_bucket_enforced() {
        // 100 MiB budget, 40 MiB used: a 70 MiB commit must fail.
        let owner = owner(None, Some(100 << 20), 40 << 20);
        let repo = repo(false, None, 0);
        let err = check_commit_quota(&owner, &repo, 70 << 20).unwrap_err();
        assert_eq!(err.0.status(), 413);
        assert!(err.0.to_string().contains("public"));

        // 40 MiB fits.
        assert!(check_commit_quota(&owner, &repo, 40 << 20).is_ok());
    }

    #[test]
    fn private_bucket_selected_for_private_repos() {
        let owner = owner(Some(10), None, 0);
        let repo = repo(true, None, 0);
        assert!(check_commit_quota(&owner, &repo, 11).is_err());
        assert!(check_commit_quota(&owner, &repo, 10).is_ok());
    }

    #[test]
    fn repo_quota_enforced_independently() {
        let owner = owner(None, None, 0);
        let repo = repo(false, Some(100), 95);
        let err = check_commit_quota(&owner, &repo, 6).unwrap_err();
        assert!(err.0.to_string().contains("alice/r"));
    }

    #[test]
    fn negative_delta_always_passes() {
        let owner = owner(Some(0), Some(0), 0);
        let repo = repo(false, Some(0), 0);
        assert!(check_commit_quota(&owner, &repo, -100).is_ok());
        assert!(check_commit_quota(&owner, &repo, 0).is_ok());
    }
}
