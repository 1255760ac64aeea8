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

//! Commit records plus the one transaction that lands a whole commit in
//! the index: file-row upserts, the commit row, quota deltas and LFS
//! history touches either all apply or none do.

use kohakuhub_core::time::now_string;

use crate::entities::CommitRecord;
use crate::{Db, Result};

/// One file-index mutation inside a commit.
#[derive(Debug, Clone)]
pub struct FileUpsert {
    pub path_in_repo: String,
    pub sha256: String,
    pub size: i64,
    pub lfs: bool,
    pub is_deleted: bool,
}

/// Everything the commit engine wants persisted after a successful
/// versioned-store commit.
#[derive(Debug, Clone)]
pub struct CommitApply {
    pub repository_id: i64,
    pub repo_type: String,
    pub branch: String,
    pub commit_id: String,
    pub author_id: Option<i64>,
    pub username: String,
    pub message: String,
    pub description: String,
    pub file_upserts: Vec<FileUpsert>,
    /// Net byte delta for the repo and the owner bucket.
    pub used_delta: i64,
    pub owner_id: i64,
    /// Which owner bucket the delta lands in.
    pub owner_private: bool,
    /// New (sha256, size) references to record in LFS history.
    pub lfs_touches: Vec<(String, i64)>,
}

impl Db {
    /// Apply a commit's metadata in a single transaction.
    pub async fn apply_commit(&self, apply: CommitApply) -> Result<CommitRecord> {
        let now = now_string();
        let mut tx = self.pool().begin().await?;

        for file in &apply.file_upserts {
            sqlx::query(
                r#"
                INSERT INTO repo_file
                    (repository_id, path_in_repo, sha256, size, lfs, is_deleted, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                ON CONFLICT (repository_id, path_in_repo) DO UPDATE SET
                    sha256 = $3, size = $4, lfs = $5, is_deleted = $6, updated_at = $7
                "#,
            )
            .bind(apply.repository_id)
            .bind(&file.path_in_repo)
            .bind(&file.sha256)
            .bind(file.size)
            .bind(file.lfs as i64)
            .bind(file.is_deleted as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query(
            r#"
            INSERT INTO commit_record
                (commit_id, repository_id, repo_type, branch, author_id, username,
                 message, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&apply.commit_id)
        .bind(apply.repository_id)
        .bind(&apply.repo_type)
        .bind(&apply.branch)
        .bind(apply.author_id)
        .bind(&apply.username)
        .bind(&apply.message)
        .bind(&apply.description)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        if apply.used_delta != 0 {
            sqlx::query("UPDATE repository SET used_bytes = used_bytes + $1 WHERE id = $2")
                .bind(apply.used_delta)
                .bind(apply.repository_id)
                .execute(&mut *tx)
                .await?;
            let owner_sql = if apply.owner_private {
                "UPDATE user_account SET private_used_bytes = private_used_bytes + $1 WHERE id = $2"
            } else {
                "UPDATE user_account SET public_used_bytes = public_used_bytes + $1 WHERE id = $2"
            };
            sqlx::query(owner_sql)
                .bind(apply.used_delta)
                .bind(apply.owner_id)
                .execute(&mut *tx)
                .await?;
        }

        for (sha256, size) in &apply.lfs_touches {
            sqlx::query(
                r#"
                INSERT INTO lfs_object_history (sha256, size, first_seen_at, last_seen_at)
                VALUES ($1, $2, $3, $3)
                ON CONFLICT (sha256) DO UPDATE SET last_seen_at = $3
                "#,
            )
            .bind(sha256)
            .bind(size)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CommitRecord::from_row(&row)?)
    }

    pub async fn get_commit(
        &self,
        repository_id: i64,
        commit_id: &str,
    ) -> Result<Option<CommitRecord>> {
        let row = sqlx::query(
            "SELECT * FROM commit_record WHERE repository_id = $1 AND commit_id = $2",
        )
        .bind(repository_id)
        .bind(commit_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| CommitRecord::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn has_commit(&self, repository_id: i64, commit_id: &str) -> Result<bool> {
        Ok(self.get_commit(repository_id, commit_id).await?.is_some())
    }

    pub async fn list_commits(
        &self,
        repository_id: i64,
        branch: &str,
        limit: i64,
    ) -> Result<Vec<CommitRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM commit_record
            WHERE repository_id = $1 AND branch = $2
            ORDER BY id DESC LIMIT $3
            "#,
        )
        .bind(repository_id)
        .bind(branch)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| CommitRecord::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn list_recent_commits(&self, limit: i64) -> Result<Vec<CommitRecord>> {
        let rows = sqlx::query("SELECT * FROM commit_record ORDER BY id DESC LIMIT $1")
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| CommitRecord::from_row(r).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::NewRepository;
    use crate::testutil::test_db;
    use crate::users::NewUser;
    use kohakuhub_core::RepoType;

    #[tokio::test]
    async fn apply_commit_is_atomic_and_updates_quota() {
        let db = test_db().await;
        let user = db
            .create_user(NewUser {
                username: "alice",
                email: "a@x.io",
                password_hash: "h",
                email_verified: true,
                private_quota_bytes: None,
                public_quota_bytes: None,
            })
            .await
            .unwrap();
        let repo = db
            .create_repository(NewRepository {
                repo_type: RepoType::Model,
                namespace: "alice",
                name: "r",
                private: false,
                owner_id: user.id,
                quota_bytes: None,
            })
            .await
            .unwrap();

        let record = db
            .apply_commit(CommitApply {
                repository_id: repo.id,
                repo_type: "model".into(),
                branch: "main".into(),
                commit_id: "c1".into(),
                author_id: Some(user.id),
                username: "alice".into(),
                message: "init".into(),
                description: String::new(),
                file_upserts: vec![
                    FileUpsert {
                        path_in_repo: "README.md".into(),
                        sha256: "aa".into(),
                        size: 12,
                        lfs: false,
                        is_deleted: false,
                    },
                    FileUpsert {
                        path_in_repo: "model.bin".into(),
                        sha256: "bb".into(),
                        size: 1 << 31,
                        lfs: true,
                        is_deleted: false,
                    },
                ],
                used_delta: 12 + (1i64 << 31),
                owner_id: user.id,
                owner_private: false,
                lfs_touches: vec![("bb".into(), 1i64 << 31)],
            })
            .await
            .unwrap();
        assert_eq!(record.commit_id, "c1");

        let repo = db.get_repository_by_id(repo.id).await.unwrap().unwrap();
        assert_eq!(repo.used_bytes, 12 + (1i64 << 31));
        let user = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.public_used_bytes, 12 + (1i64 << 31));
        assert_eq!(user.private_used_bytes, 0);

        assert!(db.has_commit(repo.id, "c1").await.unwrap());
        assert!(!db.has_commit(repo.id, "c2").await.unwrap());
        assert!(db.get_lfs_object("bb").await.unwrap().is_some());

        let commits = db.list_commits(repo.id, "main", 10).await.unwrap();
        assert_eq!(commits.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_commit_id_per_repo_is_rejected() {
        let db = test_db().await;
        let user = db
            .create_user(NewUser {
                username: "alice",
                email: "a@x.io",
                password_hash: "h",
                email_verified: true,
                private_quota_bytes: None,
                public_quota_bytes: None,
            })
            .await
            .unwrap();
        let repo = db
            .create_repository(NewRepository {
                repo_type: RepoType::Model,
                namespace: "alice",
                name: "r",
                private: false,
                owner_id: user.id,
                quota_bytes: None,
            })
            .await
            .unwrap();

        let apply = CommitApply {
            repository_id: repo.id,
            repo_type: "model".into(),
            branch: "main".into(),
            commit_id: "c1".into(),
            author_id: None,
            username: "anonymous".into(),
            message: "m".into(),
            description: String::new(),
            file_upserts: vec![],
            used_delta: 0,
            owner_id: user.id,
            owner_private: false,
            lfs_touches: vec![],
        };
        db.apply_commit(apply.clone()).await.unwrap();
        assert!(db.apply_commit(apply).await.is_err());
    }
}
