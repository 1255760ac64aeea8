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

//! File-index accessors. One row per (repository, path) at branch tip;
//! deletions keep the row as a tombstone.

use kohakuhub_core::time::now_string;

use crate::entities::{LfsObjectHistory, RepoFile, StagingUpload};
use crate::{Db, Result};

impl Db {
    /// Insert or replace the tip row for (repo, path).
    pub async fn upsert_file(
        &self,
        repository_id: i64,
        path_in_repo: &str,
        sha256: &str,
        size: i64,
        lfs: bool,
        is_deleted: bool,
    ) -> Result<()> {
        let now = now_string();
        sqlx::query(
            r#"
            INSERT INTO repo_file
                (repository_id, path_in_repo, sha256, size, lfs, is_deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (repository_id, path_in_repo) DO UPDATE SET
                sha256 = $3, size = $4, lfs = $5, is_deleted = $6, updated_at = $7
            "#,
        )
        .bind(repository_id)
        .bind(path_in_repo)
        .bind(sha256)
        .bind(size)
        .bind(lfs as i64)
        .bind(is_deleted as i64)
        .bind(&now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Tip row including tombstones.
    pub async fn get_file(&self, repository_id: i64, path: &str) -> Result<Option<RepoFile>> {
        let row =
            sqlx::query("SELECT * FROM repo_file WHERE repository_id = $1 AND path_in_repo = $2")
                .bind(repository_id)
                .bind(path)
                .fetch_optional(self.pool())
                .await?;
        row.map(|r| RepoFile::from_row(&r)).transpose().map_err(Into::into)
    }

    /// Tip row, live files only.
    pub async fn get_live_file(&self, repository_id: i64, path: &str) -> Result<Option<RepoFile>> {
        Ok(self
            .get_file(repository_id, path)
            .await?
            .filter(|f| !f.is_deleted))
    }

    pub async fn list_live_files(&self, repository_id: i64) -> Result<Vec<RepoFile>> {
        let rows = sqlx::query(
            "SELECT * FROM repo_file WHERE repository_id = $1 AND is_deleted = 0 ORDER BY path_in_repo",
        )
        .bind(repository_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| RepoFile::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn list_live_files_under_prefix(
        &self,
        repository_id: i64,
        prefix: &str,
    ) -> Result<Vec<RepoFile>> {
        // Escape LIKE metacharacters in the prefix.
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let rows = sqlx::query(
            r#"
            SELECT * FROM repo_file
            WHERE repository_id = $1 AND is_deleted = 0 AND path_in_repo LIKE $2 ESCAPE '\'
            ORDER BY path_in_repo
            "#,
        )
        .bind(repository_id)
        .bind(format!("{escaped}%"))
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| RepoFile::from_row(r).map_err(Into::into))
            .collect()
    }

    /// Any live file with the given content hash, across repositories.
    pub async fn find_live_file_by_sha256(&self, sha256: &str) -> Result<Option<RepoFile>> {
        let row = sqlx::query(
            "SELECT * FROM repo_file WHERE sha256 = $1 AND is_deleted = 0 ORDER BY id LIMIT 1",
        )
        .bind(sha256)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| RepoFile::from_row(&r)).transpose().map_err(Into::into)
    }

    /// True when the repo already has a live file with this hash
    /// (deduplication for quota accounting).
    pub async fn repo_references_sha256(&self, repository_id: i64, sha256: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT id FROM repo_file WHERE repository_id = $1 AND sha256 = $2 AND is_deleted = 0 LIMIT 1",
        )
        .bind(repository_id)
        .bind(sha256)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.is_some())
    }

    /// Number of distinct repositories with a live reference to the hash.
    pub async fn count_repos_referencing_sha256(&self, sha256: &str) -> Result<i64> {
        use sqlx::Row;
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT repository_id) AS n FROM repo_file WHERE sha256 = $1 AND is_deleted = 0",
        )
        .bind(sha256)
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("n")?)
    }

    // --- LFS object history -------------------------------------------

    pub async fn get_lfs_object(&self, sha256: &str) -> Result<Option<LfsObjectHistory>> {
        let row = sqlx::query("SELECT * FROM lfs_object_history WHERE sha256 = $1")
            .bind(sha256)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| LfsObjectHistory::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Insert the first sighting or refresh `last_seen_at`.
    pub async fn touch_lfs_object(&self, sha256: &str, size: i64) -> Result<()> {
        let now = now_string();
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
        .execute(self.pool())
        .await?;
        Ok(())
    }

    // --- staging uploads ----------------------------------------------

    pub async fn create_staging_upload(
        &self,
        upload_id: &str,
        repository_id: i64,
        path_in_repo: &str,
        size: i64,
        sha256: &str,
    ) -> Result<StagingUpload> {
        let row = sqlx::query(
            r#"
            INSERT INTO staging_upload (upload_id, repository_id, path_in_repo, size, sha256, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(upload_id)
        .bind(repository_id)
        .bind(path_in_repo)
        .bind(size)
        .bind(sha256)
        .bind(now_string())
        .fetch_one(self.pool())
        .await?;
        Ok(StagingUpload::from_row(&row)?)
    }

    pub async fn get_staging_upload(&self, upload_id: &str) -> Result<Option<StagingUpload>> {
        let row = sqlx::query("SELECT * FROM staging_upload WHERE upload_id = $1")
            .bind(upload_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| StagingUpload::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn delete_staging_upload(&self, upload_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM staging_upload WHERE upload_id = $1")
            .bind(upload_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Uploads older than the cutoff, for the reaper.
    pub async fn list_stale_staging_uploads(&self, cutoff: &str) -> Result<Vec<StagingUpload>> {
        let rows = sqlx::query("SELECT * FROM staging_upload WHERE created_at < $1")
            .bind(cutoff)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| StagingUpload::from_row(r).map_err(Into::into))
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

    async fn repo(db: &Db) -> i64 {
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
        db.create_repository(NewRepository {
            repo_type: RepoType::Model,
            namespace: "alice",
            name: "r",
            private: false,
            owner_id: user.id,
            quota_bytes: None,
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn upsert_replaces_tip_and_tombstones() {
        let db = test_db().await;
        let repo_id = repo(&db).await;

        db.upsert_file(repo_id, "README.md", "aa", 10, false, false)
            .await
            .unwrap();
        db.upsert_file(repo_id, "README.md", "bb", 20, false, false)
            .await
            .unwrap();

        let tip = db.get_live_file(repo_id, "README.md").await.unwrap().unwrap();
        assert_eq!(tip.sha256, "bb");
        assert_eq!(tip.size, 20);

        db.upsert_file(repo_id, "README.md", "bb", 20, false, true)
            .await
            .unwrap();
        assert!(db.get_live_file(repo_id, "README.md").await.unwrap().is_none());
        // The tombstone is still addressable.
        assert!(db.get_file(repo_id, "README.md").await.unwrap().unwrap().is_deleted);
    }

    #[tokio::test]
    async fn prefix_listing_escapes_like_metachars() {
        let db = test_db().await;
        let repo_id = repo(&db).await;

        db.upsert_file(repo_id, "data/x.txt", "a1", 1, false, false)
            .await
            .unwrap();
        db.upsert_file(repo_id, "data/y.txt", "a2", 1, false, false)
            .await
            .unwrap();
        db.upsert_file(repo_id, "docs/z.txt", "a3", 1, false, false)
            .await
            .unwrap();
        db.upsert_file(repo_id, "da_a/w.txt", "a4", 1, false, false)
            .await
            .unwrap();

        let under = db
            .list_live_files_under_prefix(repo_id, "data/")
            .await
            .unwrap();
        assert_eq!(under.len(), 2);

        // "_" in the prefix must not act as a wildcard.
        let under = db
            .list_live_files_under_prefix(repo_id, "da_a/")
            .await
            .unwrap();
        assert_eq!(under.len(), 1);
        assert_eq!(under[0].path_in_repo, "da_a/w.txt");
    }

    #[tokio::test]
    async fn sha_reference_counting() {
        let db = test_db().await;
        let repo_id = repo(&db).await;

        db.upsert_file(repo_id, "a.bin", "oid1", 100, true, false)
            .await
            .unwrap();
        db.upsert_file(repo_id, "b.bin", "oid1", 100, true, false)
            .await
            .unwrap();

        assert!(db.repo_references_sha256(repo_id, "oid1").await.unwrap());
        assert!(!db.repo_references_sha256(repo_id, "oid2").await.unwrap());
        // Two paths in one repo count as one referencing repository.
        assert_eq!(db.count_repos_referencing_sha256("oid1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lfs_history_is_append_only_per_sha() {
        let db = test_db().await;
        db.touch_lfs_object("oid1", 1 << 32).await.unwrap();
        let first = db.get_lfs_object("oid1").await.unwrap().unwrap();
        assert_eq!(first.size, 1 << 32);

        db.touch_lfs_object("oid1", 1 << 32).await.unwrap();
        let second = db.get_lfs_object("oid1").await.unwrap().unwrap();
        assert_eq!(second.first_seen_at, first.first_seen_at);
        assert!(second.last_seen_at >= first.last_seen_at);
    }

    #[tokio::test]
    async fn staging_upload_lifecycle() {
        let db = test_db().await;
        let repo_id = repo(&db).await;

        db.create_staging_upload("up-1", repo_id, "big.bin", 1 << 31, "oid")
            .await
            .unwrap();
        let found = db.get_staging_upload("up-1").await.unwrap().unwrap();
        assert_eq!(found.size, 1 << 31);

        let stale = db
            .list_stale_staging_uploads("2999-01-01T00:00:00.000000Z")
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);

        assert!(db.delete_staging_upload("up-1").await.unwrap());
        assert!(db.get_staging_upload("up-1").await.unwrap().is_none());
    }
}
