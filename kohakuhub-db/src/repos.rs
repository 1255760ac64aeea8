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

//! Repository accessors.
//!
//! `(repo_type, namespace, name)` is unique; the same `full_id` may exist
//! across different types. Creation additionally rejects normalized-name
//! collisions within `(repo_type, namespace)` inside the transaction.

use kohakuhub_core::names::normalize_name;
use kohakuhub_core::time::now_string;
use kohakuhub_core::RepoType;

use crate::entities::Repository;
use crate::{Db, DbError, Result};

pub struct NewRepository<'a> {
    pub repo_type: RepoType,
    pub namespace: &'a str,
    pub name: &'a str,
    pub private: bool,
    pub owner_id: i64,
    pub quota_bytes: Option<i64>,
}

/// Mutable repository settings; `None` leaves a field unchanged.
#[derive(Default)]
pub struct RepositorySettings {
    pub private: Option<bool>,
    pub quota_bytes: Option<Option<i64>>,
    pub lfs_threshold_bytes: Option<Option<i64>>,
    pub lfs_keep_versions: Option<Option<i64>>,
    pub lfs_suffix_rules: Option<Option<String>>,
}

impl Db {
    pub async fn create_repository(&self, new: NewRepository<'_>) -> Result<Repository> {
        let full_id = format!("{}/{}", new.namespace, new.name);
        let normalized = normalize_name(new.name);
        let mut tx = self.pool().begin().await?;

        // Normalized conflict within (repo_type, namespace).
        let rows = sqlx::query(
            "SELECT name FROM repository WHERE repo_type = $1 AND namespace = $2",
        )
        .bind(new.repo_type.as_str())
        .bind(new.namespace)
        .fetch_all(&mut *tx)
        .await?;
        for row in &rows {
            use sqlx::Row;
            let existing: String = row.try_get("name")?;
            if normalize_name(&existing) == normalized {
                return Err(DbError::Conflict(format!(
                    "repository name conflicts with existing '{existing}'"
                )));
            }
        }

        let row = sqlx::query(
            r#"
            INSERT INTO repository
                (repo_type, namespace, name, full_id, private, owner_id, created_at,
                 quota_bytes, used_bytes, downloads, likes_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 0, 0)
            RETURNING *
            "#,
        )
        .bind(new.repo_type.as_str())
        .bind(new.namespace)
        .bind(new.name)
        .bind(&full_id)
        .bind(new.private as i64)
        .bind(new.owner_id)
        .bind(now_string())
        .bind(new.quota_bytes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Conflict(format!("repository '{full_id}' already exists"))
            }
            _ => DbError::Sqlx(e),
        })?;

        tx.commit().await?;
        Ok(Repository::from_row(&row)?)
    }

    pub async fn get_repository(
        &self,
        repo_type: RepoType,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Repository>> {
        let row = sqlx::query(
            "SELECT * FROM repository WHERE repo_type = $1 AND namespace = $2 AND name = $3",
        )
        .bind(repo_type.as_str())
        .bind(namespace)
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| Repository::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn get_repository_by_id(&self, id: i64) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repository WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| Repository::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// List repos of a type, optionally filtered by namespace (`author`)
    /// and a substring `search` over `full_id`.
    pub async fn list_repositories(
        &self,
        repo_type: RepoType,
        author: Option<&str>,
        search: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Repository>> {
        let rows = match (author, search) {
            (Some(author), Some(search)) => {
                sqlx::query(
                    r#"
                    SELECT * FROM repository
                    WHERE repo_type = $1 AND namespace = $2 AND full_id LIKE $3
                    ORDER BY created_at DESC LIMIT $4
                    "#,
                )
                .bind(repo_type.as_str())
                .bind(author)
                .bind(format!("%{search}%"))
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            (Some(author), None) => {
                sqlx::query(
                    r#"
                    SELECT * FROM repository
                    WHERE repo_type = $1 AND namespace = $2
                    ORDER BY created_at DESC LIMIT $3
                    "#,
                )
                .bind(repo_type.as_str())
                .bind(author)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            (None, Some(search)) => {
                sqlx::query(
                    r#"
                    SELECT * FROM repository
                    WHERE repo_type = $1 AND full_id LIKE $2
                    ORDER BY created_at DESC LIMIT $3
                    "#,
                )
                .bind(repo_type.as_str())
                .bind(format!("%{search}%"))
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            (None, None) => {
                sqlx::query(
                    r#"
                    SELECT * FROM repository
                    WHERE repo_type = $1
                    ORDER BY created_at DESC LIMIT $2
                    "#,
                )
                .bind(repo_type.as_str())
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
        };
        rows.iter()
            .map(|r| Repository::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn list_repositories_by_owner(&self, owner_id: i64) -> Result<Vec<Repository>> {
        let rows = sqlx::query("SELECT * FROM repository WHERE owner_id = $1 ORDER BY id")
            .bind(owner_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| Repository::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn update_repository_settings(
        &self,
        repo_id: i64,
        settings: RepositorySettings,
    ) -> Result<()> {
        // Each field updates independently; short statements keep this
        // readable across both backends.
        if let Some(private) = settings.private {
            sqlx::query("UPDATE repository SET private = $1 WHERE id = $2")
                .bind(private as i64)
                .bind(repo_id)
                .execute(self.pool())
                .await?;
        }
        if let Some(quota) = settings.quota_bytes {
            sqlx::query("UPDATE repository SET quota_bytes = $1 WHERE id = $2")
                .bind(quota)
                .bind(repo_id)
                .execute(self.pool())
                .await?;
        }
        if let Some(threshold) = settings.lfs_threshold_bytes {
            sqlx::query("UPDATE repository SET lfs_threshold_bytes = $1 WHERE id = $2")
                .bind(threshold)
                .bind(repo_id)
                .execute(self.pool())
                .await?;
        }
        if let Some(keep) = settings.lfs_keep_versions {
            sqlx::query("UPDATE repository SET lfs_keep_versions = $1 WHERE id = $2")
                .bind(keep)
                .bind(repo_id)
                .execute(self.pool())
                .await?;
        }
        if let Some(rules) = settings.lfs_suffix_rules {
            sqlx::query("UPDATE repository SET lfs_suffix_rules = $1 WHERE id = $2")
                .bind(rules)
                .bind(repo_id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    pub async fn set_repo_used_bytes(&self, repo_id: i64, used: i64) -> Result<()> {
        sqlx::query("UPDATE repository SET used_bytes = $1 WHERE id = $2")
            .bind(used)
            .bind(repo_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn increment_repo_downloads(&self, repo_id: i64) -> Result<()> {
        sqlx::query("UPDATE repository SET downloads = downloads + 1 WHERE id = $1")
            .bind(repo_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Remove the repo row and everything hanging off it.
    pub async fn delete_repository(&self, repo_id: i64) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM repo_file WHERE repository_id = $1")
            .bind(repo_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM commit_record WHERE repository_id = $1")
            .bind(repo_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM staging_upload WHERE repository_id = $1")
            .bind(repo_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM daily_repo_stats WHERE repository_id = $1")
            .bind(repo_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM repository WHERE id = $1")
            .bind(repo_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_db;
    use crate::users::NewUser;

    async fn owner(db: &Db) -> i64 {
        db.create_user(NewUser {
            username: "alice",
            email: "a@x.io",
            password_hash: "h",
            email_verified: true,
            private_quota_bytes: None,
            public_quota_bytes: None,
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn same_full_id_across_types_is_allowed() {
        let db = test_db().await;
        let owner_id = owner(&db).await;

        for repo_type in [RepoType::Model, RepoType::Dataset] {
            db.create_repository(NewRepository {
                repo_type,
                namespace: "alice",
                name: "thing",
                private: false,
                owner_id,
                quota_bytes: None,
            })
            .await
            .unwrap();
        }

        // Same type is a conflict.
        let dup = db
            .create_repository(NewRepository {
                repo_type: RepoType::Model,
                namespace: "alice",
                name: "thing",
                private: false,
                owner_id,
                quota_bytes: None,
            })
            .await;
        assert!(matches!(dup, Err(DbError::Conflict(_))));
    }

    #[tokio::test]
    async fn normalized_conflict_within_namespace() {
        let db = test_db().await;
        let owner_id = owner(&db).await;

        db.create_repository(NewRepository {
            repo_type: RepoType::Model,
            namespace: "alice",
            name: "My-Repo",
            private: false,
            owner_id,
            quota_bytes: None,
        })
        .await
        .unwrap();

        let conflict = db
            .create_repository(NewRepository {
                repo_type: RepoType::Model,
                namespace: "alice",
                name: "my_repo",
                private: false,
                owner_id,
                quota_bytes: None,
            })
            .await;
        assert!(matches!(conflict, Err(DbError::Conflict(_))));

        // Different namespace is fine.
        db.create_repository(NewRepository {
            repo_type: RepoType::Model,
            namespace: "other",
            name: "my_repo",
            private: false,
            owner_id,
            quota_bytes: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn listing_filters() {
        let db = test_db().await;
        let owner_id = owner(&db).await;
        for name in ["bert-base", "bert-large", "gpt-mini"] {
            db.create_repository(NewRepository {
                repo_type: RepoType::Model,
                namespace: "alice",
                name,
                private: false,
                owner_id,
                quota_bytes: None,
            })
            .await
            .unwrap();
        }

        let all = db
            .list_repositories(RepoType::Model, None, None, 50)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let bert = db
            .list_repositories(RepoType::Model, Some("alice"), Some("bert"), 50)
            .await
            .unwrap();
        assert_eq!(bert.len(), 2);

        let none = db
            .list_repositories(RepoType::Dataset, None, None, 50)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn settings_update_and_delete() {
        let db = test_db().await;
        let owner_id = owner(&db).await;
        let repo = db
            .create_repository(NewRepository {
                repo_type: RepoType::Model,
                namespace: "alice",
                name: "r",
                private: false,
                owner_id,
                quota_bytes: None,
            })
            .await
            .unwrap();

        db.update_repository_settings(
            repo.id,
            RepositorySettings {
                private: Some(true),
                lfs_threshold_bytes: Some(Some(0)),
                lfs_suffix_rules: Some(Some(r#"["*.bin"]"#.to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let repo = db.get_repository_by_id(repo.id).await.unwrap().unwrap();
        assert!(repo.private);
        assert_eq!(repo.lfs_threshold_bytes, Some(0));
        assert_eq!(repo.suffix_rules(), vec!["*.bin"]);

        assert!(db.delete_repository(repo.id).await.unwrap());
        assert!(db.get_repository_by_id(repo.id).await.unwrap().is_none());
    }
}
