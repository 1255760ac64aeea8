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

//! Schema bootstrap.
//!
//! One idempotent pass of `CREATE TABLE IF NOT EXISTS` per table, shared
//! between SQLite and Postgres. The only dialect difference is the
//! auto-increment primary key, substituted per backend. All size columns
//! are BIGINT; booleans are INTEGER 0/1; datetimes are wire-format TEXT.

use sqlx::AnyPool;

use crate::{DbError, Result};

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_account (
        id {PK},
        username TEXT NOT NULL UNIQUE,
        normalized_name TEXT NOT NULL UNIQUE,
        is_org INTEGER NOT NULL DEFAULT 0,
        email TEXT UNIQUE,
        password_hash TEXT,
        email_verified INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        private_quota_bytes BIGINT,
        public_quota_bytes BIGINT,
        private_used_bytes BIGINT NOT NULL DEFAULT 0,
        public_used_bytes BIGINT NOT NULL DEFAULT 0,
        description TEXT,
        avatar TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_organization (
        id {PK},
        user_id BIGINT NOT NULL,
        org_id BIGINT NOT NULL,
        role TEXT NOT NULL,
        UNIQUE (user_id, org_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS session_token (
        session_id TEXT PRIMARY KEY,
        user_id BIGINT NOT NULL,
        secret TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_token (
        id {PK},
        user_id BIGINT NOT NULL,
        token_hash TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        last_used TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invitation (
        token TEXT PRIMARY KEY,
        action TEXT NOT NULL,
        parameters TEXT NOT NULL,
        created_by BIGINT,
        expires_at TEXT NOT NULL,
        max_usage BIGINT,
        usage_count BIGINT NOT NULL DEFAULT 0,
        used_at TEXT,
        used_by BIGINT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS repository (
        id {PK},
        repo_type TEXT NOT NULL,
        namespace TEXT NOT NULL,
        name TEXT NOT NULL,
        full_id TEXT NOT NULL,
        private INTEGER NOT NULL DEFAULT 0,
        owner_id BIGINT NOT NULL,
        created_at TEXT NOT NULL,
        quota_bytes BIGINT,
        used_bytes BIGINT NOT NULL DEFAULT 0,
        lfs_threshold_bytes BIGINT,
        lfs_keep_versions BIGINT,
        lfs_suffix_rules TEXT,
        downloads BIGINT NOT NULL DEFAULT 0,
        likes_count BIGINT NOT NULL DEFAULT 0,
        UNIQUE (repo_type, namespace, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS repo_file (
        id {PK},
        repository_id BIGINT NOT NULL,
        path_in_repo TEXT NOT NULL,
        sha256 TEXT NOT NULL,
        size BIGINT NOT NULL,
        lfs INTEGER NOT NULL DEFAULT 0,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (repository_id, path_in_repo)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS commit_record (
        id {PK},
        commit_id TEXT NOT NULL,
        repository_id BIGINT NOT NULL,
        repo_type TEXT NOT NULL,
        branch TEXT NOT NULL,
        author_id BIGINT,
        username TEXT NOT NULL,
        message TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        UNIQUE (commit_id, repository_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lfs_object_history (
        sha256 TEXT PRIMARY KEY,
        size BIGINT NOT NULL,
        first_seen_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staging_upload (
        upload_id TEXT PRIMARY KEY,
        repository_id BIGINT NOT NULL,
        path_in_repo TEXT NOT NULL,
        size BIGINT NOT NULL,
        sha256 TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fallback_source (
        id {PK},
        namespace TEXT NOT NULL DEFAULT '',
        url TEXT NOT NULL,
        name TEXT NOT NULL,
        source_type TEXT NOT NULL,
        priority BIGINT NOT NULL DEFAULT 100,
        encrypted_token TEXT,
        enabled INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_external_token (
        id {PK},
        user_id BIGINT NOT NULL,
        url TEXT NOT NULL,
        encrypted_token TEXT NOT NULL,
        UNIQUE (user_id, url)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS confirmation_token (
        token TEXT PRIMARY KEY,
        action_type TEXT NOT NULL,
        action_data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS daily_repo_stats (
        id {PK},
        repository_id BIGINT NOT NULL,
        date TEXT NOT NULL,
        download_sessions BIGINT NOT NULL DEFAULT 0,
        authenticated_downloads BIGINT NOT NULL DEFAULT 0,
        anonymous_downloads BIGINT NOT NULL DEFAULT 0,
        total_files BIGINT NOT NULL DEFAULT 0,
        UNIQUE (repository_id, date)
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_repo_full_id ON repository (full_id)",
    "CREATE INDEX IF NOT EXISTS idx_repo_namespace ON repository (repo_type, namespace)",
    "CREATE INDEX IF NOT EXISTS idx_file_sha256 ON repo_file (sha256)",
    "CREATE INDEX IF NOT EXISTS idx_file_repo ON repo_file (repository_id)",
    "CREATE INDEX IF NOT EXISTS idx_commit_repo ON commit_record (repository_id, branch)",
    "CREATE INDEX IF NOT EXISTS idx_commit_commit_id ON commit_record (commit_id)",
    "CREATE INDEX IF NOT EXISTS idx_session_user ON session_token (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_token_user ON api_token (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_fallback_namespace ON fallback_source (namespace)",
    "CREATE INDEX IF NOT EXISTS idx_stats_repo_date ON daily_repo_stats (repository_id, date)",
    "CREATE INDEX IF NOT EXISTS idx_user_org_org ON user_organization (org_id)",
];

pub(crate) async fn ensure_schema(pool: &AnyPool) -> Result<()> {
    let mut conn = pool.acquire().await?;
    let backend = conn.backend_name().to_lowercase();
    let pk = if backend.contains("postgres") {
        "BIGSERIAL PRIMARY KEY"
    } else {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    };

    for table in TABLES {
        let sql = table.replace("{PK}", pk);
        sqlx::query(&sql)
            .execute(&mut *conn)
            .await
            .map_err(DbError::Sqlx)?;
    }
    for index in INDEXES {
        sqlx::query(index)
            .execute(&mut *conn)
            .await
            .map_err(DbError::Sqlx)?;
    }

    tracing::debug!("database schema ensured ({backend})");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::testutil::test_db;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let db = test_db().await;
        db.ensure_schema().await.unwrap();
        db.ensure_schema().await.unwrap();
    }
}
