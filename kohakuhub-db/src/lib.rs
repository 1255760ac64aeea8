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

//! KohakuHub metadata store.
//!
//! Typed accessors over the relational database (SQLite or Postgres via
//! the sqlx `Any` driver). No SQL leaks out of this crate except the
//! admin read-only query console; every multi-row mutation runs in a
//! short transaction.
//!
//! Conventions:
//! - `get_*_by_*` returns `Option<T>` when absence is normal;
//! - `list_*` returns `Vec<T>`;
//! - booleans are stored as INTEGER 0/1 and datetimes as UTC TEXT in the
//!   API wire format, so rows decode identically on both backends;
//! - placeholders use `$N`, which both backends accept.

pub mod entities;
mod schema;

mod commits;
mod fallback;
mod files;
mod invitations;
mod repos;
mod sessions;
mod stats;
mod users;

pub use commits::{CommitApply, FileUpsert};
pub use fallback::NewFallbackSource;
pub use invitations::NewInvitation;
pub use repos::{NewRepository, RepositorySettings};
pub use stats::TrendingSample;
pub use users::{NewOrg, NewUser};

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// A row that must exist does not.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint or business-rule conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Corrupt or unparseable stored data.
    #[error("internal: {0}")]
    Internal(String),
}

/// Handle to the metadata store. Cheap to clone; wraps a connection pool.
#[derive(Clone)]
pub struct Db {
    pool: AnyPool,
}

impl Db {
    /// Connect to the database and bootstrap the schema.
    ///
    /// `database_url` is either `sqlite://...` or `postgres://...`;
    /// drivers for both are installed once per process.
    pub async fn connect(database_url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Bootstrap all tables and indexes if absent. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        schema::ensure_schema(&self.pool).await
    }

    pub(crate) fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Read-only escape hatch for the admin SQL console. The caller is
    /// responsible for restricting input to a single SELECT statement.
    pub async fn raw_select(
        &self,
        sql: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        use sqlx::{Column, Row, TypeInfo, ValueRef};

        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let mut out = Vec::new();
        for row in rows.iter().take(limit) {
            let mut obj = serde_json::Map::new();
            for (i, col) in row.columns().iter().enumerate() {
                let raw = row.try_get_raw(i)?;
                let value = if raw.is_null() {
                    serde_json::Value::Null
                } else {
                    // Decode by declared type, falling back to text.
                    let type_name = raw.type_info().name().to_uppercase();
                    if type_name.contains("INT") {
                        row.try_get::<i64, _>(i)
                            .map(serde_json::Value::from)
                            .unwrap_or(serde_json::Value::Null)
                    } else if type_name.contains("REAL") || type_name.contains("DOUBLE") {
                        row.try_get::<f64, _>(i)
                            .map(serde_json::Value::from)
                            .unwrap_or(serde_json::Value::Null)
                    } else {
                        row.try_get::<String, _>(i)
                            .map(serde_json::Value::from)
                            .unwrap_or(serde_json::Value::Null)
                    }
                };
                obj.insert(col.name().to_string(), value);
            }
            out.push(obj);
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::{AnyPoolOptions, Db};

    /// In-memory SQLite store for tests, schema bootstrapped.
    ///
    /// Pinned to a single connection: `sqlite::memory:` gives each new
    /// connection its own private database, so a pool with more than one
    /// connection would see the schema on some connections but not others.
    pub async fn test_db() -> Db {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("test db pool");
        let db = Db { pool };
        db.ensure_schema().await.expect("test schema");
        db
    }
}
