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

//! Fallback-source and per-user external-token accessors. Tokens are
//! stored encrypted; this layer never sees plaintext.

use crate::entities::{FallbackSource, UserExternalToken};
use crate::{Db, DbError, Result};

pub struct NewFallbackSource<'a> {
    pub namespace: &'a str,
    pub url: &'a str,
    pub name: &'a str,
    pub source_type: &'a str,
    pub priority: i64,
    pub encrypted_token: Option<&'a str>,
    pub enabled: bool,
}

impl Db {
    pub async fn create_fallback_source(
        &self,
        new: NewFallbackSource<'_>,
    ) -> Result<FallbackSource> {
        let row = sqlx::query(
            r#"
            INSERT INTO fallback_source
                (namespace, url, name, source_type, priority, encrypted_token, enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(new.namespace)
        .bind(new.url)
        .bind(new.name)
        .bind(new.source_type)
        .bind(new.priority)
        .bind(new.encrypted_token)
        .bind(new.enabled as i64)
        .fetch_one(self.pool())
        .await?;
        Ok(FallbackSource::from_row(&row)?)
    }

    pub async fn get_fallback_source(&self, id: i64) -> Result<Option<FallbackSource>> {
        let row = sqlx::query("SELECT * FROM fallback_source WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| FallbackSource::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Enabled sources for a namespace, lowest priority first.
    pub async fn list_enabled_fallback_sources(
        &self,
        namespace: &str,
    ) -> Result<Vec<FallbackSource>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM fallback_source
            WHERE namespace = $1 AND enabled = 1
            ORDER BY priority ASC, id ASC
            "#,
        )
        .bind(namespace)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| FallbackSource::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn list_all_fallback_sources(&self) -> Result<Vec<FallbackSource>> {
        let rows =
            sqlx::query("SELECT * FROM fallback_source ORDER BY namespace, priority, id")
                .fetch_all(self.pool())
                .await?;
        rows.iter()
            .map(|r| FallbackSource::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn update_fallback_source(
        &self,
        id: i64,
        priority: Option<i64>,
        encrypted_token: Option<Option<&str>>,
        enabled: Option<bool>,
    ) -> Result<()> {
        if self.get_fallback_source(id).await?.is_none() {
            return Err(DbError::NotFound("fallback source".into()));
        }
        if let Some(priority) = priority {
            sqlx::query("UPDATE fallback_source SET priority = $1 WHERE id = $2")
                .bind(priority)
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        if let Some(token) = encrypted_token {
            sqlx::query("UPDATE fallback_source SET encrypted_token = $1 WHERE id = $2")
                .bind(token)
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        if let Some(enabled) = enabled {
            sqlx::query("UPDATE fallback_source SET enabled = $1 WHERE id = $2")
                .bind(enabled as i64)
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    pub async fn delete_fallback_source(&self, id: i64) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM fallback_source WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    // --- user external tokens -----------------------------------------

    pub async fn set_user_external_token(
        &self,
        user_id: i64,
        url: &str,
        encrypted_token: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_external_token (user_id, url, encrypted_token)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, url) DO UPDATE SET encrypted_token = $3
            "#,
        )
        .bind(user_id)
        .bind(url)
        .bind(encrypted_token)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_user_external_tokens(&self, user_id: i64) -> Result<Vec<UserExternalToken>> {
        let rows = sqlx::query("SELECT * FROM user_external_token WHERE user_id = $1 ORDER BY url")
            .bind(user_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| UserExternalToken::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn delete_user_external_token(&self, user_id: i64, url: &str) -> Result<bool> {
        let deleted =
            sqlx::query("DELETE FROM user_external_token WHERE user_id = $1 AND url = $2")
                .bind(user_id)
                .bind(url)
                .execute(self.pool())
                .await?
                .rows_affected();
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_db;

    #[tokio::test]
    async fn sources_order_by_priority() {
        let db = test_db().await;
        for (name, priority) in [("slow", 50), ("fast", 1), ("mid", 10)] {
            db.create_fallback_source(NewFallbackSource {
                namespace: "",
                url: &format!("https://{name}.example"),
                name,
                source_type: "huggingface",
                priority,
                encrypted_token: None,
                enabled: true,
            })
            .await
            .unwrap();
        }
        db.create_fallback_source(NewFallbackSource {
            namespace: "",
            url: "https://off.example",
            name: "off",
            source_type: "kohakuhub",
            priority: 0,
            encrypted_token: None,
            enabled: false,
        })
        .await
        .unwrap();

        let sources = db.list_enabled_fallback_sources("").await.unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["fast", "mid", "slow"]);
    }

    #[tokio::test]
    async fn namespace_scoping() {
        let db = test_db().await;
        db.create_fallback_source(NewFallbackSource {
            namespace: "alice",
            url: "https://alice-mirror.example",
            name: "alice-mirror",
            source_type: "kohakuhub",
            priority: 1,
            encrypted_token: None,
            enabled: true,
        })
        .await
        .unwrap();

        assert!(db.list_enabled_fallback_sources("").await.unwrap().is_empty());
        assert_eq!(
            db.list_enabled_fallback_sources("alice").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn external_token_upsert_and_delete() {
        let db = test_db().await;
        db.set_user_external_token(1, "https://hf.co", "enc-1")
            .await
            .unwrap();
        db.set_user_external_token(1, "https://hf.co", "enc-2")
            .await
            .unwrap();

        let tokens = db.list_user_external_tokens(1).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].encrypted_token, "enc-2");

        assert!(db.delete_user_external_token(1, "https://hf.co").await.unwrap());
        assert!(db.list_user_external_tokens(1).await.unwrap().is_empty());
    }
}
