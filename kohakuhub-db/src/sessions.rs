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

//! Session and API-token accessors. Tokens are stored hashed; lookup is
//! by hash only, so a DB dump never reveals usable credentials.

use kohakuhub_core::time::now_string;

use crate::entities::{ApiToken, Session};
use crate::{Db, Result};

impl Db {
    pub async fn create_session(
        &self,
        session_id: &str,
        user_id: i64,
        secret: &str,
        expires_at: &str,
    ) -> Result<Session> {
        let row = sqlx::query(
            r#"
            INSERT INTO session_token (session_id, user_id, secret, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(secret)
        .bind(expires_at)
        .fetch_one(self.pool())
        .await?;
        Ok(Session::from_row(&row)?)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM session_token WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| Session::from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM session_token WHERE session_id = $1")
            .bind(session_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// TTL cleanup; returns the number of sessions removed.
    pub async fn delete_expired_sessions(&self) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM session_token WHERE expires_at <= $1")
            .bind(now_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted)
    }

    pub async fn create_api_token(
        &self,
        user_id: i64,
        token_hash: &str,
        name: &str,
    ) -> Result<ApiToken> {
        let row = sqlx::query(
            r#"
            INSERT INTO api_token (user_id, token_hash, name, last_used, created_at)
            VALUES ($1, $2, $3, NULL, $4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(name)
        .bind(now_string())
        .fetch_one(self.pool())
        .await?;
        Ok(ApiToken::from_row(&row)?)
    }

    pub async fn get_api_token_by_hash(&self, token_hash: &str) -> Result<Option<ApiToken>> {
        let row = sqlx::query("SELECT * FROM api_token WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| ApiToken::from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn list_api_tokens(&self, user_id: i64) -> Result<Vec<ApiToken>> {
        let rows = sqlx::query("SELECT * FROM api_token WHERE user_id = $1 ORDER BY id")
            .bind(user_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| ApiToken::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn touch_api_token(&self, token_id: i64) -> Result<()> {
        sqlx::query("UPDATE api_token SET last_used = $1 WHERE id = $2")
            .bind(now_string())
            .bind(token_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_api_token(&self, user_id: i64, token_id: i64) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM api_token WHERE id = $1 AND user_id = $2")
            .bind(token_id)
            .bind(user_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::test_db;
    use crate::users::NewUser;

    #[tokio::test]
    async fn session_lifecycle() {
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

        db.create_session("sid-1", user.id, "secret", "2999-01-01T00:00:00.000000Z")
            .await
            .unwrap();
        db.create_session("sid-2", user.id, "secret", "2000-01-01T00:00:00.000000Z")
            .await
            .unwrap();

        assert!(db.get_session("sid-1").await.unwrap().is_some());
        assert_eq!(db.delete_expired_sessions().await.unwrap(), 1);
        assert!(db.get_session("sid-2").await.unwrap().is_none());
        assert!(db.delete_session("sid-1").await.unwrap());
    }

    #[tokio::test]
    async fn token_lookup_is_by_hash() {
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

        let token = db
            .create_api_token(user.id, "hash-abc", "laptop")
            .await
            .unwrap();
        assert!(token.last_used.is_none());

        let found = db.get_api_token_by_hash("hash-abc").await.unwrap().unwrap();
        assert_eq!(found.id, token.id);
        db.touch_api_token(token.id).await.unwrap();
        let touched = db.get_api_token_by_hash("hash-abc").await.unwrap().unwrap();
        assert!(touched.last_used.is_some());

        assert!(db.delete_api_token(user.id, token.id).await.unwrap());
        assert!(db.get_api_token_by_hash("hash-abc").await.unwrap().is_none());
    }
}
