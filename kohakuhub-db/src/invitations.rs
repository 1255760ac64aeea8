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

//! Invitation and confirmation-token accessors.
//!
//! Consuming an invitation re-checks availability inside the transaction
//! so two concurrent redeemers cannot both take the last use.

use kohakuhub_core::time::now_string;

use crate::entities::{ConfirmationToken, Invitation};
use crate::{Db, DbError, Result};

pub struct NewInvitation<'a> {
    pub token: &'a str,
    pub action: &'a str,
    pub parameters: &'a str,
    pub created_by: Option<i64>,
    pub expires_at: &'a str,
    /// NULL = one-shot, -1 = unlimited, N = up to N uses.
    pub max_usage: Option<i64>,
}

impl Db {
    pub async fn create_invitation(&self, new: NewInvitation<'_>) -> Result<Invitation> {
        let row = sqlx::query(
            r#"
            INSERT INTO invitation
                (token, action, parameters, created_by, expires_at, max_usage, usage_count)
            VALUES ($1, $2, $3, $4, $5, $6, 0)
            RETURNING *
            "#,
        )
        .bind(new.token)
        .bind(new.action)
        .bind(new.parameters)
        .bind(new.created_by)
        .bind(new.expires_at)
        .bind(new.max_usage)
        .fetch_one(self.pool())
        .await?;
        Ok(Invitation::from_row(&row)?)
    }

    pub async fn get_invitation(&self, token: &str) -> Result<Option<Invitation>> {
        let row = sqlx::query("SELECT * FROM invitation WHERE token = $1")
            .bind(token)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| Invitation::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list_invitations(&self, limit: i64) -> Result<Vec<Invitation>> {
        let rows = sqlx::query("SELECT * FROM invitation ORDER BY expires_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| Invitation::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn delete_invitation(&self, token: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM invitation WHERE token = $1")
            .bind(token)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Consume one use of an invitation. Fails with `Conflict` when the
    /// invitation is exhausted or expired.
    pub async fn consume_invitation(&self, token: &str, used_by: i64) -> Result<Invitation> {
        let now = now_string();
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM invitation WHERE token = $1")
            .bind(token)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::NotFound("invitation".into()))?;
        let invitation = Invitation::from_row(&row)?;

        if !invitation.is_available(&now) {
            return Err(DbError::Conflict(
                "invitation is expired or exhausted".into(),
            ));
        }

        let row = sqlx::query(
            r#"
            UPDATE invitation
            SET usage_count = usage_count + 1, used_at = $1, used_by = $2
            WHERE token = $3
            RETURNING *
            "#,
        )
        .bind(&now)
        .bind(used_by)
        .bind(token)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Invitation::from_row(&row)?)
    }

    // --- confirmation tokens ------------------------------------------

    pub async fn create_confirmation_token(
        &self,
        token: &str,
        action_type: &str,
        action_data: &str,
        expires_at: &str,
    ) -> Result<ConfirmationToken> {
        let row = sqlx::query(
            r#"
            INSERT INTO confirmation_token (token, action_type, action_data, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(token)
        .bind(action_type)
        .bind(action_data)
        .bind(now_string())
        .bind(expires_at)
        .fetch_one(self.pool())
        .await?;
        Ok(ConfirmationToken::from_row(&row)?)
    }

    /// Fetch-and-delete; a confirmation token is single use.
    pub async fn take_confirmation_token(&self, token: &str) -> Result<Option<ConfirmationToken>> {
        let mut tx = self.pool().begin().await?;
        let row = sqlx::query("SELECT * FROM confirmation_token WHERE token = $1")
            .bind(token)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let confirmation = ConfirmationToken::from_row(&row)?;
        sqlx::query("DELETE FROM confirmation_token WHERE token = $1")
            .bind(token)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if confirmation.expires_at.as_str() <= now_string().as_str() {
            return Ok(None);
        }
        Ok(Some(confirmation))
    }

    pub async fn delete_expired_confirmation_tokens(&self) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM confirmation_token WHERE expires_at <= $1")
            .bind(now_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::invitation_action;
    use crate::testutil::test_db;

    #[tokio::test]
    async fn one_shot_invitation_consumed_once() {
        let db = test_db().await;
        db.create_invitation(NewInvitation {
            token: "inv-1",
            action: invitation_action::REGISTER_ACCOUNT,
            parameters: "{}",
            created_by: None,
            expires_at: "2999-01-01T00:00:00.000000Z",
            max_usage: None,
        })
        .await
        .unwrap();

        let used = db.consume_invitation("inv-1", 7).await.unwrap();
        assert_eq!(used.usage_count, 1);
        assert_eq!(used.used_by, Some(7));

        assert!(matches!(
            db.consume_invitation("inv-1", 8).await,
            Err(DbError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn unlimited_invitation_survives_many_uses() {
        let db = test_db().await;
        db.create_invitation(NewInvitation {
            token: "inv-inf",
            action: invitation_action::JOIN_ORG,
            parameters: r#"{"org":"acme","role":"member"}"#,
            created_by: Some(1),
            expires_at: "2999-01-01T00:00:00.000000Z",
            max_usage: Some(-1),
        })
        .await
        .unwrap();

        for i in 0..50 {
            db.consume_invitation("inv-inf", i).await.unwrap();
        }
        let inv = db.get_invitation("inv-inf").await.unwrap().unwrap();
        assert_eq!(inv.usage_count, 50);
        assert!(inv.is_available("2025-01-01T00:00:00.000000Z"));
    }

    #[tokio::test]
    async fn expired_invitation_rejected() {
        let db = test_db().await;
        db.create_invitation(NewInvitation {
            token: "inv-old",
            action: invitation_action::REGISTER_ACCOUNT,
            parameters: "{}",
            created_by: None,
            expires_at: "2000-01-01T00:00:00.000000Z",
            max_usage: Some(-1),
        })
        .await
        .unwrap();
        assert!(db.consume_invitation("inv-old", 1).await.is_err());
    }

    #[tokio::test]
    async fn confirmation_token_is_single_use() {
        let db = test_db().await;
        db.create_confirmation_token(
            "ct-1",
            "delete_repo",
            r#"{"repo":"a/b"}"#,
            "2999-01-01T00:00:00.000000Z",
        )
        .await
        .unwrap();

        let taken = db.take_confirmation_token("ct-1").await.unwrap();
        assert!(taken.is_some());
        assert!(db.take_confirmation_token("ct-1").await.unwrap().is_none());
    }
}
