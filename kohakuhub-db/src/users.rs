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

//! User and organization accessors.
//!
//! Users and organizations share one table and one normalized-name
//! namespace: creating either first checks `normalized_name` uniqueness
//! inside the insert transaction.

use kohakuhub_core::names::normalize_name;
use kohakuhub_core::time::now_string;

use crate::entities::{User, UserOrganization};
use crate::{Db, DbError, Result};

/// Parameters for creating a regular user.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub email_verified: bool,
    pub private_quota_bytes: Option<i64>,
    pub public_quota_bytes: Option<i64>,
}

/// Parameters for creating an organization.
pub struct NewOrg<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub private_quota_bytes: Option<i64>,
    pub public_quota_bytes: Option<i64>,
}

impl Db {
    pub async fn create_user(&self, new: NewUser<'_>) -> Result<User> {
        let normalized = normalize_name(new.username);
        let mut tx = self.pool().begin().await?;

        let taken = sqlx::query("SELECT id FROM user_account WHERE normalized_name = $1")
            .bind(&normalized)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(DbError::Conflict(format!(
                "name '{}' conflicts with an existing user or organization",
                new.username
            )));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO user_account
                (username, normalized_name, is_org, email, password_hash, email_verified,
                 is_active, private_quota_bytes, public_quota_bytes,
                 private_used_bytes, public_used_bytes, created_at)
            VALUES ($1, $2, 0, $3, $4, $5, 1, $6, $7, 0, 0, $8)
            RETURNING *
            "#,
        )
        .bind(new.username)
        .bind(&normalized)
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.email_verified as i64)
        .bind(new.private_quota_bytes)
        .bind(new.public_quota_bytes)
        .bind(now_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(User::from_row(&row)?)
    }

    pub async fn create_org(&self, new: NewOrg<'_>) -> Result<User> {
        let normalized = normalize_name(new.name);
        let mut tx = self.pool().begin().await?;

        let taken = sqlx::query("SELECT id FROM user_account WHERE normalized_name = $1")
            .bind(&normalized)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(DbError::Conflict(format!(
                "name '{}' conflicts with an existing user or organization",
                new.name
            )));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO user_account
                (username, normalized_name, is_org, email, password_hash, email_verified,
                 is_active, private_quota_bytes, public_quota_bytes,
                 private_used_bytes, public_used_bytes, description, created_at)
            VALUES ($1, $2, 1, NULL, NULL, 0, 1, $3, $4, 0, 0, $5, $6)
            RETURNING *
            "#,
        )
        .bind(new.name)
        .bind(&normalized)
        .bind(new.private_quota_bytes)
        .bind(new.public_quota_bytes)
        .bind(new.description)
        .bind(now_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(User::from_row(&row)?)
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM user_account WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| User::from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM user_account WHERE username = $1 AND is_org = 0")
            .bind(username)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| User::from_row(&r)).transpose().map_err(Into::into)
    }

    /// User OR organization by exact username.
    pub async fn get_account_by_name(&self, name: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM user_account WHERE username = $1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| User::from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn get_account_by_normalized_name(&self, normalized: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM user_account WHERE normalized_name = $1")
            .bind(normalized)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| User::from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn get_organization(&self, name: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM user_account WHERE username = $1 AND is_org = 1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| User::from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM user_account WHERE email = $1")
            .bind(email)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| User::from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn list_users(&self, limit: i64) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM user_account ORDER BY id LIMIT $1")
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(|r| User::from_row(r).map_err(Into::into)).collect()
    }

    pub async fn set_email_verified(&self, user_id: i64, verified: bool) -> Result<()> {
        sqlx::query("UPDATE user_account SET email_verified = $1 WHERE id = $2")
            .bind(verified as i64)
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_account_description(&self, id: i64, description: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE user_account SET description = $1 WHERE id = $2")
            .bind(description)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_account_quota(
        &self,
        id: i64,
        private_quota_bytes: Option<i64>,
        public_quota_bytes: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_account SET private_quota_bytes = $1, public_quota_bytes = $2 WHERE id = $3",
        )
        .bind(private_quota_bytes)
        .bind(public_quota_bytes)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Add (possibly negative) bytes to one visibility bucket of an owner.
    pub async fn add_owner_used_bytes(&self, owner_id: i64, private: bool, delta: i64) -> Result<()> {
        let sql = if private {
            "UPDATE user_account SET private_used_bytes = private_used_bytes + $1 WHERE id = $2"
        } else {
            "UPDATE user_account SET public_used_bytes = public_used_bytes + $1 WHERE id = $2"
        };
        sqlx::query(sql)
            .bind(delta)
            .bind(owner_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Overwrite both usage buckets (quota recalculation).
    pub async fn set_owner_used_bytes(
        &self,
        owner_id: i64,
        private_used: i64,
        public_used: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_account SET private_used_bytes = $1, public_used_bytes = $2 WHERE id = $3",
        )
        .bind(private_used)
        .bind(public_used)
        .bind(owner_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_account(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM user_organization WHERE user_id = $1 OR org_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM session_token WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM api_token WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_external_token WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM user_account WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    // --- organization memberships -------------------------------------

    pub async fn create_user_organization(
        &self,
        user_id: i64,
        org_id: i64,
        role: &str,
    ) -> Result<UserOrganization> {
        let row = sqlx::query(
            "INSERT INTO user_organization (user_id, org_id, role) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(user_id)
        .bind(org_id)
        .bind(role)
        .fetch_one(self.pool())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Conflict("user is already a member of the organization".into())
            }
            _ => DbError::Sqlx(e),
        })?;
        Ok(UserOrganization::from_row(&row)?)
    }

    pub async fn get_user_organization(
        &self,
        user_id: i64,
        org_id: i64,
    ) -> Result<Option<UserOrganization>> {
        let row =
            sqlx::query("SELECT * FROM user_organization WHERE user_id = $1 AND org_id = $2")
                .bind(user_id)
                .bind(org_id)
                .fetch_optional(self.pool())
                .await?;
        row.map(|r| UserOrganization::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn update_user_organization_role(
        &self,
        user_id: i64,
        org_id: i64,
        role: &str,
    ) -> Result<()> {
        let updated =
            sqlx::query("UPDATE user_organization SET role = $1 WHERE user_id = $2 AND org_id = $3")
                .bind(role)
                .bind(user_id)
                .bind(org_id)
                .execute(self.pool())
                .await?
                .rows_affected();
        if updated == 0 {
            return Err(DbError::NotFound("membership".into()));
        }
        Ok(())
    }

    pub async fn delete_user_organization(&self, user_id: i64, org_id: i64) -> Result<bool> {
        let deleted =
            sqlx::query("DELETE FROM user_organization WHERE user_id = $1 AND org_id = $2")
                .bind(user_id)
                .bind(org_id)
                .execute(self.pool())
                .await?
                .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn list_organization_members(&self, org_id: i64) -> Result<Vec<UserOrganization>> {
        let rows = sqlx::query("SELECT * FROM user_organization WHERE org_id = $1 ORDER BY id")
            .bind(org_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| UserOrganization::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn list_user_organizations(&self, user_id: i64) -> Result<Vec<UserOrganization>> {
        let rows = sqlx::query("SELECT * FROM user_organization WHERE user_id = $1 ORDER BY id")
            .bind(user_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| UserOrganization::from_row(r).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::org_role;
    use crate::testutil::test_db;

    fn new_user<'a>(name: &'a str, email: &'a str) -> NewUser<'a> {
        NewUser {
            username: name,
            email,
            password_hash: "argon2-hash",
            email_verified: false,
            private_quota_bytes: Some(1 << 30),
            public_quota_bytes: None,
        }
    }

    #[tokio::test]
    async fn user_creation_and_lookup() {
        let db = test_db().await;
        let user = db.create_user(new_user("alice", "a@x.io")).await.unwrap();
        assert!(!user.is_org);
        assert_eq!(user.normalized_name, "alice");

        let by_name = db.get_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert!(db.get_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn normalized_name_is_shared_between_users_and_orgs() {
        let db = test_db().await;
        db.create_user(new_user("My-Name", "m@x.io")).await.unwrap();

        // "my_name" normalizes to the same value.
        let conflict = db
            .create_org(NewOrg {
                name: "my_name",
                description: None,
                private_quota_bytes: None,
                public_quota_bytes: None,
            })
            .await;
        assert!(matches!(conflict, Err(DbError::Conflict(_))));
    }

    #[tokio::test]
    async fn org_membership_round_trip() {
        let db = test_db().await;
        let user = db.create_user(new_user("alice", "a@x.io")).await.unwrap();
        let org = db
            .create_org(NewOrg {
                name: "acme",
                description: Some("An org"),
                private_quota_bytes: None,
                public_quota_bytes: None,
            })
            .await
            .unwrap();
        assert!(org.is_org);
        assert!(org.email.is_none());
        assert!(org.password_hash.is_none());

        db.create_user_organization(user.id, org.id, org_role::SUPER_ADMIN)
            .await
            .unwrap();
        let membership = db
            .get_user_organization(user.id, org.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(membership.role, "super-admin");

        // Duplicate membership is a conflict.
        let dup = db
            .create_user_organization(user.id, org.id, org_role::MEMBER)
            .await;
        assert!(matches!(dup, Err(DbError::Conflict(_))));

        db.update_user_organization_role(user.id, org.id, org_role::MEMBER)
            .await
            .unwrap();
        let members = db.list_organization_members(org.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, "member");

        assert!(db.delete_user_organization(user.id, org.id).await.unwrap());
        assert!(db.list_organization_members(org.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn used_bytes_accounting() {
        let db = test_db().await;
        let user = db.create_user(new_user("alice", "a@x.io")).await.unwrap();

        db.add_owner_used_bytes(user.id, false, 100).await.unwrap();
        db.add_owner_used_bytes(user.id, true, 40).await.unwrap();
        db.add_owner_used_bytes(user.id, false, -30).await.unwrap();

        let user = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.public_used_bytes, 70);
        assert_eq!(user.private_used_bytes, 40);

        // Sizes beyond 32 bits survive (BIGINT columns).
        db.add_owner_used_bytes(user.id, false, 1i64 << 34).await.unwrap();
        let user = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.public_used_bytes, 70 + (1i64 << 34));
    }
}
