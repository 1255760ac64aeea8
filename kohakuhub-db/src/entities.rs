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

//! Typed records for every table, with the column names pinned in one
//! place per entity. Rows decode manually: booleans come back as
//! INTEGER 0/1 and datetimes as wire-format TEXT on both backends.

use sqlx::any::AnyRow;
use sqlx::Row;

pub(crate) fn get_bool(row: &AnyRow, col: &str) -> sqlx::Result<bool> {
    Ok(row.try_get::<i64, _>(col)? != 0)
}

pub(crate) fn get_opt_string(row: &AnyRow, col: &str) -> sqlx::Result<Option<String>> {
    row.try_get::<Option<String>, _>(col)
}

/// A user account; organizations share the table with `is_org = true`,
/// no email and no password hash.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub normalized_name: String,
    pub is_org: bool,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub is_active: bool,
    pub private_quota_bytes: Option<i64>,
    pub public_quota_bytes: Option<i64>,
    pub private_used_bytes: i64,
    pub public_used_bytes: i64,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub created_at: String,
}

impl User {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            normalized_name: row.try_get("normalized_name")?,
            is_org: get_bool(row, "is_org")?,
            email: get_opt_string(row, "email")?,
            password_hash: get_opt_string(row, "password_hash")?,
            email_verified: get_bool(row, "email_verified")?,
            is_active: get_bool(row, "is_active")?,
            private_quota_bytes: row.try_get("private_quota_bytes")?,
            public_quota_bytes: row.try_get("public_quota_bytes")?,
            private_used_bytes: row.try_get("private_used_bytes")?,
            public_used_bytes: row.try_get("public_used_bytes")?,
            description: get_opt_string(row, "description")?,
            avatar: get_opt_string(row, "avatar")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Membership of a user in an organization.
#[derive(Debug, Clone)]
pub struct UserOrganization {
    pub id: i64,
    pub user_id: i64,
    pub org_id: i64,
    pub role: String,
}

impl UserOrganization {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            org_id: row.try_get("org_id")?,
            role: row.try_get("role")?,
        })
    }
}

pub mod org_role {
    pub const VISITOR: &str = "visitor";
    pub const MEMBER: &str = "member";
    pub const ADMIN: &str = "admin";
    pub const SUPER_ADMIN: &str = "super-admin";

    pub fn is_valid(role: &str) -> bool {
        matches!(role, VISITOR | MEMBER | ADMIN | SUPER_ADMIN)
    }

    /// Can push commits to org repos.
    pub fn can_write(role: &str) -> bool {
        matches!(role, MEMBER | ADMIN | SUPER_ADMIN)
    }

    /// Can manage org settings, members, repo deletion.
    pub fn can_admin(role: &str) -> bool {
        matches!(role, ADMIN | SUPER_ADMIN)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub user_id: i64,
    pub secret: String,
    pub expires_at: String,
}

impl Session {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            secret: row.try_get("secret")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

/// API token; only the SHA3-512 hash is stored.
#[derive(Debug, Clone)]
pub struct ApiToken {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub name: String,
    pub last_used: Option<String>,
    pub created_at: String,
}

impl ApiToken {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            token_hash: row.try_get("token_hash")?,
            name: row.try_get("name")?,
            last_used: get_opt_string(row, "last_used")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Invitation for registration or org membership.
///
/// `max_usage` semantics: NULL = one-shot, -1 = unlimited, N = up to N.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub token: String,
    pub action: String,
    pub parameters: String,
    pub created_by: Option<i64>,
    pub expires_at: String,
    pub max_usage: Option<i64>,
    pub usage_count: i64,
    pub used_at: Option<String>,
    pub used_by: Option<i64>,
}

impl Invitation {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            token: row.try_get("token")?,
            action: row.try_get("action")?,
            parameters: row.try_get("parameters")?,
            created_by: row.try_get("created_by")?,
            expires_at: row.try_get("expires_at")?,
            max_usage: row.try_get("max_usage")?,
            usage_count: row.try_get("usage_count")?,
            used_at: get_opt_string(row, "used_at")?,
            used_by: row.try_get("used_by")?,
        })
    }

    /// An invitation is available while unexpired and under its usage cap.
    pub fn is_available(&self, now: &str) -> bool {
        if self.expires_at.as_str() <= now {
            return false;
        }
        match self.max_usage {
            None => self.usage_count == 0,
            Some(-1) => true,
            Some(n) => self.usage_count < n,
        }
    }
}

pub mod invitation_action {
    pub const REGISTER_ACCOUNT: &str = "register_account";
    pub const JOIN_ORG: &str = "join_org";
}

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: i64,
    pub repo_type: String,
    pub namespace: String,
    pub name: String,
    pub full_id: String,
    pub private: bool,
    pub owner_id: i64,
    pub created_at: String,
    pub quota_bytes: Option<i64>,
    pub used_bytes: i64,
    pub lfs_threshold_bytes: Option<i64>,
    pub lfs_keep_versions: Option<i64>,
    /// JSON array of glob patterns, NULL = none.
    pub lfs_suffix_rules: Option<String>,
    pub downloads: i64,
    pub likes_count: i64,
}

impl Repository {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            repo_type: row.try_get("repo_type")?,
            namespace: row.try_get("namespace")?,
            name: row.try_get("name")?,
            full_id: row.try_get("full_id")?,
            private: get_bool(row, "private")?,
            owner_id: row.try_get("owner_id")?,
            created_at: row.try_get("created_at")?,
            quota_bytes: row.try_get("quota_bytes")?,
            used_bytes: row.try_get("used_bytes")?,
            lfs_threshold_bytes: row.try_get("lfs_threshold_bytes")?,
            lfs_keep_versions: row.try_get("lfs_keep_versions")?,
            lfs_suffix_rules: get_opt_string(row, "lfs_suffix_rules")?,
            downloads: row.try_get("downloads")?,
            likes_count: row.try_get("likes_count")?,
        })
    }

    /// Parsed suffix rules, empty when unset or malformed.
    pub fn suffix_rules(&self) -> Vec<String> {
        self.lfs_suffix_rules
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Branch-tip file index row; tombstones keep `is_deleted = true`.
#[derive(Debug, Clone)]
pub struct RepoFile {
    pub id: i64,
    pub repository_id: i64,
    pub path_in_repo: String,
    pub sha256: String,
    pub size: i64,
    pub lfs: bool,
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl RepoFile {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            repository_id: row.try_get("repository_id")?,
            path_in_repo: row.try_get("path_in_repo")?,
            sha256: row.try_get("sha256")?,
            size: row.try_get("size")?,
            lfs: get_bool(row, "lfs")?,
            is_deleted: get_bool(row, "is_deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub id: i64,
    pub commit_id: String,
    pub repository_id: i64,
    pub repo_type: String,
    pub branch: String,
    /// NULL for anonymous or system commits.
    pub author_id: Option<i64>,
    pub username: String,
    pub message: String,
    pub description: String,
    pub created_at: String,
}

impl CommitRecord {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            commit_id: row.try_get("commit_id")?,
            repository_id: row.try_get("repository_id")?,
            repo_type: row.try_get("repo_type")?,
            branch: row.try_get("branch")?,
            author_id: row.try_get("author_id")?,
            username: row.try_get("username")?,
            message: row.try_get("message")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Append-only registry of LFS objects seen by the hub.
#[derive(Debug, Clone)]
pub struct LfsObjectHistory {
    pub sha256: String,
    pub size: i64,
    pub first_seen_at: String,
    pub last_seen_at: String,
}

impl LfsObjectHistory {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            sha256: row.try_get("sha256")?,
            size: row.try_get("size")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
        })
    }
}

/// Resumable multipart upload bookkeeping.
#[derive(Debug, Clone)]
pub struct StagingUpload {
    pub upload_id: String,
    pub repository_id: i64,
    pub path_in_repo: String,
    pub size: i64,
    pub sha256: String,
    pub created_at: String,
}

impl StagingUpload {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            upload_id: row.try_get("upload_id")?,
            repository_id: row.try_get("repository_id")?,
            path_in_repo: row.try_get("path_in_repo")?,
            size: row.try_get("size")?,
            sha256: row.try_get("sha256")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// External mirror consulted on local miss. `namespace = ""` is global.
#[derive(Debug, Clone)]
pub struct FallbackSource {
    pub id: i64,
    pub namespace: String,
    pub url: String,
    pub name: String,
    pub source_type: String,
    pub priority: i64,
    pub encrypted_token: Option<String>,
    pub enabled: bool,
}

impl FallbackSource {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            namespace: row.try_get("namespace")?,
            url: row.try_get("url")?,
            name: row.try_get("name")?,
            source_type: row.try_get("source_type")?,
            priority: row.try_get("priority")?,
            encrypted_token: get_opt_string(row, "encrypted_token")?,
            enabled: get_bool(row, "enabled")?,
        })
    }
}

/// Per-user token override for a source URL.
#[derive(Debug, Clone)]
pub struct UserExternalToken {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub encrypted_token: String,
}

impl UserExternalToken {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            url: row.try_get("url")?,
            encrypted_token: row.try_get("encrypted_token")?,
        })
    }
}

/// Two-step confirmation for dangerous operations.
#[derive(Debug, Clone)]
pub struct ConfirmationToken {
    pub token: String,
    pub action_type: String,
    pub action_data: String,
    pub created_at: String,
    pub expires_at: String,
}

impl ConfirmationToken {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            token: row.try_get("token")?,
            action_type: row.try_get("action_type")?,
            action_data: row.try_get("action_data")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DailyRepoStats {
    pub repository_id: i64,
    pub date: String,
    pub download_sessions: i64,
    pub authenticated_downloads: i64,
    pub anonymous_downloads: i64,
    pub total_files: i64,
}

impl DailyRepoStats {
    pub(crate) fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            repository_id: row.try_get("repository_id")?,
            date: row.try_get("date")?,
            download_sessions: row.try_get("download_sessions")?,
            authenticated_downloads: row.try_get("authenticated_downloads")?,
            anonymous_downloads: row.try_get("anonymous_downloads")?,
            total_files: row.try_get("total_files")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_availability_rules() {
        let base = Invitation {
            token: "t".into(),
            action: invitation_action::REGISTER_ACCOUNT.into(),
            parameters: "{}".into(),
            created_by: None,
            expires_at: "2999-01-01T00:00:00.000000Z".into(),
            max_usage: None,
            usage_count: 0,
            used_at: None,
            used_by: None,
        };
        let now = "2025-06-01T00:00:00.000000Z";

        // One-shot: available until first use.
        assert!(base.is_available(now));
        let used = Invitation {
            usage_count: 1,
            ..base.clone()
        };
        assert!(!used.is_available(now));

        // Unlimited survives heavy use.
        let unlimited = Invitation {
            max_usage: Some(-1),
            usage_count: 1000,
            ..base.clone()
        };
        assert!(unlimited.is_available(now));

        // Bounded.
        let bounded = Invitation {
            max_usage: Some(3),
            usage_count: 2,
            ..base.clone()
        };
        assert!(bounded.is_available(now));
        let exhausted = Invitation {
            max_usage: Some(3),
            usage_count: 3,
            ..base.clone()
        };
        assert!(!exhausted.is_available(now));

        // Expired.
        let expired = Invitation {
            expires_at: "2020-01-01T00:00:00.000000Z".into(),
            ..base
        };
        assert!(!expired.is_available(now));
    }

    #[test]
    fn org_role_hierarchy() {
        assert!(!org_role::can_write(org_role::VISITOR));
        assert!(org_role::can_write(org_role::MEMBER));
        assert!(!org_role::can_admin(org_role::MEMBER));
        assert!(org_role::can_admin(org_role::ADMIN));
        assert!(org_role::can_admin(org_role::SUPER_ADMIN));
    }

    #[test]
    fn suffix_rules_parse_json_or_default_empty() {
        let mut repo = Repository {
            id: 1,
            repo_type: "model".into(),
            namespace: "u".into(),
            name: "r".into(),
            full_id: "u/r".into(),
            private: false,
            owner_id: 1,
            created_at: String::new(),
            quota_bytes: None,
            used_bytes: 0,
            lfs_threshold_bytes: None,
            lfs_keep_versions: None,
            lfs_suffix_rules: Some(r#"["*.safetensors", "*.bin"]"#.into()),
            downloads: 0,
            likes_count: 0,
        };
        assert_eq!(repo.suffix_rules(), vec!["*.safetensors", "*.bin"]);
        repo.lfs_suffix_rules = Some("not json".into());
        assert!(repo.suffix_rules().is_empty());
        repo.lfs_suffix_rules = None;
        assert!(repo.suffix_rules().is_empty());
    }
}
