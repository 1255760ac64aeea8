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

//! Name normalization and validation.
//!
//! Names that normalize to the same value are considered conflicts; this
//! prevents confusable pairs like `My-Repo` and `my_repo` from coexisting.

use crate::error::{HubError, Result};

/// Names that cannot be used as usernames or organization names because
/// they collide with route segments or system paths.
pub const RESERVED_NAMES: &[&str] = &[
    "models",
    "datasets",
    "spaces",
    "admin",
    "organizations",
    "api",
    "org",
    "auth",
    "settings",
    "new",
    "login",
    "register",
    "logout",
    "docs",
    "swagger",
    "health",
    "version",
    "resolve",
    "tree",
    "blob",
    "commit",
    "commits",
    "branch",
    "branches",
    "tag",
    "tags",
    "upload",
    "edit",
    "fallback-sources",
    "cache",
    "stats",
    "quota",
];

/// Normalize a name for conflict checking: lowercase, hyphens and
/// underscores removed.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['-', '_'], "")
}

/// True when the (normalized) name is reserved.
pub fn is_reserved(name: &str) -> bool {
    let lower = name.to_lowercase();
    let normalized = normalize_name(name);
    RESERVED_NAMES.contains(&lower.as_str()) || RESERVED_NAMES.contains(&normalized.as_str())
}

fn valid_name_chars(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Validate a username or organization name.
pub fn validate_username(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 96 {
        return Err(HubError::BadRequest(
            "Name must be between 1 and 96 characters".into(),
        ));
    }
    if !valid_name_chars(name) || name.starts_with(['-', '.', '_']) {
        return Err(HubError::BadRequest(format!(
            "Name '{name}' contains invalid characters"
        )));
    }
    if is_reserved(name) {
        return Err(HubError::BadRequest(format!(
            "Name '{name}' is reserved and cannot be used"
        )));
    }
    Ok(())
}

/// Validate a repository name (the part after the namespace).
pub fn validate_repo_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 96 {
        return Err(HubError::InvalidRepoId(name.to_string()));
    }
    if !valid_name_chars(name) || name.starts_with(['-', '.']) || name.ends_with('.') {
        return Err(HubError::InvalidRepoId(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_equivalence_classes() {
        assert_eq!(normalize_name("My_Repo"), "myrepo");
        assert_eq!(normalize_name("my-repo"), "myrepo");
        assert_eq!(normalize_name("MYREPO"), "myrepo");
        assert_eq!(normalize_name("My_Repo"), normalize_name("my-repo"));
    }

    #[test]
    fn reserved_names_rejected() {
        assert!(is_reserved("admin"));
        assert!(is_reserved("API"));
        assert!(validate_username("models").is_err());
        assert!(validate_username("alice").is_ok());
    }

    #[test]
    fn repo_name_rules() {
        assert!(validate_repo_name("bert-base").is_ok());
        assert!(validate_repo_name("data.v2").is_ok());
        assert!(validate_repo_name("").is_err());
        assert!(validate_repo_name("-leading").is_err());
        assert!(validate_repo_name("has/slash").is_err());
    }
}
