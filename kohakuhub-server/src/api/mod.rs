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

//! HTTP route handlers. Thin by design: parse, authenticate, delegate,
//! map the result. Business logic lives in the owning subsystems.

pub mod external_tokens;
pub mod invitations;
pub mod misc;
pub mod orgs;
pub mod repos;
pub mod settings;

/// Shared helpers for routes addressing a repository by path.
pub mod repo_path {
    use kohakuhub_core::{HubError, RepoType};
    use kohakuhub_db::entities::Repository;

    use crate::error::{ApiError, ApiResult};
    use crate::state::AppState;

    /// Parse a plural path segment ("models") into a repo type.
    pub fn parse_type(type_plural: &str) -> ApiResult<RepoType> {
        RepoType::parse_plural(type_plural)
            .ok_or_else(|| ApiError(HubError::InvalidRepoType(type_plural.to_string())))
    }

    /// Git clients append `.git` to the repo name segment.
    pub fn strip_git_suffix(name: &str) -> &str {
        name.strip_suffix(".git").unwrap_or(name)
    }

    /// Load a repo addressed as `/{type}s/{namespace}/{name}`, 404 when
    /// absent.
    pub async fn load_repo(
        state: &AppState,
        type_plural: &str,
        namespace: &str,
        name: &str,
    ) -> ApiResult<Repository> {
        let repo_type = parse_type(type_plural)?;
        let name = strip_git_suffix(name);
        state
            .db
            .get_repository(repo_type, namespace, name)
            .await?
            .ok_or_else(|| ApiError(HubError::RepoNotFound(format!("{namespace}/{name}"))))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn git_suffix_stripping() {
            assert_eq!(strip_git_suffix("repo.git"), "repo");
            assert_eq!(strip_git_suffix("repo"), "repo");
            assert_eq!(strip_git_suffix("repo.git.git"), "repo.git");
        }

        #[test]
        fn plural_types_parse() {
            assert!(parse_type("models").is_ok());
            assert!(parse_type("datasets").is_ok());
            assert!(parse_type("spaces").is_ok());
            assert!(parse_type("model").is_err());
        }
    }
}
