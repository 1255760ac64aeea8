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

//! Error kinds shared across the hub.
//!
//! The HuggingFace client reads error information from HTTP headers, not
//! from the body: `X-Error-Code` carries one of the codes below and
//! `X-Error-Message` a human-readable message. Error bodies stay empty.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

/// Error codes surfaced via the `X-Error-Code` header.
///
/// The first four are read by `hf_raise_for_status()` in the official
/// client and must not be renamed. The rest are hub-specific additions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    RepoNotFound,
    RevisionNotFound,
    EntryNotFound,
    GatedRepo,
    RepoExists,
    BadRequest,
    InvalidRepoType,
    InvalidRepoId,
    ServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RepoNotFound => "RepoNotFound",
            Self::RevisionNotFound => "RevisionNotFound",
            Self::EntryNotFound => "EntryNotFound",
            Self::GatedRepo => "GatedRepo",
            Self::RepoExists => "RepoExists",
            Self::BadRequest => "BadRequest",
            Self::InvalidRepoType => "InvalidRepoType",
            Self::InvalidRepoId => "InvalidRepoId",
            Self::ServerError => "ServerError",
        }
    }
}

/// Domain error for hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Repository '{0}' not found")]
    RepoNotFound(String),

    #[error("Revision '{revision}' not found in repository '{repo}'")]
    RevisionNotFound { repo: String, revision: String },

    #[error("Entry '{path}' not found in repository '{repo}'")]
    EntryNotFound { repo: String, path: String },

    #[error("Repository '{0}' is gated")]
    GatedRepo(String),

    #[error("Repository '{0}' already exists")]
    RepoExists(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid repository type: {0}")]
    InvalidRepoType(String),

    #[error("Invalid repository id: {0}")]
    InvalidRepoId(String),

    #[error("Quota exceeded for {bucket}: adding {delta} bytes would exceed {limit} (used {used})")]
    QuotaExceeded {
        bucket: String,
        delta: i64,
        used: i64,
        limit: i64,
    },

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// HTTP status the error maps to.
    pub fn status(&self) -> u16 {
        match self {
            Self::RepoNotFound(_) | Self::RevisionNotFound { .. } | Self::EntryNotFound { .. } => {
                404
            }
            Self::GatedRepo(_) | Self::Forbidden(_) => 403,
            Self::RepoExists(_) => 409,
            Self::BadRequest(_) | Self::InvalidRepoType(_) | Self::InvalidRepoId(_) => 400,
            Self::QuotaExceeded { .. } => 413,
            Self::Unauthorized => 401,
            Self::Upstream(_) => 502,
            Self::Internal(_) => 500,
        }
    }

    /// Code carried in the `X-Error-Code` header.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RepoNotFound(_) => ErrorCode::RepoNotFound,
            Self::RevisionNotFound { .. } => ErrorCode::RevisionNotFound,
            Self::EntryNotFound { .. } => ErrorCode::EntryNotFound,
            Self::GatedRepo(_) => ErrorCode::GatedRepo,
            Self::RepoExists(_) => ErrorCode::RepoExists,
            Self::BadRequest(_) | Self::QuotaExceeded { .. } | Self::Unauthorized => {
                ErrorCode::BadRequest
            }
            Self::Forbidden(_) => ErrorCode::GatedRepo,
            Self::InvalidRepoType(_) => ErrorCode::InvalidRepoType,
            Self::InvalidRepoId(_) => ErrorCode::InvalidRepoId,
            Self::Upstream(_) | Self::Internal(_) => ErrorCode::ServerError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(HubError::RepoNotFound("a/b".into()).status(), 404);
        assert_eq!(HubError::RepoExists("a/b".into()).status(), 409);
        assert_eq!(
            HubError::QuotaExceeded {
                bucket: "public".into(),
                delta: 1,
                used: 0,
                limit: 0
            }
            .status(),
            413
        );
        assert_eq!(HubError::Upstream("lakefs".into()).status(), 502);
    }

    #[test]
    fn code_strings_match_hf_client() {
        assert_eq!(ErrorCode::RepoNotFound.as_str(), "RepoNotFound");
        assert_eq!(ErrorCode::RevisionNotFound.as_str(), "RevisionNotFound");
        assert_eq!(ErrorCode::EntryNotFound.as_str(), "EntryNotFound");
        assert_eq!(ErrorCode::GatedRepo.as_str(), "GatedRepo");
    }
}
