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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Object, branch or repository absent upstream.
    #[error("not found: {0}")]
    NotFound(String),

    /// Precondition failure, e.g. a non-fast-forward commit.
    #[error("conflict: {0}")]
    Conflict(String),

    /// 5xx, timeout or connection failure; safe to retry when the
    /// operation is idempotent.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Definite upstream rejection (non-retryable 4xx).
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Upstream replied with something we could not parse.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classify an HTTP status from a storage backend.
    pub(crate) fn from_status(status: u16, context: &str, body: String) -> Self {
        match status {
            404 | 410 => Self::NotFound(context.to_string()),
            409 | 412 => Self::Conflict(format!("{context}: {body}")),
            500..=599 | 408 => Self::Transient(format!("{context}: HTTP {status} {body}")),
            _ => Self::Upstream {
                status,
                message: format!("{context}: {body}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(StorageError::from_status(404, "stat", String::new()).is_not_found());
        assert!(matches!(
            StorageError::from_status(409, "commit", String::new()),
            StorageError::Conflict(_)
        ));
        assert!(StorageError::from_status(503, "stat", String::new()).is_transient());
        assert!(StorageError::from_status(408, "stat", String::new()).is_transient());
        assert!(matches!(
            StorageError::from_status(403, "stat", String::new()),
            StorageError::Upstream { status: 403, .. }
        ));
    }
}
