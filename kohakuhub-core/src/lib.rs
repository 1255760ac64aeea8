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

//! KohakuHub Core
//!
//! Shared building blocks for the hub: configuration, error kinds, name
//! normalization, token cryptography, the composite Authorization header
//! parser and datetime formatting.

pub mod auth_header;
pub mod config;
pub mod crypto;
pub mod error;
pub mod names;
pub mod time;
pub mod vos_name;

pub use auth_header::{format_auth_header, parse_auth_header, ParsedAuth};
pub use config::HubConfig;
pub use error::{ErrorCode, HubError, Result};
pub use names::{normalize_name, validate_repo_name, validate_username, RESERVED_NAMES};
pub use time::{format_date, format_datetime, now_date_string, now_string};
pub use vos_name::vos_repo_name;

/// Repository kinds understood by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Model,
    Dataset,
    Space,
}

impl RepoType {
    /// Parse from the singular form used in API payloads ("model").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(Self::Model),
            "dataset" => Some(Self::Dataset),
            "space" => Some(Self::Space),
            _ => None,
        }
    }

    /// Parse from the plural path segment ("models").
    pub fn parse_plural(s: &str) -> Option<Self> {
        match s {
            "models" => Some(Self::Model),
            "datasets" => Some(Self::Dataset),
            "spaces" => Some(Self::Space),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Dataset => "dataset",
            Self::Space => "space",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Self::Model => "models",
            Self::Dataset => "datasets",
            Self::Space => "spaces",
        }
    }

    /// Single-character prefix used in VOS repository names.
    pub fn type_char(&self) -> char {
        match self {
            Self::Model => 'm',
            Self::Dataset => 'd',
            Self::Space => 's',
        }
    }
}

impl std::fmt::Display for RepoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_type_round_trip() {
        for t in [RepoType::Model, RepoType::Dataset, RepoType::Space] {
            assert_eq!(RepoType::parse(t.as_str()), Some(t));
            assert_eq!(RepoType::parse_plural(t.plural()), Some(t));
        }
        assert_eq!(RepoType::parse("models"), None);
        assert_eq!(RepoType::parse_plural("model"), None);
    }
}
