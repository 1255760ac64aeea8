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

//! KohakuHub storage clients.
//!
//! Two thin async wrappers over external services with fixed REST
//! contracts:
//! - [`VosClient`]: the branching, committing versioned object store
//!   (LakeFS-shaped API) holding the per-repo file trees;
//! - [`RosClient`]: the raw S3-compatible blob store holding staged
//!   objects and canonical LFS blobs.
//!
//! Idempotent calls retry with jittered exponential backoff;
//! non-idempotent calls (versioned-store commit, multipart complete) are
//! never retried on ambiguous failures.

mod error;
mod retry;
pub mod ros;
pub mod vos;

pub use error::StorageError;
pub use ros::{parse_s3_uri, HeadResult, MultipartPart, ObjectEntry, RosClient};
pub use vos::{
    BranchInfo, CommitInfo, CommitLog, ObjectList, ObjectStat, Pagination, VosClient,
};

pub type Result<T> = std::result::Result<T, StorageError>;
