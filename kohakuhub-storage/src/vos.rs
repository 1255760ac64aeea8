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

//! Versioned object store client (LakeFS-shaped REST API).
//!
//! The hub's commit engine drives this store: objects are staged on a
//! branch against physical S3 addresses, then landed atomically with
//! `commit`. A 409 from `commit` means the branch advanced under us
//! (non-fast-forward); the commit engine handles that, not this client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::retry::retry_idempotent;
use crate::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStat {
    pub path: String,
    /// Backing S3 URI (`s3://bucket/key`).
    pub physical_address: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub mtime: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_offset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectList {
    pub results: Vec<ObjectStat>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchInfo {
    pub id: String,
    #[serde(default)]
    pub commit_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub committer: String,
    #[serde(default)]
    pub creation_date: i64,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitLog {
    pub results: Vec<CommitInfo>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
struct CreateRepoBody<'a> {
    name: &'a str,
    storage_namespace: &'a str,
    default_branch: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateBranchBody<'a> {
    name: &'a str,
    source: &'a str,
}

#[derive(Debug, Serialize)]
struct StagingMetadata<'a> {
    physical_address: &'a str,
}

#[derive(Debug, Serialize)]
struct StageObjectBody<'a> {
    staging: StagingMetadata<'a>,
    checksum: &'a str,
    size_bytes: i64,
}

#[derive(Debug, Serialize)]
struct CopyObjectBody<'a> {
    src_path: &'a str,
    src_ref: &'a str,
}

#[derive(Debug, Serialize)]
struct CommitBody<'a> {
    message: &'a str,
    metadata: &'a HashMap<String, String>,
}

/// Client for the versioned object store.
#[derive(Clone)]
pub struct VosClient {
    http: reqwest::Client,
    endpoint: String,
    access_key: String,
    secret_key: String,
}

impl VosClient {
    pub fn new(endpoint: &str, access_key: &str, secret_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.endpoint, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .basic_auth(&self.access_key, Some(&self.secret_key))
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                StorageError::Transient(format!("{context}: {e}"))
            } else {
                StorageError::InvalidResponse(format!("{context}: {e}"))
            }
        })?;
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::from_status(status, context, body))
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T> {
        let response = self.send(builder, context).await?;
        response
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(format!("{context}: {e}")))
    }

    // --- repositories --------------------------------------------------

    pub async fn repo_exists(&self, repo: &str) -> Result<bool> {
        retry_idempotent("vos.repo_exists", || async {
            let builder = self.request(reqwest::Method::GET, &format!("/repositories/{repo}"));
            match self.send(builder, "repo_exists").await {
                Ok(_) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }

    pub async fn create_repo(
        &self,
        repo: &str,
        storage_namespace: &str,
        default_branch: &str,
    ) -> Result<()> {
        let body = CreateRepoBody {
            name: repo,
            storage_namespace,
            default_branch,
        };
        let builder = self
            .request(reqwest::Method::POST, "/repositories")
            .json(&body);
        self.send(builder, "create_repo").await?;
        Ok(())
    }

    pub async fn delete_repo(&self, repo: &str) -> Result<()> {
        retry_idempotent("vos.delete_repo", || async {
            let builder =
                self.request(reqwest::Method::DELETE, &format!("/repositories/{repo}"));
            match self.send(builder, "delete_repo").await {
                Ok(_) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await
    }

    // --- branches ------------------------------------------------------

    pub async fn list_branches(&self, repo: &str) -> Result<Vec<BranchInfo>> {
        #[derive(Deserialize)]
        struct BranchList {
            results: Vec<BranchInfo>,
        }
        retry_idempotent("vos.list_branches", || async {
            let builder = self.request(
                reqwest::Method::GET,
                &format!("/repositories/{repo}/branches?amount=1000"),
            );
            let list: BranchList = self.send_json(builder, "list_branches").await?;
            Ok(list.results)
        })
        .await
    }

    pub async fn get_branch(&self, repo: &str, branch: &str) -> Result<BranchInfo> {
        retry_idempotent("vos.get_branch", || async {
            let builder = self.request(
                reqwest::Method::GET,
                &format!("/repositories/{repo}/branches/{branch}"),
            );
            self.send_json(builder, "get_branch").await
        })
        .await
    }

    pub async fn create_branch(&self, repo: &str, name: &str, source_ref: &str) -> Result<()> {
        let body = CreateBranchBody {
            name,
            source: source_ref,
        };
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/repositories/{repo}/branches"),
            )
            .json(&body);
        self.send(builder, "create_branch").await?;
        Ok(())
    }

    pub async fn delete_branch(&self, repo: &str, branch: &str) -> Result<()> {
        retry_idempotent("vos.delete_branch", || async {
            let builder = self.request(
                reqwest::Method::DELETE,
                &format!("/repositories/{repo}/branches/{branch}"),
            );
            match self.send(builder, "delete_branch").await {
                Ok(_) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await
    }

    // --- objects -------------------------------------------------------

    pub async fn stat_object(&self, repo: &str, r#ref: &str, path: &str) -> Result<ObjectStat> {
        retry_idempotent("vos.stat_object", || async {
            let builder = self
                .request(
                    reqwest::Method::GET,
                    &format!("/repositories/{repo}/refs/{ref_enc}/objects/stat", ref_enc = encode(r#ref)),
                )
                .query(&[("path", path)]);
            self.send_json(builder, "stat_object").await
        })
        .await
    }

    pub async fn list_objects(
        &self,
        repo: &str,
        r#ref: &str,
        prefix: &str,
        after: &str,
        amount: u32,
    ) -> Result<ObjectList> {
        retry_idempotent("vos.list_objects", || async {
            let builder = self
                .request(
                    reqwest::Method::GET,
                    &format!("/repositories/{repo}/refs/{ref_enc}/objects/ls", ref_enc = encode(r#ref)),
                )
                .query(&[
                    ("prefix", prefix),
                    ("after", after),
                    ("amount", &amount.to_string()),
                ]);
            self.send_json(builder, "list_objects").await
        })
        .await
    }

    /// Record that `branch` should reference `physical_address` as `path`
    /// at the next commit.
    pub async fn stage_object(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        physical_address: &str,
        size: i64,
        checksum: &str,
    ) -> Result<()> {
        retry_idempotent("vos.stage_object", || async {
            let body = StageObjectBody {
                staging: StagingMetadata { physical_address },
                checksum,
                size_bytes: size,
            };
            let builder = self
                .request(
                    reqwest::Method::PUT,
                    &format!("/repositories/{repo}/branches/{branch}/staging/backing"),
                )
                .query(&[("path", path)])
                .json(&body);
            self.send(builder, "stage_object").await?;
            Ok(())
        })
        .await
    }

    /// Tombstone `path` on `branch` for the next commit.
    pub async fn delete_object(&self, repo: &str, branch: &str, path: &str) -> Result<()> {
        retry_idempotent("vos.delete_object", || async {
            let builder = self
                .request(
                    reqwest::Method::DELETE,
                    &format!("/repositories/{repo}/branches/{branch}/objects"),
                )
                .query(&[("path", path)]);
            match self.send(builder, "delete_object").await {
                Ok(_) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await
    }

    pub async fn copy_object(
        &self,
        repo: &str,
        src_ref: &str,
        src_path: &str,
        dst_branch: &str,
        dst_path: &str,
    ) -> Result<()> {
        retry_idempotent("vos.copy_object", || async {
            let body = CopyObjectBody { src_path, src_ref };
            let builder = self
                .request(
                    reqwest::Method::PUT,
                    &format!("/repositories/{repo}/branches/{dst_branch}/objects/copy"),
                )
                .query(&[("dest_path", dst_path)])
                .json(&body);
            self.send(builder, "copy_object").await?;
            Ok(())
        })
        .await
    }

    // --- commits -------------------------------------------------------

    /// Land everything staged on `branch` in one commit.
    ///
    /// NOT retried: a timeout here is ambiguous (the commit may have
    /// landed) and the caller's reconciler owns that window.
    pub async fn commit(
        &self,
        repo: &str,
        branch: &str,
        message: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<CommitInfo> {
        let body = CommitBody { message, metadata };
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/repositories/{repo}/branches/{branch}/commits"),
            )
            .json(&body);
        self.send_json(builder, "commit").await
    }

    pub async fn get_commit(&self, repo: &str, commit_id: &str) -> Result<CommitInfo> {
        retry_idempotent("vos.get_commit", || async {
            let builder = self.request(
                reqwest::Method::GET,
                &format!("/repositories/{repo}/commits/{commit_id}"),
            );
            self.send_json(builder, "get_commit").await
        })
        .await
    }

    pub async fn log_commits(
        &self,
        repo: &str,
        r#ref: &str,
        amount: u32,
        after: &str,
    ) -> Result<CommitLog> {
        retry_idempotent("vos.log_commits", || async {
            let builder = self
                .request(
                    reqwest::Method::GET,
                    &format!("/repositories/{repo}/refs/{ref_enc}/commits", ref_enc = encode(r#ref)),
                )
                .query(&[("amount", amount.to_string().as_str()), ("after", after)]);
            self.send_json(builder, "log_commits").await
        })
        .await
    }
}

/// Percent-encode a ref name for use in a path segment.
fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_object_deserializes_lakefs_shape() {
        let raw = r#"{
            "path": "weights/model.bin",
            "physical_address": "s3://hub-storage/data/abc123",
            "checksum": "deadbeef",
            "size_bytes": 2147483648,
            "mtime": 1736899200
        }"#;
        let stat: ObjectStat = serde_json::from_str(raw).unwrap();
        assert_eq!(stat.size_bytes, 1 << 31);
        assert_eq!(stat.physical_address, "s3://hub-storage/data/abc123");
    }

    #[test]
    fn commit_log_pagination_defaults() {
        let raw = r#"{"results": [{"id": "c1"}, {"id": "c2"}]}"#;
        let log: CommitLog = serde_json::from_str(raw).unwrap();
        assert_eq!(log.results.len(), 2);
        assert!(!log.pagination.has_more);
        assert!(log.pagination.next_offset.is_empty());
    }

    #[test]
    fn ref_names_are_path_encoded() {
        assert_eq!(encode("main"), "main");
        assert_eq!(encode("feature/x"), "feature%2Fx");
    }
}
