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

//! Commit request parsing.
//!
//! A commit arrives as NDJSON: one `{"key": ..., "value": {...}}` object
//! per line. The header must come first and exactly once; everything
//! after is an ordered sequence of file operations.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use sha2::Digest;

use kohakuhub_core::HubError;

use crate::error::ApiResult;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "camelCase")]
pub enum CommitLine {
    Header(HeaderValue),
    File(FileValue),
    LfsFile(LfsFileValue),
    DeletedFile(DeletedValue),
    DeletedFolder(DeletedValue),
    CopyFile(CopyValue),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderValue {
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_commit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileValue {
    pub path: String,
    /// Base64-encoded file content.
    pub content: String,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LfsFileValue {
    pub path: String,
    pub oid: String,
    pub size: i64,
    #[serde(default)]
    pub algo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedValue {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyValue {
    /// Destination path.
    pub path: String,
    pub src_path: String,
    #[serde(default)]
    pub src_revision: Option<String>,
}

/// A parsed and validated commit request.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub header: HeaderValue,
    pub operations: Vec<CommitLine>,
}

fn valid_repo_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.ends_with('/')
        && !path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
}

fn valid_sha256(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Parse an NDJSON commit body.
pub fn parse_commit_ndjson(body: &str) -> ApiResult<CommitRequest> {
    let mut header: Option<HeaderValue> = None;
    let mut operations = Vec::new();

    for (line_number, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: CommitLine = serde_json::from_str(line).map_err(|e| {
            HubError::BadRequest(format!("malformed commit line {}: {e}", line_number + 1))
        })?;

        match parsed {
            CommitLine::Header(h) => {
                if header.is_some() {
                    return Err(HubError::BadRequest("duplicate commit header".into()).into());
                }
                if !operations.is_empty() {
                    return Err(
                        HubError::BadRequest("commit header must come first".into()).into()
                    );
                }
                header = Some(h);
            }
            op => {
                if header.is_none() {
                    return Err(
                        HubError::BadRequest("commit header must come first".into()).into()
                    );
                }
                validate_operation(&op)?;
                operations.push(op);
            }
        }
    }

    let header =
        header.ok_or_else(|| HubError::BadRequest("commit is missing its header".into()))?;
    Ok(CommitRequest { header, operations })
}

fn validate_operation(op: &CommitLine) -> ApiResult<()> {
    match op {
        CommitLine::Header(_) => unreachable!("header handled by caller"),
        CommitLine::File(f) => {
            if !valid_repo_path(&f.path) {
                return Err(HubError::BadRequest(format!("invalid path '{}'", f.path)).into());
            }
            if let Some(encoding) = f.encoding.as_deref() {
                if encoding != "base64" {
                    return Err(HubError::BadRequest(format!(
                        "unsupported content encoding '{encoding}'"
                    ))
                    .into());
                }
            }
            if let Some(sha) = f.sha256.as_deref() {
                if !valid_sha256(sha) {
                    return Err(
                        HubError::BadRequest(format!("malformed sha256 for '{}'", f.path)).into(),
                    );
                }
            }
        }
        CommitLine::LfsFile(f) => {
            if !valid_repo_path(&f.path) {
                return Err(HubError::BadRequest(format!("invalid path '{}'", f.path)).into());
            }
            if !valid_sha256(&f.oid) {
                return Err(
                    HubError::BadRequest(format!("malformed oid for '{}'", f.path)).into()
                );
            }
            if f.size < 0 {
                return Err(
                    HubError::BadRequest(format!("negative size for '{}'", f.path)).into()
                );
            }
            if let Some(algo) = f.algo.as_deref() {
                if algo != "sha256" {
                    return Err(
                        HubError::BadRequest(format!("unsupported hash algo '{algo}'")).into(),
                    );
                }
            }
        }
        CommitLine::DeletedFile(d) => {
            if !valid_repo_path(&d.path) {
                return Err(HubError::BadRequest(format!("invalid path '{}'", d.path)).into());
            }
        }
        CommitLine::DeletedFolder(d) => {
            // A folder path may carry a trailing slash; strip for checks.
            let trimmed = d.path.trim_end_matches('/');
            if trimmed.is_empty() || !valid_repo_path(trimmed) {
                return Err(
                    HubError::BadRequest(format!("invalid folder path '{}'", d.path)).into()
                );
            }
        }
        CommitLine::CopyFile(c) => {
            if !valid_repo_path(&c.path) || !valid_repo_path(&c.src_path) {
                return Err(HubError::BadRequest(format!(
                    "invalid copy '{}' -> '{}'",
                    c.src_path, c.path
                ))
                .into());
            }
        }
    }
    Ok(())
}

impl FileValue {
    /// Decode the inline content and verify declared size/hash.
    pub fn decode(&self) -> ApiResult<Vec<u8>> {
        let bytes = BASE64
            .decode(self.content.as_bytes())
            .map_err(|_| HubError::BadRequest(format!("invalid base64 for '{}'", self.path)))?;
        if let Some(declared) = self.size {
            if declared != bytes.len() as i64 {
                return Err(HubError::BadRequest(format!(
                    "size mismatch for '{}': declared {declared}, got {}",
                    self.path,
                    bytes.len()
                ))
                .into());
            }
        }
        if let Some(declared) = self.sha256.as_deref() {
            let actual = hex::encode(sha2::Sha256::digest(&bytes));
            if declared != actual {
                return Err(HubError::BadRequest(format!(
                    "sha256 mismatch for '{}'",
                    self.path
                ))
                .into());
            }
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_file() {
        let body = concat!(
            r#"{"key":"header","value":{"summary":"init"}}"#,
            "\n",
            r#"{"key":"file","value":{"path":"README.md","content":"SGVsbG8sIFdvcmxkIQ=="}}"#,
        );
        let request = parse_commit_ndjson(body).unwrap();
        assert_eq!(request.header.summary, "init");
        assert_eq!(request.operations.len(), 1);
        match &request.operations[0] {
            CommitLine::File(f) => {
                assert_eq!(f.decode().unwrap(), b"Hello, World!");
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn header_must_be_first_and_unique() {
        let no_header = r#"{"key":"deletedFile","value":{"path":"a"}}"#;
        assert!(parse_commit_ndjson(no_header).is_err());

        let double = concat!(
            r#"{"key":"header","value":{"summary":"a"}}"#,
            "\n",
            r#"{"key":"header","value":{"summary":"b"}}"#,
        );
        assert!(parse_commit_ndjson(double).is_err());

        let late = concat!(
            r#"{"key":"deletedFile","value":{"path":"a"}}"#,
            "\n",
            r#"{"key":"header","value":{"summary":"a"}}"#,
        );
        assert!(parse_commit_ndjson(late).is_err());
    }

    #[test]
    fn rejects_traversal_paths() {
        for path in ["/abs", "a//b", "../up", "a/../b", "trailing/"] {
            let body = format!(
                "{}\n{}",
                r#"{"key":"header","value":{"summary":"x"}}"#,
                format!(r#"{{"key":"deletedFile","value":{{"path":"{path}"}}}}"#)
            );
            assert!(parse_commit_ndjson(&body).is_err(), "path {path} accepted");
        }
    }

    #[test]
    fn lfs_line_requires_well_formed_oid() {
        let body = concat!(
            r#"{"key":"header","value":{"summary":"x"}}"#,
            "\n",
            r#"{"key":"lfsFile","value":{"path":"w.bin","oid":"nothex","size":5}}"#,
        );
        assert!(parse_commit_ndjson(body).is_err());
    }

    #[test]
    fn file_decode_checks_declared_size_and_hash() {
        let value = FileValue {
            path: "a.txt".into(),
            content: BASE64.encode(b"hello"),
            encoding: Some("base64".into()),
            size: Some(4),
            sha256: None,
        };
        assert!(value.decode().is_err());

        let good = FileValue {
            size: Some(5),
            sha256: Some(hex::encode(sha2::Sha256::digest(b"hello"))),
            ..value
        };
        assert_eq!(good.decode().unwrap(), b"hello");

        let bad_hash = FileValue {
            sha256: Some("0".repeat(64)),
            ..good
        };
        assert!(bad_hash.decode().is_err());
    }

    #[test]
    fn deleted_folder_accepts_trailing_slash() {
        let body = concat!(
            r#"{"key":"header","value":{"summary":"x"}}"#,
            "\n",
            r#"{"key":"deletedFolder","value":{"path":"old-data/"}}"#,
        );
        let request = parse_commit_ndjson(body).unwrap();
        assert_eq!(request.operations.len(), 1);
    }

    #[test]
    fn parent_commit_round_trips() {
        let body = r#"{"key":"header","value":{"summary":"x","parentCommit":"abc123"}}"#;
        let request = parse_commit_ndjson(body).unwrap();
        assert_eq!(request.header.parent_commit.as_deref(), Some("abc123"));
    }
}
