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

//! Raw object store client (S3-compatible).
//!
//! Holds staged commit blobs and canonical LFS objects. Presigned URLs
//! are the only way clients touch this store directly; when the internal
//! endpoint is not publicly routable a public endpoint is substituted
//! into every presigned URL.
//!
//! The SDK's default retry policy covers transient failures for
//! idempotent calls; `complete_multipart` opts out of retries because a
//! replay after an ambiguous failure can double-complete.

use std::time::Duration;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;

use crate::error::StorageError;
use crate::Result;

/// `s3://bucket/key` → `(bucket, key)`.
pub fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| StorageError::InvalidResponse(format!("not an s3 uri: {uri}")))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| StorageError::InvalidResponse(format!("s3 uri has no key: {uri}")))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(StorageError::InvalidResponse(format!(
            "s3 uri has empty bucket or key: {uri}"
        )));
    }
    Ok((bucket.to_string(), key.to_string()))
}

#[derive(Debug, Clone)]
pub struct HeadResult {
    pub size: i64,
    pub etag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub size: i64,
}

/// An uploaded part, as reported back by the client.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct MultipartPart {
    pub part_number: i32,
    pub etag: String,
}

#[derive(Clone)]
pub struct RosClient {
    client: aws_sdk_s3::Client,
    endpoint: String,
    public_endpoint: Option<String>,
}

fn map_sdk_err<E>(context: &str, err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            StorageError::from_status(status, context, format!("{}", ctx.err()))
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            StorageError::Transient(format!("{context}: {err}"))
        }
        _ => StorageError::InvalidResponse(format!("{context}: {err}")),
    }
}

impl RosClient {
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        public_endpoint: Option<&str>,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "kohakuhub");
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            public_endpoint: public_endpoint.map(|e| e.trim_end_matches('/').to_string()),
        }
    }

    /// Swap the internal endpoint for the public one in a presigned URL.
    fn publish_url(&self, url: String) -> String {
        match &self.public_endpoint {
            Some(public) if url.starts_with(&self.endpoint) => {
                format!("{public}{}", &url[self.endpoint.len()..])
            }
            _ => url,
        }
    }

    pub async fn head(&self, bucket: &str, key: &str) -> Result<Option<HeadResult>> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(Some(HeadResult {
                size: out.content_length().unwrap_or(0),
                etag: out.e_tag().map(|s| s.trim_matches('"').to_string()),
            })),
            Err(err) => {
                let mapped = map_sdk_err("head", err);
                if mapped.is_not_found() {
                    Ok(None)
                } else {
                    Err(mapped)
                }
            }
        }
    }

    pub async fn get(&self, bucket: &str, key: &str, range: Option<&str>) -> Result<Bytes> {
        let mut req = self.client.get_object().bucket(bucket).key(key);
        if let Some(range) = range {
            req = req.range(range);
        }
        let out = req.send().await.map_err(|e| {
            let mapped = map_sdk_err("get", e);
            if mapped.is_not_found() {
                StorageError::NotFound(format!("{bucket}/{key}"))
            } else {
                mapped
            }
        })?;
        let data = out
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("get body: {e}")))?;
        Ok(data.into_bytes())
    }

    pub async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body.into())
            .send()
            .await
            .map_err(|e| map_sdk_err("put", e))?;
        Ok(())
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_err("delete", e))?;
        Ok(())
    }

    pub async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(format!("{src_bucket}/{src_key}"))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| map_sdk_err("copy", e))?;
        Ok(())
    }

    pub async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<(Vec<ObjectEntry>, Option<String>)> {
        let mut req = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(1000);
        if let Some(token) = continuation {
            req = req.continuation_token(token);
        }
        let out = req.send().await.map_err(|e| map_sdk_err("list", e))?;
        let entries = out
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(ObjectEntry {
                    key: obj.key()?.to_string(),
                    size: obj.size().unwrap_or(0),
                })
            })
            .collect();
        Ok((entries, out.next_continuation_token().map(String::from)))
    }

    // --- presigning ----------------------------------------------------

    fn presign_config(ttl_secs: u64) -> Result<PresigningConfig> {
        PresigningConfig::expires_in(Duration::from_secs(ttl_secs))
            .map_err(|e| StorageError::InvalidResponse(format!("presign config: {e}")))
    }

    pub async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl_secs: u64,
        filename: Option<&str>,
    ) -> Result<String> {
        let mut req = self.client.get_object().bucket(bucket).key(key);
        if let Some(filename) = filename {
            req = req.response_content_disposition(format!("attachment; filename=\"{filename}\""));
        }
        let presigned = req
            .presigned(Self::presign_config(ttl_secs)?)
            .await
            .map_err(|e| map_sdk_err("presign_get", e))?;
        Ok(self.publish_url(presigned.uri().to_string()))
    }

    pub async fn presign_put(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String> {
        let presigned = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .presigned(Self::presign_config(ttl_secs)?)
            .await
            .map_err(|e| map_sdk_err("presign_put", e))?;
        Ok(self.publish_url(presigned.uri().to_string()))
    }

    // --- multipart -----------------------------------------------------

    pub async fn multipart_create(&self, bucket: &str, key: &str) -> Result<String> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_err("multipart_create", e))?;
        out.upload_id()
            .map(String::from)
            .ok_or_else(|| StorageError::InvalidResponse("multipart create: no upload id".into()))
    }

    pub async fn multipart_presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl_secs: u64,
    ) -> Result<String> {
        let presigned = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(Self::presign_config(ttl_secs)?)
            .await
            .map_err(|e| map_sdk_err("multipart_presign_part", e))?;
        Ok(self.publish_url(presigned.uri().to_string()))
    }

    /// Complete a multipart upload. Never retried: a replay after an
    /// ambiguous failure is not idempotent.
    pub async fn multipart_complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[MultipartPart],
    ) -> Result<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        CompletedPart::builder()
                            .part_number(p.part_number)
                            .e_tag(&p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| map_sdk_err("multipart_complete", e))?;
        Ok(())
    }

    pub async fn multipart_abort(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_err("multipart_abort", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_uri_parsing() {
        let (bucket, key) = parse_s3_uri("s3://hub-storage/lfs/ab/cd/abcd").unwrap();
        assert_eq!(bucket, "hub-storage");
        assert_eq!(key, "lfs/ab/cd/abcd");

        assert!(parse_s3_uri("http://x/y").is_err());
        assert!(parse_s3_uri("s3://bucket-only").is_err());
        assert!(parse_s3_uri("s3:///key").is_err());
    }

    #[test]
    fn public_endpoint_rewrite() {
        let client = RosClient::new(
            "http://minio:9000",
            "us-east-1",
            "ak",
            "sk",
            Some("https://files.hub.example"),
        );
        let rewritten =
            client.publish_url("http://minio:9000/bucket/key?X-Amz-Signature=abc".to_string());
        assert_eq!(
            rewritten,
            "https://files.hub.example/bucket/key?X-Amz-Signature=abc"
        );

        // URLs on other hosts pass through untouched.
        let other = client.publish_url("http://elsewhere/bucket/key".to_string());
        assert_eq!(other, "http://elsewhere/bucket/key");
    }
}
