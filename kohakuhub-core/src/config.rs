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

//! Hub configuration.
//!
//! Everything is read from the process environment under the
//! `KOHAKU_HUB_` prefix, loaded once at startup into a typed config and
//! injected into handlers via the application state.

use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "KOHAKU_HUB_";

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_var(name).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub app: AppConfig,
    pub s3: S3Config,
    pub lakefs: LakeFsConfig,
    pub quota: QuotaConfig,
    pub fallback: FallbackConfig,
    pub smtp: SmtpConfig,
    pub auth: AuthPolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// "local" (single node) or "remote" (behind shared backends).
    pub mode: String,
    /// Public base URL of this hub, used in commit URLs and presign hosts.
    pub base_url: String,
    pub site_name: String,
    pub workers: usize,
    /// "sqlite" or "postgres".
    pub db_backend: String,
    pub database_url: String,
    /// Hex key material for encrypting stored upstream tokens.
    pub database_key: String,
    pub session_secret: String,
    pub session_expires_days: i64,
    pub admin_enabled: bool,
    pub admin_secret_token: String,
    /// Server default; repositories may override per-repo.
    pub lfs_threshold_bytes: i64,
    /// How many replaced LFS versions per (repo, path) the reaper keeps.
    pub lfs_keep_versions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    /// Endpoint substituted into presigned URLs handed to clients, when
    /// the internal endpoint is not publicly routable.
    pub public_endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LakeFsConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Prefix for per-repo storage namespaces under the S3 bucket.
    pub repo_namespace_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// None = unlimited.
    pub default_user_private_quota_bytes: Option<i64>,
    pub default_user_public_quota_bytes: Option<i64>,
    pub default_org_private_quota_bytes: Option<i64>,
    pub default_org_public_quota_bytes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSourceConfig {
    pub url: String,
    #[serde(default = "default_source_name")]
    pub name: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_source_priority")]
    pub priority: i64,
    #[serde(default = "default_source_type")]
    pub source_type: String,
}

fn default_source_name() -> String {
    "Unknown".to_string()
}

fn default_source_priority() -> i64 {
    100
}

fn default_source_type() -> String {
    "huggingface".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// Global sources from the environment (JSON list).
    pub sources: Vec<FallbackSourceConfig>,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: u64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPolicyConfig {
    pub invitation_only: bool,
    pub require_email_verification: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            app: AppConfig {
                mode: "local".to_string(),
                base_url: "http://localhost:48888".to_string(),
                site_name: "KohakuHub".to_string(),
                workers: 1,
                db_backend: "sqlite".to_string(),
                database_url: "sqlite://kohakuhub.db".to_string(),
                database_key: String::new(),
                session_secret: String::new(),
                session_expires_days: 7,
                admin_enabled: false,
                admin_secret_token: String::new(),
                lfs_threshold_bytes: 5 * 1024 * 1024,
                lfs_keep_versions: 5,
            },
            s3: S3Config {
                endpoint: "http://minio:9000".to_string(),
                public_endpoint: None,
                access_key: String::new(),
                secret_key: String::new(),
                bucket: "hub-storage".to_string(),
                region: "us-east-1".to_string(),
            },
            lakefs: LakeFsConfig {
                endpoint: "http://lakefs:8000".to_string(),
                access_key: String::new(),
                secret_key: String::new(),
                repo_namespace_prefix: "hub-repos".to_string(),
            },
            quota: QuotaConfig {
                default_user_private_quota_bytes: None,
                default_user_public_quota_bytes: None,
                default_org_private_quota_bytes: None,
                default_org_public_quota_bytes: None,
            },
            fallback: FallbackConfig {
                enabled: false,
                sources: Vec::new(),
                cache_ttl_seconds: 300,
                cache_max_entries: 10_000,
                timeout_seconds: 30,
            },
            smtp: SmtpConfig {
                enabled: false,
                host: String::new(),
                port: 587,
                username: String::new(),
                password: String::new(),
                from_address: "noreply@kohakuhub.local".to_string(),
            },
            auth: AuthPolicyConfig {
                invitation_only: false,
                require_email_verification: false,
            },
        }
    }
}

impl HubConfig {
    /// Load configuration from `KOHAKU_HUB_*` environment variables over
    /// the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_var("MODE") {
            config.app.mode = v;
        }
        if let Some(v) = env_var("BASE_URL") {
            config.app.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = env_var("SITE_NAME") {
            config.app.site_name = v;
        }
        if let Some(v) = env_parse("WORKERS") {
            config.app.workers = v;
        }
        if let Some(v) = env_var("DB_BACKEND") {
            config.app.db_backend = v;
        }
        if let Some(v) = env_var("DATABASE_URL") {
            config.app.database_url = v;
        }
        if let Some(v) = env_var("DATABASE_KEY") {
            config.app.database_key = v;
        }
        if let Some(v) = env_var("SESSION_SECRET") {
            config.app.session_secret = v;
        }
        if let Some(v) = env_parse("SESSION_EXPIRES_DAYS") {
            config.app.session_expires_days = v;
        }
        if let Some(v) = env_bool("ADMIN_ENABLED") {
            config.app.admin_enabled = v;
        }
        if let Some(v) = env_var("ADMIN_SECRET_TOKEN") {
            config.app.admin_secret_token = v;
        }
        if let Some(v) = env_parse("LFS_THRESHOLD_BYTES") {
            config.app.lfs_threshold_bytes = v;
        }
        if let Some(v) = env_parse("LFS_KEEP_VERSIONS") {
            config.app.lfs_keep_versions = v;
        }

        if let Some(v) = env_var("S3_ENDPOINT") {
            config.s3.endpoint = v;
        }
        config.s3.public_endpoint = env_var("S3_PUBLIC_ENDPOINT");
        if let Some(v) = env_var("S3_ACCESS_KEY") {
            config.s3.access_key = v;
        }
        if let Some(v) = env_var("S3_SECRET_KEY") {
            config.s3.secret_key = v;
        }
        if let Some(v) = env_var("S3_BUCKET") {
            config.s3.bucket = v;
        }
        if let Some(v) = env_var("S3_REGION") {
            config.s3.region = v;
        }

        if let Some(v) = env_var("LAKEFS_ENDPOINT") {
            config.lakefs.endpoint = v;
        }
        if let Some(v) = env_var("LAKEFS_ACCESS_KEY") {
            config.lakefs.access_key = v;
        }
        if let Some(v) = env_var("LAKEFS_SECRET_KEY") {
            config.lakefs.secret_key = v;
        }
        if let Some(v) = env_var("LAKEFS_REPO_NAMESPACE") {
            config.lakefs.repo_namespace_prefix = v;
        }

        config.quota.default_user_private_quota_bytes =
            env_parse("QUOTA_DEFAULT_USER_PRIVATE_BYTES");
        config.quota.default_user_public_quota_bytes =
            env_parse("QUOTA_DEFAULT_USER_PUBLIC_BYTES");
        config.quota.default_org_private_quota_bytes =
            env_parse("QUOTA_DEFAULT_ORG_PRIVATE_BYTES");
        config.quota.default_org_public_quota_bytes = env_parse("QUOTA_DEFAULT_ORG_PUBLIC_BYTES");

        if let Some(v) = env_bool("FALLBACK_ENABLED") {
            config.fallback.enabled = v;
        }
        if let Some(raw) = env_var("FALLBACK_SOURCES") {
            match serde_json::from_str::<Vec<FallbackSourceConfig>>(&raw) {
                Ok(sources) => config.fallback.sources = sources,
                Err(e) => {
                    tracing::warn!("Ignoring malformed KOHAKU_HUB_FALLBACK_SOURCES: {e}");
                }
            }
        }
        if let Some(v) = env_parse("FALLBACK_CACHE_TTL_SECONDS") {
            config.fallback.cache_ttl_seconds = v;
        }
        if let Some(v) = env_parse("FALLBACK_CACHE_MAX_ENTRIES") {
            config.fallback.cache_max_entries = v;
        }
        if let Some(v) = env_parse("FALLBACK_TIMEOUT_SECONDS") {
            config.fallback.timeout_seconds = v;
        }

        if let Some(v) = env_var("SMTP_HOST") {
            config.smtp.host = v;
            config.smtp.enabled = true;
        }
        if let Some(v) = env_parse("SMTP_PORT") {
            config.smtp.port = v;
        }
        if let Some(v) = env_var("SMTP_USERNAME") {
            config.smtp.username = v;
        }
        if let Some(v) = env_var("SMTP_PASSWORD") {
            config.smtp.password = v;
        }
        if let Some(v) = env_var("SMTP_FROM") {
            config.smtp.from_address = v;
        }

        if let Some(v) = env_bool("INVITATION_ONLY") {
            config.auth.invitation_only = v;
        }
        if let Some(v) = env_bool("REQUIRE_EMAIL_VERIFICATION") {
            config.auth.require_email_verification = v;
        }

        config
    }

    /// Validate configuration before serving.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.app.db_backend.as_str(), "sqlite" | "postgres") {
            anyhow::bail!(
                "DB_BACKEND must be 'sqlite' or 'postgres', got '{}'",
                self.app.db_backend
            );
        }
        if !matches!(self.app.mode.as_str(), "local" | "remote") {
            anyhow::bail!("MODE must be 'local' or 'remote', got '{}'", self.app.mode);
        }
        if self.app.session_secret.is_empty() {
            anyhow::bail!("SESSION_SECRET must be configured");
        }
        if self.app.admin_enabled && self.app.admin_secret_token.is_empty() {
            anyhow::bail!("ADMIN_ENABLED requires ADMIN_SECRET_TOKEN");
        }
        if self.app.lfs_threshold_bytes < 0 {
            anyhow::bail!("LFS_THRESHOLD_BYTES must be >= 0");
        }
        Ok(())
    }

    /// Effective LFS threshold for a repo-level override.
    pub fn lfs_threshold_for(&self, repo_override: Option<i64>) -> i64 {
        repo_override.unwrap_or(self.app.lfs_threshold_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = HubConfig::default();
        assert_eq!(config.app.db_backend, "sqlite");
        assert_eq!(config.fallback.cache_ttl_seconds, 300);
        assert_eq!(config.fallback.cache_max_entries, 10_000);
        assert!(!config.fallback.enabled);
    }

    #[test]
    fn validation_requires_session_secret() {
        let config = HubConfig::default();
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        config.app.session_secret = "s".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_unknown_backend() {
        let mut config = HubConfig::default();
        config.app.session_secret = "s".into();
        config.app.db_backend = "mysql".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn lfs_threshold_override() {
        let config = HubConfig::default();
        assert_eq!(config.lfs_threshold_for(None), 5 * 1024 * 1024);
        assert_eq!(config.lfs_threshold_for(Some(0)), 0);
        assert_eq!(config.lfs_threshold_for(Some(123)), 123);
    }

    #[test]
    fn fallback_sources_parse_from_json() {
        let raw = r#"[{"url":"https://huggingface.co","name":"HF","priority":1},
                      {"url":"https://peer.example","source_type":"kohakuhub"}]"#;
        let sources: Vec<FallbackSourceConfig> = serde_json::from_str(raw).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].priority, 1);
        assert_eq!(sources[1].source_type, "kohakuhub");
        assert_eq!(sources[1].priority, 100);
    }
}
