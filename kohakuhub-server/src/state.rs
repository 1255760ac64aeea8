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

//! Shared application state. Built once at startup and injected into
//! every handler; nothing here is a process-wide singleton.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use kohakuhub_core::crypto::TokenCipher;
use kohakuhub_core::{HubConfig, RepoType};
use kohakuhub_db::Db;
use kohakuhub_storage::{RosClient, VosClient};

use crate::fallback::cache::FallbackCache;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    pub db: Db,
    pub vos: VosClient,
    pub ros: RosClient,
    pub cipher: Option<TokenCipher>,
    /// Advisory locks serializing commits per (repo_id, branch).
    pub commit_locks: Arc<DashMap<(i64, String), Arc<Mutex<()>>>>,
    /// (repo_type, namespace, name) → source mapping cache.
    pub fallback_cache: Arc<FallbackCache>,
    /// Download-session dedup: one counted session per
    /// (repo, session-or-ip, UTC day).
    pub download_dedup: Arc<moka::sync::Cache<String, ()>>,
    /// Client for fallback sources.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: HubConfig,
        db: Db,
        vos: VosClient,
        ros: RosClient,
    ) -> anyhow::Result<Self> {
        let cipher = if config.app.database_key.is_empty() {
            tracing::warn!(
                "DATABASE_KEY not set; stored upstream tokens are unavailable this run"
            );
            None
        } else {
            Some(TokenCipher::new(&config.app.database_key)?)
        };

        let fallback_cache = Arc::new(FallbackCache::new(
            config.fallback.cache_ttl_seconds,
            config.fallback.cache_max_entries,
        ));

        let download_dedup = Arc::new(
            moka::sync::Cache::builder()
                .max_capacity(100_000)
                .time_to_live(std::time::Duration::from_secs(24 * 3600))
                .build(),
        );

        // Redirects are relayed to our own client, never followed.
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.fallback.timeout_seconds))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            db,
            vos,
            ros,
            cipher,
            commit_locks: Arc::new(DashMap::new()),
            fallback_cache,
            download_dedup,
            http,
        })
    }

    /// Lock handle serializing commits on one (repo, branch).
    pub fn commit_lock(&self, repo_id: i64, branch: &str) -> Arc<Mutex<()>> {
        self.commit_locks
            .entry((repo_id, branch.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Versioned-store repository name for a hub repo.
    pub fn vos_name(&self, repo_type: RepoType, full_id: &str) -> String {
        kohakuhub_core::vos_repo_name(repo_type, full_id)
    }

    /// Storage namespace (S3 prefix) for a new versioned-store repo.
    pub fn vos_storage_namespace(&self, vos_name: &str) -> String {
        format!(
            "s3://{}/{}/{}",
            self.config.s3.bucket, self.config.lakefs.repo_namespace_prefix, vos_name
        )
    }
}
