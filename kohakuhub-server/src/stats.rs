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

//! Repository statistics and trending.
//!
//! Today's row updates in real time on every download; days with no
//! events back-fill lazily with zeros the first time someone reads the
//! stats. Trending weighs each day's `log(1 + downloads)` by an
//! exponential decay so new repos can compete with long-lived ones.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use kohakuhub_core::time::format_date;
use kohakuhub_core::RepoType;
use kohakuhub_db::entities::Repository;
use kohakuhub_db::TrendingSample;

use crate::api::repo_path::load_repo;
use crate::auth::permissions::check_repo_read;
use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

const TRENDING_DECAY: f64 = 0.8;

/// Back-fill zero rows for days between the repo's creation (at most
/// `max_days` back) and yesterday.
pub async fn ensure_stats_up_to_date(
    state: &AppState,
    repo: &Repository,
    max_days: i64,
) -> ApiResult<()> {
    let today = Utc::now().date_naive();
    let total_files = state.db.list_live_files(repo.id).await?.len() as i64;
    for days_ago in 1..=max_days {
        let date = today - Duration::days(days_ago);
        state
            .db
            .backfill_daily_stats(repo.id, &format_date(date), total_files)
            .await?;
    }
    Ok(())
}

/// Decayed trending score per repository over samples from the last
/// `days` days.
pub fn trending_scores(samples: &[TrendingSample], today: NaiveDate) -> HashMap<i64, f64> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    for sample in samples {
        let Ok(date) = NaiveDate::parse_from_str(&sample.date, "%Y-%m-%d") else {
            continue;
        };
        let days_ago = (today - date).num_days();
        if days_ago < 0 {
            continue;
        }
        let decay = TRENDING_DECAY.powi(days_ago as i32);
        let activity = (1.0 + sample.download_sessions as f64).ln();
        *scores.entry(sample.repository_id).or_insert(0.0) += activity * decay;
    }
    scores
}

// --- handlers ----------------------------------------------------------

/// GET `/api/{type}s/{ns}/{name}/stats`
pub async fn repo_stats(
    State(state): State<AppState>,
    Path((type_plural, namespace, name)): Path<(String, String, String)>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_read(&state, &repo, auth.user.as_ref()).await?;
    ensure_stats_up_to_date(&state, &repo, 30).await?;
    Ok(Json(json!({
        "downloads": repo.downloads,
        "likes": repo.likes_count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RecentStatsParams {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

/// GET `/api/{type}s/{ns}/{name}/stats/recent`
pub async fn recent_stats(
    State(state): State<AppState>,
    Path((type_plural, namespace, name)): Path<(String, String, String)>,
    Query(params): Query<RecentStatsParams>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = load_repo(&state, &type_plural, &namespace, &name).await?;
    check_repo_read(&state, &repo, auth.user.as_ref()).await?;

    let days = params.days.clamp(1, 365);
    ensure_stats_up_to_date(&state, &repo, days).await?;

    let end = Utc::now().date_naive();
    let start = end - Duration::days(days - 1);
    let rows = state
        .db
        .list_daily_stats_range(repo.id, &format_date(start), &format_date(end))
        .await?;
    let stats: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "date": row.date,
                "downloads": row.download_sessions,
                "authenticated": row.authenticated_downloads,
                "anonymous": row.anonymous_downloads,
                "files": row.total_files,
            })
        })
        .collect();
    Ok(Json(json!({
        "stats": stats,
        "period": { "start": format_date(start), "end": format_date(end), "days": days },
    })))
}

#[derive(Debug, Deserialize)]
pub struct TrendingParams {
    #[serde(default = "default_trending_type")]
    pub repo_type: String,
    #[serde(default = "default_trending_days")]
    pub days: i64,
    #[serde(default = "default_trending_limit")]
    pub limit: usize,
}

fn default_trending_type() -> String {
    "model".to_string()
}

fn default_trending_days() -> i64 {
    7
}

fn default_trending_limit() -> usize {
    20
}

/// GET `/api/trending`
pub async fn trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo_type = RepoType::parse(&params.repo_type)
        .ok_or(kohakuhub_core::HubError::InvalidRepoType(params.repo_type.clone()))?;
    let days = params.days.clamp(1, 90);
    let limit = params.limit.clamp(1, 100);

    let today = Utc::now().date_naive();
    let start = today - Duration::days(days - 1);
    let samples = state
        .db
        .list_trending_samples(repo_type.as_str(), &format_date(start))
        .await?;

    let scores = trending_scores(&samples, today);
    let mut ranked: Vec<(i64, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);

    let mut items = Vec::with_capacity(ranked.len());
    for (repo_id, score) in ranked {
        let Some(repo) = state.db.get_repository_by_id(repo_id).await? else {
            continue;
        };
        if repo.private {
            continue;
        }
        items.push(json!({
            "id": repo.full_id,
            "type": repo.repo_type,
            "downloads": repo.downloads,
            "likes": repo.likes_count,
            "trending_score": score,
            "private": repo.private,
        }));
    }

    Ok(Json(json!({
        "trending": items,
        "period": { "start": format_date(start), "end": format_date(today), "days": days },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(repo: i64, date: &str, downloads: i64) -> TrendingSample {
        TrendingSample {
            repository_id: repo,
            date: date.to_string(),
            download_sessions: downloads,
        }
    }

    #[test]
    fn today_outweighs_history() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        // Repo 1: 50 downloads today. Repo 2: 50 downloads six days ago.
        let samples = vec![
            sample(1, "2025-06-10", 50),
            sample(2, "2025-06-04", 50),
        ];
        let scores = trending_scores(&samples, today);
        assert!(scores[&1] > scores[&2]);
        // Same activity, decayed by 0.8^6.
        let expected_ratio = TRENDING_DECAY.powi(6);
        let actual_ratio = scores[&2] / scores[&1];
        assert!((actual_ratio - expected_ratio).abs() < 1e-9);
    }

    #[test]
    fn log_scaling_compresses_large_counts() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let samples = vec![
            sample(1, "2025-06-10", 10),
            sample(2, "2025-06-10", 1000),
        ];
        let scores = trending_scores(&samples, today);
        // 100x the downloads is far less than 100x the score.
        assert!(scores[&2] / scores[&1] < 4.0);
    }

    #[test]
    fn multi_day_scores_accumulate() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let samples = vec![
            sample(1, "2025-06-10", 10),
            sample(1, "2025-06-09", 10),
            sample(1, "2025-06-08", 10),
        ];
        let scores = trending_scores(&samples, today);
        let daily = (11f64).ln();
        let expected = daily * (1.0 + TRENDING_DECAY + TRENDING_DECAY * TRENDING_DECAY);
        assert!((scores[&1] - expected).abs() < 1e-9);
    }

    #[test]
    fn malformed_dates_are_skipped() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let samples = vec![sample(1, "not-a-date", 10)];
        assert!(trending_scores(&samples, today).is_empty());
    }
}
