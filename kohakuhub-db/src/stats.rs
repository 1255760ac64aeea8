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

//! Daily download-statistics accessors.

use crate::entities::DailyRepoStats;
use crate::{Db, Result};

/// A (repository, date, downloads) triple for trending computation.
#[derive(Debug, Clone)]
pub struct TrendingSample {
    pub repository_id: i64,
    pub date: String,
    pub download_sessions: i64,
}

impl Db {
    /// Record one download event on the given UTC day.
    ///
    /// `new_session` increments the deduplicated session counter;
    /// `authenticated` routes the raw event to the right column.
    pub async fn record_download(
        &self,
        repository_id: i64,
        date: &str,
        new_session: bool,
        authenticated: bool,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"
            INSERT INTO daily_repo_stats
                (repository_id, date, download_sessions, authenticated_downloads,
                 anonymous_downloads, total_files)
            VALUES ($1, $2, 0, 0, 0, 0)
            ON CONFLICT (repository_id, date) DO NOTHING
            "#,
        )
        .bind(repository_id)
        .bind(date)
        .execute(&mut *tx)
        .await?;

        let session_inc = new_session as i64;
        let auth_inc = authenticated as i64;
        let anon_inc = !authenticated as i64;
        sqlx::query(
            r#"
            UPDATE daily_repo_stats
            SET download_sessions = download_sessions + $1,
                authenticated_downloads = authenticated_downloads + $2,
                anonymous_downloads = anonymous_downloads + $3
            WHERE repository_id = $4 AND date = $5
            "#,
        )
        .bind(session_inc)
        .bind(auth_inc)
        .bind(anon_inc)
        .bind(repository_id)
        .bind(date)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert a zero row for a historical day with no recorded events.
    pub async fn backfill_daily_stats(
        &self,
        repository_id: i64,
        date: &str,
        total_files: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_repo_stats
                (repository_id, date, download_sessions, authenticated_downloads,
                 anonymous_downloads, total_files)
            VALUES ($1, $2, 0, 0, 0, $3)
            ON CONFLICT (repository_id, date) DO NOTHING
            "#,
        )
        .bind(repository_id)
        .bind(date)
        .bind(total_files)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_daily_stats(
        &self,
        repository_id: i64,
        date: &str,
    ) -> Result<Option<DailyRepoStats>> {
        let row = sqlx::query(
            "SELECT * FROM daily_repo_stats WHERE repository_id = $1 AND date = $2",
        )
        .bind(repository_id)
        .bind(date)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| DailyRepoStats::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Stats rows for `[start, end]` inclusive, ascending by date.
    pub async fn list_daily_stats_range(
        &self,
        repository_id: i64,
        start: &str,
        end: &str,
    ) -> Result<Vec<DailyRepoStats>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM daily_repo_stats
            WHERE repository_id = $1 AND date >= $2 AND date <= $3
            ORDER BY date ASC
            "#,
        )
        .bind(repository_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| DailyRepoStats::from_row(r).map_err(Into::into))
            .collect()
    }

    /// Download samples since `start` for all public repos of a type.
    pub async fn list_trending_samples(
        &self,
        repo_type: &str,
        start: &str,
    ) -> Result<Vec<TrendingSample>> {
        use sqlx::Row;
        let rows = sqlx::query(
            r#"
            SELECT s.repository_id AS repository_id, s.date AS date,
                   s.download_sessions AS download_sessions
            FROM daily_repo_stats s
            JOIN repository r ON r.id = s.repository_id
            WHERE r.repo_type = $1 AND r.private = 0 AND s.date >= $2
            "#,
        )
        .bind(repo_type)
        .bind(start)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| {
                Ok(TrendingSample {
                    repository_id: r.try_get("repository_id")?,
                    date: r.try_get("date")?,
                    download_sessions: r.try_get("download_sessions")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::repos::NewRepository;
    use crate::testutil::test_db;
    use crate::users::NewUser;
    use kohakuhub_core::RepoType;

    #[tokio::test]
    async fn download_counters_accumulate() {
        let db = test_db().await;
        let user = db
            .create_user(NewUser {
                username: "alice",
                email: "a@x.io",
                password_hash: "h",
                email_verified: true,
                private_quota_bytes: None,
                public_quota_bytes: None,
            })
            .await
            .unwrap();
        let repo = db
            .create_repository(NewRepository {
                repo_type: RepoType::Model,
                namespace: "alice",
                name: "r",
                private: false,
                owner_id: user.id,
                quota_bytes: None,
            })
            .await
            .unwrap();

        db.record_download(repo.id, "2025-06-01", true, true).await.unwrap();
        db.record_download(repo.id, "2025-06-01", false, true).await.unwrap();
        db.record_download(repo.id, "2025-06-01", true, false).await.unwrap();

        let stats = db
            .get_daily_stats(repo.id, "2025-06-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.download_sessions, 2);
        assert_eq!(stats.authenticated_downloads, 2);
        assert_eq!(stats.anonymous_downloads, 1);

        // Backfill never clobbers an existing row.
        db.backfill_daily_stats(repo.id, "2025-06-01", 9).await.unwrap();
        let stats = db
            .get_daily_stats(repo.id, "2025-06-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.download_sessions, 2);

        db.backfill_daily_stats(repo.id, "2025-05-31", 3).await.unwrap();
        let range = db
            .list_daily_stats_range(repo.id, "2025-05-30", "2025-06-02")
            .await
            .unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].date, "2025-05-31");

        let samples = db.list_trending_samples("model", "2025-05-31").await.unwrap();
        assert_eq!(samples.len(), 2);
    }
}
