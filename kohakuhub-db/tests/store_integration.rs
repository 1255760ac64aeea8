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

//! Store-level integration tests: size-column width, commit ordering
//! and LFS history dedup across a realistic sequence of operations.

use kohakuhub_core::RepoType;
use kohakuhub_db::{CommitApply, Db, FileUpsert, NewRepository, NewUser};

async fn fixture() -> (Db, i64, i64) {
    let db = Db::connect("sqlite::memory:").await.expect("db");
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
            name: "weights",
            private: false,
            owner_id: user.id,
            quota_bytes: None,
        })
        .await
        .unwrap();
    (db, user.id, repo.id)
}

fn apply(repo_id: i64, user_id: i64, commit_id: &str, files: Vec<FileUpsert>, delta: i64) -> CommitApply {
    CommitApply {
        repository_id: repo_id,
        repo_type: "model".into(),
        branch: "main".into(),
        commit_id: commit_id.into(),
        author_id: Some(user_id),
        username: "alice".into(),
        message: format!("commit {commit_id}"),
        description: String::new(),
        file_upserts: files,
        used_delta: delta,
        owner_id: user_id,
        owner_private: false,
        lfs_touches: Vec::new(),
    }
}

fn lfs_file(path: &str, sha: &str, size: i64) -> FileUpsert {
    FileUpsert {
        path_in_repo: path.into(),
        sha256: sha.into(),
        size,
        lfs: true,
        is_deleted: false,
    }
}

#[tokio::test]
async fn sizes_beyond_32_bits_survive_round_trip() {
    let (db, user_id, repo_id) = fixture().await;

    // 2^31, 2^32 and 2^34 must store without truncation.
    for (i, size) in [(1i64, 1i64 << 31), (2, 1i64 << 32), (3, 1i64 << 34)] {
        let path = format!("blob{i}.bin");
        let sha = format!("{i:064}");
        db.apply_commit(apply(
            repo_id,
            user_id,
            &format!("c{i}"),
            vec![lfs_file(&path, &sha, size)],
            size,
        ))
        .await
        .unwrap();

        let row = db.get_live_file(repo_id, &path).await.unwrap().unwrap();
        assert_eq!(row.size, size);
    }

    let repo = db.get_repository_by_id(repo_id).await.unwrap().unwrap();
    assert_eq!(repo.used_bytes, (1i64 << 31) + (1i64 << 32) + (1i64 << 34));
    let user = db.get_user_by_id(user_id).await.unwrap().unwrap();
    assert_eq!(user.public_used_bytes, repo.used_bytes);
}

#[tokio::test]
async fn commit_history_preserves_order_per_branch() {
    let (db, user_id, repo_id) = fixture().await;

    for i in 1..=5 {
        db.apply_commit(apply(repo_id, user_id, &format!("c{i}"), vec![], 0))
            .await
            .unwrap();
    }

    let commits = db.list_commits(repo_id, "main", 10).await.unwrap();
    let ids: Vec<_> = commits.iter().map(|c| c.commit_id.as_str()).collect();
    // Newest first.
    assert_eq!(ids, vec!["c5", "c4", "c3", "c2", "c1"]);

    // Other branches stay separate.
    assert!(db.list_commits(repo_id, "dev", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn lfs_history_has_one_row_per_sha() {
    let (db, user_id, repo_id) = fixture().await;
    let sha = "ab".repeat(32);

    // The same object lands at two paths in two commits.
    db.apply_commit(CommitApply {
        lfs_touches: vec![(sha.clone(), 100)],
        ..apply(repo_id, user_id, "c1", vec![lfs_file("a.bin", &sha, 100)], 100)
    })
    .await
    .unwrap();
    db.apply_commit(CommitApply {
        lfs_touches: vec![(sha.clone(), 100)],
        ..apply(repo_id, user_id, "c2", vec![lfs_file("b.bin", &sha, 100)], 0)
    })
    .await
    .unwrap();

    let history = db.get_lfs_object(&sha).await.unwrap().unwrap();
    assert_eq!(history.size, 100);
    // Two live paths, one repo referencing the sha.
    assert_eq!(db.count_repos_referencing_sha256(&sha).await.unwrap(), 1);

    // Tombstoning one path keeps the reference alive.
    db.upsert_file(repo_id, "a.bin", &sha, 100, true, true)
        .await
        .unwrap();
    assert_eq!(db.count_repos_referencing_sha256(&sha).await.unwrap(), 1);

    // Tombstoning the last path releases it.
    db.upsert_file(repo_id, "b.bin", &sha, 100, true, true)
        .await
        .unwrap();
    assert_eq!(db.count_repos_referencing_sha256(&sha).await.unwrap(), 0);
}
