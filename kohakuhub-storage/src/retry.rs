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

//! Jittered exponential backoff for idempotent storage calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::StorageError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 200;

/// Run `op` up to three times, backing off on transient failures only.
/// Non-idempotent operations must not go through here.
pub(crate) async fn retry_idempotent<F, Fut, T>(name: &str, mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let exp = BASE_DELAY_MS * (1 << attempt);
                let jitter = rand::thread_rng().gen_range(0..exp / 2 + 1);
                let delay = Duration::from_millis(exp + jitter);
                tracing::warn!(
                    "{name}: transient failure (attempt {}), retrying in {:?}: {err}",
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_idempotent("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StorageError::Transient("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_definite_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_idempotent("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::NotFound("x".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_idempotent("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::Transient("still down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
