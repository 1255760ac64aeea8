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

//! API error type.
//!
//! Every error response has an EMPTY body; the HuggingFace client reads
//! `X-Error-Code` and `X-Error-Message` from the headers. One mapper here
//! turns every layer's error into that shape.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use kohakuhub_core::HubError;
use kohakuhub_db::DbError;
use kohakuhub_storage::StorageError;

/// Wrapper turning [`HubError`] into an HF-compatible response.
#[derive(Debug)]
pub struct ApiError(pub HubError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            "X-Error-Code",
            HeaderValue::from_static(self.0.code().as_str()),
        );
        // Header values must be latin-1 clean; fall back to the code.
        let message = self.0.to_string();
        headers.insert(
            "X-Error-Message",
            HeaderValue::from_str(&message)
                .unwrap_or_else(|_| HeaderValue::from_static("error")),
        );
        if status.is_server_error() {
            tracing::error!("request failed: {message}");
        } else {
            tracing::debug!("request rejected: {message}");
        }
        response
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        Self(err)
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        let hub = match err {
            DbError::NotFound(what) => HubError::BadRequest(format!("{what} not found")),
            DbError::Conflict(msg) => HubError::BadRequest(msg),
            DbError::Sqlx(e) => HubError::Internal(format!("database: {e}")),
            DbError::Internal(msg) => HubError::Internal(msg),
        };
        Self(hub)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        // Handlers that can interpret a storage 404 contextually check
        // `is_not_found()` before letting the error reach this mapper.
        Self(HubError::Upstream(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_has_headers_and_empty_body() {
        let response = ApiError(HubError::RepoNotFound("u/r".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("X-Error-Code").unwrap(),
            "RepoNotFound"
        );
        assert!(response.headers().get("X-Error-Message").is_some());
    }

    #[test]
    fn quota_maps_to_413() {
        let response = ApiError(HubError::QuotaExceeded {
            bucket: "public".into(),
            delta: 70 << 20,
            used: 40 << 20,
            limit: 100 << 20,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            response.headers().get("X-Error-Code").unwrap(),
            "BadRequest"
        );
        let message = response
            .headers()
            .get("X-Error-Message")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(message.contains("public"));
    }
}
