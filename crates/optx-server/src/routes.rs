//! # HTTP Route Handlers
//!
//! Service endpoints that do not run a search, plus the error type shared by all
//! handlers.
//!
//! ## Error Handling
//!
//! Errors are returned as a JSON body `{"error": "..."}` with a status code:
//! - 400 Bad Request: malformed join graph, rank out of range, request over limits
//! - 500 Internal Server Error: the search itself aborted (cycle, job budget,
//!   rule failure, corrupted memo)

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use optx_core::error::OptError;
use optx_core::rule::RuleInfo;
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Search(#[from] OptError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Search(err) if err.is_fatal() => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Search(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /rules: every registry slot, retired ones included.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<RulesResponse> {
    Json(RulesResponse {
        rules: state.rule_registry.describe(),
        source_type: state.config.search.source_type.clone(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesResponse {
    pub rules: Vec<RuleInfo>,
    /// Source type searches run with unless a request names its own.
    pub source_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ServerConfig;

    #[tokio::test]
    async fn test_list_rules() {
        let state = Arc::new(AppState::new(ServerConfig::default()).unwrap());
        let Json(resp) = list_rules(State(state)).await;
        assert_eq!(resp.rules.len(), 15);
        assert!(resp.rules[4].retired);
        assert_eq!(resp.rules[0].name, "JoinCommutativity");
        assert!(resp.source_type.is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::bad_request("no tables").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(OptError::RankOutOfRange { rank: 9, count: 8 }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(OptError::ResourceExhausted { limit: 10 }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(OptError::StructuralCycle("group 3".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
