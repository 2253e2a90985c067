//! HTTP responses for scoping failures.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use orgscope_core::{ErrorCode, RejectReason, ScopeError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Seconds a client should wait before retrying after pool exhaustion.
pub const RETRY_AFTER_SECS: u64 = 1;

/// A request that could not be scoped to a tenant.
///
/// The response body is `{"error": {"code": "...", "message": "..."}}` and
/// never names an organization or user.
#[derive(Error, Debug)]
pub enum ScopeRejection {
    /// Resolution, leasing, binding or a query failed.
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// The handler asked for scoped state the layer did not provide.
    #[error("request is not tenant scoped: {0}")]
    NotScoped(&'static str),

    /// The unit of work is already borrowed by another extractor.
    #[error("tenant connection already borrowed")]
    AlreadyBorrowed,
}

impl ScopeRejection {
    /// HTTP status for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Scope(e) => status_for(e),
            Self::NotScoped(_) | Self::AlreadyBorrowed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code reported to the caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Scope(e) => e.code(),
            Self::NotScoped(_) | Self::AlreadyBorrowed => ErrorCode::Internal,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::Scope(e) => e.public_message(),
            Self::NotScoped(_) | Self::AlreadyBorrowed => "internal server error",
        }
    }
}

fn status_for(err: &ScopeError) -> StatusCode {
    match err {
        ScopeError::ContextResolution {
            reason: RejectReason::Unauthenticated,
            ..
        } => StatusCode::UNAUTHORIZED,
        ScopeError::ContextResolution { .. } | ScopeError::PolicyViolation(_) => {
            StatusCode::FORBIDDEN
        }
        ScopeError::PoolExhausted { .. }
        | ScopeError::Binding(_)
        | ScopeError::StaleContext(_)
        | ScopeError::Reset(_)
        | ScopeError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
        ScopeError::Database(_)
        | ScopeError::Config(_)
        | ScopeError::InvalidTransition(_)
        | ScopeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ScopeRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = %self.code(), error = %self, "Request failed while scoped");
        }

        let body = json!({
            "error": {
                "code": self.code().as_str(),
                "message": self.public_message(),
            }
        });
        let mut response = (status, Json(body)).into_response();

        if matches!(&self, Self::Scope(e) if e.is_retryable()) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ScopeError::rejected(RejectReason::Missing, "x"), StatusCode::FORBIDDEN),
            (ScopeError::rejected(RejectReason::NotAMember, "x"), StatusCode::FORBIDDEN),
            (ScopeError::rejected(RejectReason::Unauthenticated, "x"), StatusCode::UNAUTHORIZED),
            (ScopeError::pool_exhausted(5000), StatusCode::SERVICE_UNAVAILABLE),
            (ScopeError::binding("x"), StatusCode::SERVICE_UNAVAILABLE),
            (ScopeError::stale("x"), StatusCode::SERVICE_UNAVAILABLE),
            (ScopeError::policy_violation("x"), StatusCode::FORBIDDEN),
            (ScopeError::database("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ScopeRejection::from(err).status(), status);
        }
    }

    #[test]
    fn test_retry_after_only_when_exhausted() {
        let busy = ScopeRejection::from(ScopeError::pool_exhausted(5000)).into_response();
        assert_eq!(busy.headers()[header::RETRY_AFTER], "1");

        let stale = ScopeRejection::from(ScopeError::stale("x")).into_response();
        assert!(stale.headers().get(header::RETRY_AFTER).is_none());
    }
}
