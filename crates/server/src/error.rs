use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use bazaar_agent::AgentError;
use bazaar_core::errors::{ApplicationError, DomainError, InterfaceError};
use bazaar_db::cart::CartError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub correlation_id: String,
}

/// Handler failure, already mapped to its client-facing shape.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApplicationError::Domain(DomainError::Validation(message.into())).into()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApplicationError::Unauthorized(message.into()).into()
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        match &value {
            ApplicationError::Persistence(_)
            | ApplicationError::Integration(_)
            | ApplicationError::Configuration(_) => error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                error = %value,
                "request failed on an internal error"
            ),
            _ => warn!(
                event_name = "api.request.rejected",
                correlation_id = %correlation_id,
                error = %value,
                "request rejected"
            ),
        }
        Self(value.into_interface(correlation_id))
    }
}

impl From<CartError> for ApiError {
    fn from(value: CartError) -> Self {
        ApplicationError::from(value).into()
    }
}

impl From<AgentError> for ApiError {
    fn from(value: AgentError) -> Self {
        ApplicationError::from(value).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.client_detail().map(str::to_string),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use bazaar_core::domain::cart::CartId;
    use bazaar_core::errors::{ApplicationError, ResourceKind};
    use bazaar_db::cart::CartError;

    use super::ApiError;

    #[test]
    fn cart_errors_map_to_client_statuses() {
        let missing = ApiError::from(CartError::CartNotFound(CartId("AB12CD34".to_string())));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.0.client_detail(), Some("cart not found: AB12CD34"));

        let full = ApiError::from(CartError::Capacity { max: 5 });
        assert_eq!(full.status(), StatusCode::CONFLICT);

        let invalid = ApiError::bad_request("quantity must be greater than zero");
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_failures_hide_their_detail() {
        let failed = ApiError::from(ApplicationError::Persistence("redis is down".to_string()));
        assert_eq!(failed.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(failed.0.client_detail(), None);

        let product = ApiError::from(ApplicationError::not_found(ResourceKind::Product, 7));
        assert_eq!(product.status(), StatusCode::NOT_FOUND);
    }
}
