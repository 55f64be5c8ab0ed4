use crate::api::ApiResponse;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};

/// Errors raised by the catalog, the study session state machine and storage
#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    DuplicateName(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Cannot start a study session without cards")]
    EmptySession,

    #[error("Catalog is unreadable: {0}")]
    CorruptState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StudyError>;

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] anyhow::Error),

    #[error("Resource already exists: {0}")]
    DuplicateResource(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<StudyError> for ApiError {
    fn from(err: StudyError) -> Self {
        match err {
            StudyError::NotFound(what) => ApiError::NotFound(what),
            StudyError::DuplicateName(what) => ApiError::DuplicateResource(what),
            StudyError::InvalidState(message) => ApiError::Conflict(message),
            StudyError::EmptySession => ApiError::BadRequest(err.to_string()),
            StudyError::Validation(message) => ApiError::ValidationError(message),
            StudyError::CorruptState(_) | StudyError::Io(_) | StudyError::Json(_) => {
                ApiError::StorageError(anyhow::Error::from(err))
            }
        }
    }
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    StatusCode::NOT_FOUND,
                    Json(ApiResponse::error(
                        context
                            .user_friendly_message
                            .unwrap_or_else(|| self.to_string()),
                    )),
                )
            }
            ApiError::ValidationError(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Validation error"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::DuplicateResource(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Duplicate resource"
                );
                (
                    StatusCode::CONFLICT,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::Conflict(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Request conflicts with current state"
                );
                (
                    StatusCode::CONFLICT,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::BadRequest(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Bad request"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::StorageError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Storage error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(
                        context.user_friendly_message.unwrap_or_else(|| {
                            "Saving your flashcards failed. Please try again.".to_string()
                        }),
                    )),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let context = ErrorContext::new("create_card", "card")
            .with_id("Biology/Cells")
            .with_user_message("Custom message");

        assert_eq!(context.operation, "create_card");
        assert_eq!(context.resource_type, "card");
        assert_eq!(context.resource_id, Some("Biology/Cells".to_string()));
        assert_eq!(
            context.user_friendly_message,
            Some("Custom message".to_string())
        );
    }

    #[test]
    fn test_study_error_classification() {
        let classified = ApiError::from(StudyError::NotFound("class 'Biology'".to_string()));
        assert!(matches!(classified, ApiError::NotFound(_)));
        assert_eq!(classified.to_string(), "Resource not found: class 'Biology'");

        let classified = ApiError::from(StudyError::DuplicateName("class 'Biology'".to_string()));
        assert!(matches!(classified, ApiError::DuplicateResource(_)));

        let classified = ApiError::from(StudyError::InvalidState("mark before reveal".to_string()));
        assert!(matches!(classified, ApiError::Conflict(_)));

        let classified = ApiError::from(StudyError::EmptySession);
        assert!(matches!(classified, ApiError::BadRequest(_)));

        let classified = ApiError::from(StudyError::CorruptState("bad json".to_string()));
        assert!(matches!(classified, ApiError::StorageError(_)));
    }

    #[test]
    fn test_api_error_responses() {
        let context = ErrorContext::new("get_card", "card").with_id("123");
        let (status, _) = ApiError::NotFound("card".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::NOT_FOUND);

        let context = ErrorContext::new("create_card", "card");
        let (status, _) =
            ApiError::ValidationError("blank question".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let context = ErrorContext::new("create_class", "class");
        let (status, _) =
            ApiError::DuplicateResource("class".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::CONFLICT);

        let context = ErrorContext::new("mark", "session");
        let (status, _) = ApiError::from(StudyError::InvalidState("idle".to_string()))
            .to_response_with_context(context);
        assert_eq!(status, StatusCode::CONFLICT);

        let context = ErrorContext::new("save", "catalog");
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let (status, body) = ApiError::from(StudyError::Io(io)).to_response_with_context(context);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.0.error.unwrap_or_default().contains("read-only"));
    }
}
