use axum::http::StatusCode;
use std::fmt;

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Request used a method other than POST.
    MethodNotAllowed(String),
    /// Route is not part of the webhook allow-list.
    NotFound(String),
    /// Body could not be decoded into the event expected by the route.
    BadRequest(String),
    /// Event decoded but lacks an identity field the lead needs.
    Validation(String),
    /// Remote CRM call failed or was rejected.
    CrmError(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// HTTP status this error maps to at the router boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::CrmError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::WithContext { source, .. } => source.status(),
        }
    }

    /// Message that is safe to hand back to the webhook caller.
    ///
    /// Remote and internal failures collapse to a generic text so that CRM
    /// responses and transport details never leak.
    pub fn public_message(&self) -> String {
        match self {
            AppError::MethodNotAllowed(_) => {
                "Method Not Allowed. Only POST is accepted.".to_string()
            }
            AppError::NotFound(_) => "Resource not found".to_string(),
            AppError::BadRequest(_) => "Invalid JSON data".to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::CrmError(_) | AppError::InternalError(_) => {
                "Internal server error".to_string()
            }
            AppError::WithContext { source, .. } => source.public_message(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MethodNotAllowed(method) => write!(f, "Method not allowed: {}", method),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::CrmError(msg) => write!(f, "CRM error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crm_error_hides_details() {
        let err = AppError::CrmError("crm.lead.add returned ACCESS_DENIED".to_string());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_context_keeps_source_status() {
        let err: Result<(), AppError> = Err(AppError::Validation("Missing clientPhone".into()));
        let err = err.with_context(|| "building lead draft".to_string()).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Missing clientPhone");
        assert!(err.to_string().starts_with("building lead draft: "));
    }

    #[test]
    fn test_method_not_allowed_maps_to_405() {
        let err = AppError::MethodNotAllowed("GET".into());
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
