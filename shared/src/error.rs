use lambda_http::http::StatusCode;

/// Errors surfaced by the shared services.
///
/// Every variant maps to one HTTP status; `Aws`, `Serialization`, `Config` and
/// `Internal` carry detail that is logged but never sent to the caller.
#[derive(Debug, thiserror::Error)]
pub enum LinkHubError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("subscription required: {0}")]
    PaymentRequired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("aws error: {0}")]
    Aws(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LinkHubError>;

impl LinkHubError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Aws(_) | Self::Serialization(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code placed in the `error` field of the body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "InvalidRequest",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::PaymentRequired(_) => "SubscriptionRequired",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::Aws(_) | Self::Serialization(_) | Self::Config(_) | Self::Internal(_) => {
                "InternalError"
            }
        }
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::PaymentRequired(m)
            | Self::NotFound(m)
            | Self::Conflict(m) => m.clone(),
            _ => "An internal error occurred".to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl<E, R> From<aws_sdk_dynamodb::error::SdkError<E, R>> for LinkHubError
where
    E: std::fmt::Debug,
    R: std::fmt::Debug,
{
    fn from(err: aws_sdk_dynamodb::error::SdkError<E, R>) -> Self {
        Self::Aws(format!("{:?}", err))
    }
}

impl From<aws_sdk_dynamodb::error::BuildError> for LinkHubError {
    fn from(err: aws_sdk_dynamodb::error::BuildError) -> Self {
        Self::Internal(format!("failed to build AWS request: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            LinkHubError::PaymentRequired("x".into()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            LinkHubError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            LinkHubError::Aws("throttled".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = LinkHubError::Aws("ResourceNotFoundException: table tiktok-commerce".into());
        assert!(err.is_internal());
        assert_eq!(err.public_message(), "An internal error occurred");
        assert_eq!(err.code(), "InternalError");

        let err = LinkHubError::NotFound("Product not found".into());
        assert_eq!(err.public_message(), "Product not found");
    }
}
