use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    /// Processor unreachable, timed out, or answered with a 5xx.
    #[error("Payment processor unavailable: {0}")]
    Processor(String),

    /// Processor understood the request and refused it (4xx).
    #[error("Payment processor rejected the request: {0}")]
    ProcessorRejected(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Missing or invalid credentials")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    DatabaseError,
    ProcessorUnavailable,
    ProcessorRejected,
    InvalidInput,
    InvalidSignature,
    Unauthorized,
    Forbidden,
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::ProcessorUnavailable => "PROCESSOR_UNAVAILABLE",
            ErrorCode::ProcessorRejected => "PROCESSOR_REJECTED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::Processor(_) => ErrorCode::ProcessorUnavailable,
            AppError::ProcessorRejected(_) => ErrorCode::ProcessorRejected,
            AppError::InvalidInput(_) => ErrorCode::InvalidInput,
            AppError::InvalidSignature(_) => ErrorCode::InvalidSignature,
            AppError::Unauthorized => ErrorCode::Unauthorized,
            AppError::Forbidden => ErrorCode::Forbidden,
            AppError::NotFound => ErrorCode::NotFound,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Determines if a webhook processing error should trigger a processor retry.
///
/// Returns `true` if the error is transient, meaning the webhook should answer
/// 5xx so the processor redelivers the event.
///
/// Returns `false` for expected conditions (unknown customer, malformed data,
/// refused parameters) that will not change on retry; those are logged and
/// acknowledged with 2xx.
pub fn is_retryable_error(error: &AppError) -> bool {
    match error {
        // Transient errors - retry may succeed
        AppError::Database(_) => true,
        AppError::Processor(_) => true,
        AppError::Internal(_) => true,

        // Expected conditions - won't change with retry
        AppError::ProcessorRejected(_) => false,
        AppError::InvalidInput(_) => false,
        AppError::InvalidSignature(_) => false,
        AppError::Unauthorized => false,
        AppError::Forbidden => false,
        AppError::NotFound => false,
    }
}

pub type AppResult<T> = Result<T, AppError>;
