//! Crate-wide error taxonomy for the keel container engine.
//!
//! `EngineError` is the single error type returned across component
//! boundaries (Graph, Storage, Container Store, Network, API). Component
//! modules may define their own richer error enums internally and convert
//! into `EngineError` via `#[from]` at the boundary.

use thiserror::Error;

/// Stable machine code for each error kind, exposed over the API as
/// `{"message": ..., "code": ...}` alongside the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    NameConflict,
    StateConflict,
    InUse,
    InvalidArgument,
    PortInUse,
    NoAvailableIp,
    StartFailed,
    CorruptLayer,
    DriverError,
    Canceled,
    Internal,
}

/// Top-level error type returned by every public keel operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("name conflict: {0}")]
    NameConflict(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("in use: {0}")]
    InUse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("port in use: {0}")]
    PortInUse(String),

    #[error("no available ip: {0}")]
    NoAvailableIp(String),

    #[error("start failed: {0}")]
    StartFailed(String),

    #[error("corrupt layer: {0}")]
    CorruptLayer(String),

    #[error("storage driver error: {0}")]
    DriverError(String),

    #[error("canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Stable machine code, independent of the human-readable message.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::NameConflict(_) => ErrorCode::NameConflict,
            EngineError::StateConflict(_) => ErrorCode::StateConflict,
            EngineError::InUse(_) => ErrorCode::InUse,
            EngineError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            EngineError::PortInUse(_) => ErrorCode::PortInUse,
            EngineError::NoAvailableIp(_) => ErrorCode::NoAvailableIp,
            EngineError::StartFailed(_) => ErrorCode::StartFailed,
            EngineError::CorruptLayer(_) => ErrorCode::CorruptLayer,
            EngineError::DriverError(_) => ErrorCode::DriverError,
            EngineError::Canceled => ErrorCode::Canceled,
            EngineError::Internal(_) | EngineError::Io(_) | EngineError::Json(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// HTTP status code for this error kind, per the API error table.
    pub fn http_status(&self) -> u16 {
        match self.code() {
            ErrorCode::NotFound => 404,
            ErrorCode::NameConflict | ErrorCode::StateConflict | ErrorCode::InUse => 409,
            ErrorCode::InvalidArgument => 400,
            ErrorCode::Canceled => 499,
            ErrorCode::PortInUse
            | ErrorCode::NoAvailableIp
            | ErrorCode::StartFailed
            | ErrorCode::CorruptLayer
            | ErrorCode::DriverError
            | ErrorCode::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_conflict_maps_to_409() {
        let err = EngineError::StateConflict("already running".into());
        assert_eq!(err.http_status(), 409);
        assert_eq!(err.code(), ErrorCode::StateConflict);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = EngineError::NotFound("abc123".into());
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn canceled_maps_to_499() {
        assert_eq!(EngineError::Canceled.http_status(), 499);
    }
}
