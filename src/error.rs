use thiserror::Error;

pub type Result<T> = std::result::Result<T, SaleError>;

#[derive(Error, Debug)]
pub enum SaleError {
    /// Unexpected storage or logic failure. The source is kept for logs but
    /// never shown to callers.
    #[error("internal error")]
    InternalError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("sale lock unavailable")]
    LockUnavailable,
    #[error("no open sub-round left to sell")]
    RoundExhausted,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("{source}; rolling back transaction: {rollback}")]
    Rollback {
        source: Box<SaleError>,
        rollback: Box<SaleError>,
    },
}

impl SaleError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(msg.into())))
    }

    /// Stable key surfaced to callers in structured replies.
    pub fn msg_key(&self) -> &'static str {
        match self {
            Self::InternalError(_) | Self::Rollback { .. } => "ERROR_INTERNAL",
            Self::InsufficientBalance => "ERROR_BALANCE_NOT_ENOUGH",
            Self::LockUnavailable => "ERROR_LOCK",
            Self::RoundExhausted => "ERROR_ROUND_EXHAUSTED",
            Self::NotFound(_) => "ERROR_NOT_FOUND",
            Self::Unauthorized => "ERROR_UNAUTHORIZED",
            Self::ValidationError(_) => "ERROR_VALIDATION",
            Self::DeadlineExceeded => "ERROR_DEADLINE_EXCEEDED",
        }
    }

    /// Expected business outcomes are reported as failure replies rather
    /// than propagated to the transport.
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::InternalError(_) | Self::Rollback { .. })
    }
}

impl From<std::io::Error> for SaleError {
    fn from(e: std::io::Error) -> Self {
        Self::InternalError(Box::new(e))
    }
}

impl From<csv::Error> for SaleError {
    fn from(e: csv::Error) -> Self {
        Self::InternalError(Box::new(e))
    }
}

impl From<serde_json::Error> for SaleError {
    fn from(e: serde_json::Error) -> Self {
        Self::InternalError(Box::new(e))
    }
}

impl From<rust_decimal::Error> for SaleError {
    fn from(e: rust_decimal::Error) -> Self {
        Self::ValidationError(e.to_string())
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for SaleError {
    fn from(e: rocksdb::Error) -> Self {
        Self::InternalError(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error_hides_details() {
        let err = SaleError::internal("connection reset by peer");
        assert_eq!(err.to_string(), "internal error");
        assert_eq!(err.msg_key(), "ERROR_INTERNAL");
        assert!(!err.is_business());
    }

    #[test]
    fn test_rollback_keeps_both_causes() {
        let err = SaleError::Rollback {
            source: Box::new(SaleError::InsufficientBalance),
            rollback: Box::new(SaleError::internal("tx gone")),
        };
        assert_eq!(
            err.to_string(),
            "insufficient balance; rolling back transaction: internal error"
        );
        assert!(!err.is_business());
    }

    #[test]
    fn test_business_errors() {
        assert!(SaleError::InsufficientBalance.is_business());
        assert!(SaleError::RoundExhausted.is_business());
        assert_eq!(SaleError::LockUnavailable.msg_key(), "ERROR_LOCK");
    }
}
