use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalletEngineError>;

#[derive(Error, Debug)]
pub enum WalletEngineError {
    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient balance in wallet {wallet_id}: required {required}, available {available}")]
    InsufficientBalance {
        wallet_id: i64,
        required: i64,
        available: i64,
    },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i64,
        available: i64,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Duplicate operation: {0}")]
    DuplicateOperation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WalletEngineError {
    fn from(err: serde_json::Error) -> Self {
        WalletEngineError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl WalletEngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        WalletEngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable tag used in logs and metric labels.
    pub fn error_type(&self) -> &'static str {
        match self {
            WalletEngineError::Storage(_) => "storage_error",
            WalletEngineError::Config(_) => "config_error",
            WalletEngineError::NotFound { .. } => "not_found",
            WalletEngineError::InsufficientBalance { .. } => "insufficient_balance",
            WalletEngineError::InsufficientStock { .. } => "insufficient_stock",
            WalletEngineError::InvalidState(_) => "invalid_state",
            WalletEngineError::Expired(_) => "expired",
            WalletEngineError::DuplicateOperation(_) => "duplicate_operation",
            WalletEngineError::Validation(_) => "validation_error",
            WalletEngineError::Unauthorized(_) => "unauthorized",
            WalletEngineError::Internal(_) => "internal_error",
        }
    }

    /// True for expected domain rejections, false for infrastructure faults.
    pub fn is_business_rejection(&self) -> bool {
        !matches!(
            self,
            WalletEngineError::Storage(_)
                | WalletEngineError::Config(_)
                | WalletEngineError::Internal(_)
        )
    }

    /// Maps a unique-constraint violation to the given domain error and keeps
    /// every other database error as a storage fault.
    pub(crate) fn on_unique_violation(err: sqlx::Error, duplicate: impl FnOnce() -> Self) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => duplicate(),
            _ => WalletEngineError::Storage(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_tags() {
        assert_eq!(WalletEngineError::not_found("wallet", 7).error_type(), "not_found");
        assert_eq!(
            WalletEngineError::InsufficientBalance {
                wallet_id: 1,
                required: 10,
                available: 5
            }
            .error_type(),
            "insufficient_balance"
        );
        assert_eq!(
            WalletEngineError::DuplicateOperation("x".into()).error_type(),
            "duplicate_operation"
        );
    }

    #[test]
    fn test_business_rejection_split() {
        assert!(WalletEngineError::Expired("token".into()).is_business_rejection());
        assert!(WalletEngineError::Validation("amount".into()).is_business_rejection());
        assert!(!WalletEngineError::Internal("boom".into()).is_business_rejection());
        assert!(!WalletEngineError::Storage(sqlx::Error::RowNotFound).is_business_rejection());
    }

    #[test]
    fn test_not_found_message() {
        let err = WalletEngineError::not_found("payment token", "abc");
        assert_eq!(err.to_string(), "payment token not found: abc");
    }
}
