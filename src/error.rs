use crate::domain::limits::LimitWindow;
use crate::domain::qr::QrRejection;
use crate::domain::wallet::AccountId;
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient balance on {account}: available {available}, required {required}")]
    InsufficientBalance {
        account: AccountId,
        available: Decimal,
        required: Decimal,
    },

    #[error("Wallet {0} is locked")]
    WalletLocked(AccountId),

    #[error("Wallet not found: {0}")]
    WalletNotFound(AccountId),

    #[error("Wallet already exists for {0}")]
    DuplicateWallet(AccountId),

    #[error("{window} limit exceeded: {spent} spent + {attempted} attempted > {ceiling}")]
    LimitExceeded {
        window: LimitWindow,
        ceiling: Decimal,
        spent: Decimal,
        attempted: Decimal,
    },

    #[error("QR code rejected: {0}")]
    QrInvalid(#[from] QrRejection),

    #[error("QR code not found: {0}")]
    QrNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transaction {0} has already been refunded")]
    DuplicateRefund(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Reconciliation required for {tx_id}: {detail}")]
    CriticalReconciliationRequired { tx_id: String, detail: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(e: rocksdb::Error) -> Self {
        PaymentError::InternalError(Box::new(e))
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(e: serde_json::Error) -> Self {
        PaymentError::InternalError(Box::new(e))
    }
}

impl PaymentError {
    /// Stable error code for callers that map errors onto their own surface.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ValidationError(_) => "VALIDATION_ERROR",
            PaymentError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            PaymentError::WalletLocked(_) => "WALLET_LOCKED",
            PaymentError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            PaymentError::DuplicateWallet(_) => "DUPLICATE_WALLET",
            PaymentError::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            PaymentError::QrInvalid(rejection) => rejection.code(),
            PaymentError::QrNotFound(_) => "QR_NOT_FOUND",
            PaymentError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            PaymentError::DuplicateRefund(_) => "DUPLICATE_REFUND",
            PaymentError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            PaymentError::TransactionFailed(_) => "TRANSACTION_FAILED",
            PaymentError::CriticalReconciliationRequired { .. } => "RECONCILIATION_REQUIRED",
            PaymentError::ConfigError(_) => "CONFIG_ERROR",
            PaymentError::CsvError(_) => "CSV_ERROR",
            PaymentError::IoError(_) => "IO_ERROR",
            PaymentError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Infrastructure failures may succeed on retry; domain rejections never will.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::TransactionFailed(_)
                | PaymentError::InternalError(_)
                | PaymentError::IoError(_)
        )
    }

    /// Money may have moved without a matching ledger entry. Operators must be paged.
    pub fn is_critical(&self) -> bool {
        matches!(self, PaymentError::CriticalReconciliationRequired { .. })
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        PaymentError::InternalError(Box::new(std::io::Error::other(msg.into())))
    }
}
