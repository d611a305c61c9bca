use super::wallet::AccountId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Date-range scope of an aggregate query, optionally narrowed to one account.
#[derive(Debug, Clone)]
pub struct ReportQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub account: Option<AccountId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionStats {
    pub count: u64,
    pub sum: Decimal,
    pub average: Decimal,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    /// Completed over terminal records, as a fraction in `[0, 1]`.
    pub success_rate: Decimal,
}

impl TransactionStats {
    pub fn empty() -> Self {
        Self {
            count: 0,
            sum: Decimal::ZERO,
            average: Decimal::ZERO,
            min: None,
            max: None,
            success_rate: Decimal::ZERO,
        }
    }
}
