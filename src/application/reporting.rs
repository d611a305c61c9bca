use crate::domain::money::round_minor;
use crate::domain::ports::{LedgerFilter, LedgerRepositoryRef};
use crate::domain::report::{ReportQuery, TransactionStats};
use crate::domain::transaction::{TransactionStatus, TransactionType};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;

/// Read-only aggregates over the ledger.
pub struct Reporting {
    ledger: LedgerRepositoryRef,
}

impl Reporting {
    pub fn new(ledger: LedgerRepositoryRef) -> Self {
        Self { ledger }
    }

    /// Count, sum, average, min and max of completed principal legs in the
    /// range, plus the share of finished records that completed.
    ///
    /// Fee legs are left out; pending records count toward neither side of
    /// the success rate.
    pub async fn aggregate(&self, query: &ReportQuery) -> Result<TransactionStats> {
        if query.from > query.to {
            return Err(PaymentError::ValidationError(
                "report range starts after it ends".to_string(),
            ));
        }
        let filter = LedgerFilter {
            party: query.account.clone(),
            exclude_type: Some(TransactionType::Fee),
            since: Some(query.from),
            until: Some(query.to),
            ..Default::default()
        };
        let records = self.ledger.scan(&filter).await?;

        let finished = records.iter().filter(|tx| tx.status.is_terminal()).count();
        let amounts: Vec<Decimal> = records
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .map(|tx| tx.amount)
            .collect();

        if amounts.is_empty() {
            return Ok(TransactionStats::empty());
        }

        let count = amounts.len() as u64;
        let sum: Decimal = amounts.iter().sum();
        Ok(TransactionStats {
            count,
            sum,
            average: round_minor(sum / Decimal::from(count)),
            min: amounts.iter().min().copied(),
            max: amounts.iter().max().copied(),
            success_rate: (Decimal::from(count) / Decimal::from(finished)).round_dp(4),
        })
    }
}
