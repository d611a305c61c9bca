use crate::domain::limits::{LimitPolicy, LimitWindow};
use crate::domain::ports::{LedgerFilter, LedgerRepositoryRef};
use crate::domain::qr::QrCode;
use crate::domain::transaction::{TransactionStatus, TransactionType};
use crate::domain::wallet::{AccountId, AccountTier};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

/// Rolling-window spend aggregation over completed ledger records.
///
/// Only spending legs count, each with its gross debit (`amount + fee`).
/// Fee legs are skipped since the principal leg already carries the fee;
/// refunds and administrative adjustments never count.
pub struct LimitEnforcer {
    ledger: LedgerRepositoryRef,
    policy: LimitPolicy,
}

impl LimitEnforcer {
    pub fn new(ledger: LedgerRepositoryRef, policy: LimitPolicy) -> Self {
        Self { ledger, policy }
    }

    /// Completed debits of `account` inside `window`, optionally of one type only.
    pub async fn window_total(
        &self,
        account: &AccountId,
        window: LimitWindow,
        kind: Option<TransactionType>,
        now: DateTime<Utc>,
    ) -> Result<Decimal> {
        let filter = LedgerFilter {
            sender: Some(account.clone()),
            ..Self::window_filter(window, now)
        };
        self.sum(&filter, kind).await
    }

    /// Everything charged through `code` inside `window`.
    pub async fn qr_window_total(
        &self,
        code: &str,
        window: LimitWindow,
        now: DateTime<Utc>,
    ) -> Result<Decimal> {
        let filter = LedgerFilter {
            qr_code: Some(code.to_string()),
            ..Self::window_filter(window, now)
        };
        self.sum(&filter, Some(TransactionType::QrPayment)).await
    }

    pub async fn check_limit(
        &self,
        account: &AccountId,
        tier: AccountTier,
        amount: Decimal,
        window: LimitWindow,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let spent = self.window_total(account, window, None, now).await?;
        let ceiling = self.policy.ceiling(tier, window);
        Self::compare(window, ceiling, spent, amount)
    }

    /// Daily and monthly account-level ceilings.
    pub async fn check_account(
        &self,
        account: &AccountId,
        tier: AccountTier,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for window in LimitWindow::ALL {
            self.check_limit(account, tier, amount, window, now).await?;
        }
        Ok(())
    }

    /// QR-level ceilings. Windows without a QR ceiling are not checked here;
    /// the account-level check still applies, so the lower ceiling wins.
    pub async fn check_qr(&self, code: &QrCode, amount: Decimal, now: DateTime<Utc>) -> Result<()> {
        for window in LimitWindow::ALL {
            let ceiling = match window {
                LimitWindow::Daily => code.daily_limit,
                LimitWindow::Monthly => code.monthly_limit,
            };
            if let Some(ceiling) = ceiling {
                let spent = self.qr_window_total(&code.code, window, now).await?;
                Self::compare(window, ceiling, spent, amount)?;
            }
        }
        Ok(())
    }

    fn window_filter(window: LimitWindow, now: DateTime<Utc>) -> LedgerFilter {
        LedgerFilter {
            status: Some(TransactionStatus::Completed),
            exclude_type: Some(TransactionType::Fee),
            since: Some(window.start(now)),
            until: Some(now),
            ..Default::default()
        }
    }

    async fn sum(&self, filter: &LedgerFilter, kind: Option<TransactionType>) -> Result<Decimal> {
        let records = self.ledger.scan(filter).await?;
        Ok(records
            .iter()
            .filter(|tx| tx.r#type.is_spend())
            .filter(|tx| kind.is_none_or(|k| tx.r#type == k))
            .map(|tx| tx.gross_debit())
            .sum())
    }

    fn compare(window: LimitWindow, ceiling: Decimal, spent: Decimal, attempted: Decimal) -> Result<()> {
        if spent + attempted > ceiling {
            debug!(%window, %ceiling, %spent, %attempted, "limit exceeded");
            return Err(PaymentError::LimitExceeded {
                window,
                ceiling,
                spent,
                attempted,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::limits::Ceilings;
    use crate::domain::ports::LedgerRepository;
    use crate::domain::qr::QrType;
    use crate::domain::transaction::{Transaction, TransactionId};
    use crate::infrastructure::in_memory::InMemoryLedgerRepository;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn policy(daily: Decimal) -> LimitPolicy {
        LimitPolicy {
            regular: Ceilings {
                daily,
                monthly: dec!(100000),
            },
            ..Default::default()
        }
    }

    async fn seed(
        repo: &InMemoryLedgerRepository,
        sender: &str,
        amount: Decimal,
        fee: Decimal,
        status: TransactionStatus,
        age: Duration,
    ) {
        let mut tx = Transaction::new(
            TransactionType::Transfer,
            AccountId::from(sender),
            AccountId::from("other"),
            amount,
            "USD",
        )
        .with_fee(fee);
        tx.id = TransactionId::generate("TRF");
        tx.status = status;
        tx.created_at = Utc::now() - age;
        repo.insert(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_window_total_counts_completed_gross_debits() {
        let repo = InMemoryLedgerRepository::new();
        seed(&repo, "a", dec!(100), dec!(1), TransactionStatus::Completed, Duration::hours(1)).await;
        seed(&repo, "a", dec!(50), dec!(0), TransactionStatus::Failed, Duration::hours(1)).await;
        seed(&repo, "a", dec!(70), dec!(0), TransactionStatus::Completed, Duration::days(3)).await;
        seed(&repo, "b", dec!(999), dec!(0), TransactionStatus::Completed, Duration::hours(1)).await;

        let limits = LimitEnforcer::new(Arc::new(repo), LimitPolicy::default());
        let now = Utc::now();
        let a = AccountId::from("a");
        assert_eq!(
            limits.window_total(&a, LimitWindow::Daily, None, now).await.unwrap(),
            dec!(101)
        );
        assert_eq!(
            limits.window_total(&a, LimitWindow::Monthly, None, now).await.unwrap(),
            dec!(171)
        );
        assert_eq!(
            limits
                .window_total(&a, LimitWindow::Daily, Some(TransactionType::Withdrawal), now)
                .await
                .unwrap(),
            dec!(0)
        );
    }

    #[tokio::test]
    async fn test_check_limit_boundary() {
        let repo = InMemoryLedgerRepository::new();
        seed(&repo, "a", dec!(900), dec!(0), TransactionStatus::Completed, Duration::minutes(5)).await;
        let limits = LimitEnforcer::new(Arc::new(repo), policy(dec!(1000)));
        let a = AccountId::from("a");
        let now = Utc::now();

        let rejected = limits
            .check_limit(&a, AccountTier::Regular, dec!(150), LimitWindow::Daily, now)
            .await;
        assert!(matches!(rejected, Err(PaymentError::LimitExceeded { .. })));

        limits
            .check_limit(&a, AccountTier::Regular, dec!(100), LimitWindow::Daily, now)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_qr_limit_uses_code_counters() {
        let repo = InMemoryLedgerRepository::new();
        let mut code = QrCode::new(AccountId::from("shop"), QrType::Static);
        code.daily_limit = Some(dec!(500));

        let mut paid = Transaction::new(
            TransactionType::QrPayment,
            AccountId::from("payer"),
            AccountId::from("shop"),
            dec!(400),
            "USD",
        );
        paid.id = TransactionId::generate("QRP");
        paid.qr_code = Some(code.code.clone());
        paid.status = TransactionStatus::Completed;
        repo.insert(paid).await.unwrap();

        let limits = LimitEnforcer::new(Arc::new(repo), LimitPolicy::default());
        let now = Utc::now();
        assert!(limits.check_qr(&code, dec!(100), now).await.is_ok());
        assert!(matches!(
            limits.check_qr(&code, dec!(100.01), now).await,
            Err(PaymentError::LimitExceeded {
                window: LimitWindow::Daily,
                ..
            })
        ));

        code.daily_limit = None;
        assert!(limits.check_qr(&code, dec!(5000), now).await.is_ok());
    }
}
