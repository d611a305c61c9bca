use super::qr::QrCode;
use super::transaction::{Transaction, TransactionId, TransactionStatus, TransactionType};
use super::wallet::{AccountId, Wallet};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Fails with `DuplicateWallet` when the owner already has one.
    async fn insert(&self, wallet: Wallet) -> Result<()>;
    async fn get(&self, owner: &AccountId) -> Result<Option<Wallet>>;
    async fn save(&self, wallet: Wallet) -> Result<()>;
    async fn get_all(&self) -> Result<Vec<Wallet>>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn insert(&self, tx: Transaction) -> Result<()>;
    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>>;
    async fn find_by_external_ref(&self, external_ref: &str) -> Result<Option<Transaction>>;
    /// The refund leg that reverses `original`, preferring one that did not fail.
    async fn find_refund_of(&self, original: &TransactionId) -> Result<Option<Transaction>>;
    async fn save(&self, tx: Transaction) -> Result<()>;
    /// Writes every record or none of them.
    async fn save_all(&self, txs: Vec<Transaction>) -> Result<()>;
    async fn scan(&self, filter: &LedgerFilter) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait QrRepository: Send + Sync {
    async fn insert(&self, code: QrCode) -> Result<()>;
    async fn get(&self, code: &str) -> Result<Option<QrCode>>;
    async fn save(&self, code: QrCode) -> Result<()>;
}

/// Advisory wallet snapshot cache. Never consulted for money-moving decisions.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, owner: &AccountId) -> Result<Option<Wallet>>;
    async fn put(&self, wallet: Wallet, ttl: Duration) -> Result<()>;
    async fn remove(&self, owner: &AccountId) -> Result<()>;
}

pub type WalletRepositoryRef = Arc<dyn WalletRepository>;
pub type LedgerRepositoryRef = Arc<dyn LedgerRepository>;
pub type QrRepositoryRef = Arc<dyn QrRepository>;
pub type CacheBackendRef = Arc<dyn CacheBackend>;

/// Selection over ledger records. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub sender: Option<AccountId>,
    /// Matches either side of the movement.
    pub party: Option<AccountId>,
    pub qr_code: Option<String>,
    pub status: Option<TransactionStatus>,
    pub exclude_type: Option<TransactionType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(sender) = &self.sender
            && tx.sender != *sender
        {
            return false;
        }
        if let Some(party) = &self.party
            && tx.sender != *party
            && tx.receiver != *party
        {
            return false;
        }
        if let Some(code) = &self.qr_code
            && tx.qr_code.as_deref() != Some(code.as_str())
        {
            return false;
        }
        if let Some(status) = self.status
            && tx.status != status
        {
            return false;
        }
        if let Some(excluded) = self.exclude_type
            && tx.r#type == excluded
        {
            return false;
        }
        if let Some(since) = self.since
            && tx.created_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && tx.created_at > until
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tx(sender: &str, receiver: &str) -> Transaction {
        Transaction::new(
            TransactionType::Transfer,
            AccountId::from(sender),
            AccountId::from(receiver),
            dec!(10),
            "USD",
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(LedgerFilter::default().matches(&tx("a", "b")));
    }

    #[test]
    fn test_party_matches_either_side() {
        let filter = LedgerFilter {
            party: Some(AccountId::from("b")),
            ..Default::default()
        };
        assert!(filter.matches(&tx("a", "b")));
        assert!(filter.matches(&tx("b", "c")));
        assert!(!filter.matches(&tx("a", "c")));
    }

    #[test]
    fn test_status_and_type_filters() {
        let mut record = tx("a", "b");
        let completed = LedgerFilter {
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        assert!(!completed.matches(&record));
        record.mark_completed();
        assert!(completed.matches(&record));

        let no_transfers = LedgerFilter {
            exclude_type: Some(TransactionType::Transfer),
            ..Default::default()
        };
        assert!(!no_transfers.matches(&record));
    }
}
