use crate::domain::ports::{LedgerFilter, LedgerRepository, QrRepository, WalletRepository};
use crate::domain::qr::QrCode;
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus, TransactionType};
use crate::domain::wallet::{AccountId, Wallet};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for wallets, keyed by owner.
///
/// Uses `Arc<RwLock<HashMap<AccountId, Wallet>>>` to allow shared concurrent access.
/// Ideal for testing or small datasets where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryWalletRepository {
    wallets: Arc<RwLock<HashMap<AccountId, Wallet>>>,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn insert(&self, wallet: Wallet) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        if wallets.contains_key(&wallet.owner) {
            return Err(PaymentError::DuplicateWallet(wallet.owner));
        }
        wallets.insert(wallet.owner.clone(), wallet);
        Ok(())
    }

    async fn get(&self, owner: &AccountId) -> Result<Option<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(owner).cloned())
    }

    async fn save(&self, wallet: Wallet) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        wallets.insert(wallet.owner.clone(), wallet);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        let wallets = self.wallets.read().await;
        let mut all: Vec<Wallet> = wallets.values().cloned().collect();
        all.sort_by(|a, b| a.owner.cmp(&b.owner));
        Ok(all)
    }
}

/// Time-ordered ids of one sender's or one QR code's records.
type PartyIndex = HashMap<String, BTreeSet<(DateTime<Utc>, TransactionId)>>;

#[derive(Default)]
struct LedgerState {
    transactions: HashMap<TransactionId, Transaction>,
    by_sender: PartyIndex,
    by_qr_code: PartyIndex,
}

impl LedgerState {
    fn put(&mut self, tx: Transaction) {
        let entry = (tx.created_at, tx.id.clone());
        self.by_sender
            .entry(tx.sender.as_str().to_string())
            .or_default()
            .insert(entry.clone());
        if let Some(code) = &tx.qr_code {
            self.by_qr_code.entry(code.clone()).or_default().insert(entry);
        }
        self.transactions.insert(tx.id.clone(), tx);
    }

    /// Candidates for `filter`, narrowed through an index when the filter
    /// names a sender or a QR code.
    fn candidates<'a>(&'a self, filter: &LedgerFilter) -> Vec<&'a Transaction> {
        let index = match (&filter.sender, &filter.qr_code) {
            (Some(sender), _) => self.by_sender.get(sender.as_str()),
            (None, Some(code)) => self.by_qr_code.get(code),
            (None, None) => return self.transactions.values().collect(),
        };
        let Some(entries) = index else {
            return Vec::new();
        };
        let lower = filter
            .since
            .map_or(Bound::Unbounded, |since| Bound::Included((since, TransactionId::default())));
        entries
            .range((lower, Bound::Unbounded))
            .take_while(|(at, _)| filter.until.is_none_or(|until| *at <= until))
            .filter_map(|(_, id)| self.transactions.get(id))
            .collect()
    }
}

/// A thread-safe in-memory append log of ledger records.
///
/// Multi-record writes happen under a single write guard, so `save_all`
/// is atomic with respect to every reader. Records are also indexed by
/// sender and by QR code, ordered by creation time.
#[derive(Default, Clone)]
pub struct InMemoryLedgerRepository {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let mut state = self.state.write().await;
        if state.transactions.contains_key(&tx.id) {
            return Err(PaymentError::internal(format!(
                "ledger id collision: {}",
                tx.id
            )));
        }
        state.put(tx);
        Ok(())
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(id).cloned())
    }

    async fn find_by_external_ref(&self, external_ref: &str) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .find(|tx| tx.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn find_refund_of(&self, original: &TransactionId) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        let refunds = state.transactions.values().filter(|tx| {
            tx.r#type == TransactionType::Refund && tx.original_tx.as_ref() == Some(original)
        });
        // A failed attempt must not hide a later successful one.
        let mut latest: Option<&Transaction> = None;
        for refund in refunds {
            if refund.status != TransactionStatus::Failed {
                return Ok(Some(refund.clone()));
            }
            latest = Some(refund);
        }
        Ok(latest.cloned())
    }

    async fn save(&self, tx: Transaction) -> Result<()> {
        let mut state = self.state.write().await;
        state.put(tx);
        Ok(())
    }

    async fn save_all(&self, txs: Vec<Transaction>) -> Result<()> {
        let mut state = self.state.write().await;
        for tx in txs {
            state.put(tx);
        }
        Ok(())
    }

    async fn scan(&self, filter: &LedgerFilter) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut matched: Vec<Transaction> = state
            .candidates(filter)
            .into_iter()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        matched.sort_by_key(|tx| tx.created_at);
        Ok(matched)
    }
}

/// A thread-safe in-memory store for QR codes, keyed by the opaque token.
#[derive(Default, Clone)]
pub struct InMemoryQrRepository {
    codes: Arc<RwLock<HashMap<String, QrCode>>>,
}

impl InMemoryQrRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QrRepository for InMemoryQrRepository {
    async fn insert(&self, code: QrCode) -> Result<()> {
        let mut codes = self.codes.write().await;
        if codes.contains_key(&code.code) {
            return Err(PaymentError::ValidationError(format!(
                "QR code {} already exists",
                code.code
            )));
        }
        codes.insert(code.code.clone(), code);
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<QrCode>> {
        let codes = self.codes.read().await;
        Ok(codes.get(code).cloned())
    }

    async fn save(&self, code: QrCode) -> Result<()> {
        let mut codes = self.codes.write().await;
        codes.insert(code.code.clone(), code);
        Ok(())
    }
}
