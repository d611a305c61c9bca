use crate::domain::ports::{LedgerFilter, LedgerRepository, QrRepository, WalletRepository};
use crate::domain::qr::QrCode;
use crate::domain::transaction::{Transaction, TransactionId, TransactionType};
use crate::domain::wallet::{AccountId, Wallet};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Column Family for wallet states, keyed by owner.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for ledger records, keyed by transaction id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for QR codes, keyed by token.
pub const CF_QR_CODES: &str = "qr_codes";
/// Index: external reference -> transaction id.
pub const CF_EXTERNAL_REFS: &str = "external_refs";
/// Index: original transaction id -> refund transaction id.
pub const CF_REFUNDS: &str = "refunds";
/// Index: `{sender}\0{created_at_millis}\0{id}` -> transaction id.
pub const CF_BY_SENDER: &str = "by_sender";
/// Index: `{qr_code}\0{created_at_millis}\0{id}` -> transaction id.
pub const CF_BY_QR_CODE: &str = "by_qr_code";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_WALLETS,
    CF_TRANSACTIONS,
    CF_QR_CODES,
    CF_EXTERNAL_REFS,
    CF_REFUNDS,
    CF_BY_SENDER,
    CF_BY_QR_CODE,
];

/// Index key prefix for one party. Timestamps are zero-padded so that byte
/// order matches time order.
fn party_key(party: &str, at: Option<DateTime<Utc>>) -> Vec<u8> {
    let mut key = party.as_bytes().to_vec();
    key.push(0);
    if let Some(at) = at {
        key.extend_from_slice(format!("{:020}", at.timestamp_millis().max(0)).as_bytes());
    }
    key
}

fn time_index_key(party: &str, tx: &Transaction) -> Vec<u8> {
    let mut key = party_key(party, Some(tx.created_at));
    key.push(0);
    key.extend_from_slice(tx.id.as_str().as_bytes());
    key
}

/// A persistent store implementation using RocksDB.
///
/// Wallets, ledger records and QR codes live in separate Column Families,
/// values encoded as JSON. Ledger writes that touch the secondary indexes go
/// through a single `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{} column family not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn stage_ledger(&self, batch: &mut WriteBatch, tx: &Transaction) -> Result<()> {
        batch.put_cf(
            self.cf(CF_TRANSACTIONS)?,
            tx.id.as_str().as_bytes(),
            serde_json::to_vec(tx)?,
        );
        if let Some(external_ref) = &tx.external_ref {
            batch.put_cf(
                self.cf(CF_EXTERNAL_REFS)?,
                external_ref.as_bytes(),
                tx.id.as_str().as_bytes(),
            );
        }
        if tx.r#type == TransactionType::Refund
            && let Some(original) = &tx.original_tx
        {
            batch.put_cf(
                self.cf(CF_REFUNDS)?,
                original.as_str().as_bytes(),
                tx.id.as_str().as_bytes(),
            );
        }
        batch.put_cf(
            self.cf(CF_BY_SENDER)?,
            time_index_key(tx.sender.as_str(), tx),
            tx.id.as_str().as_bytes(),
        );
        if let Some(code) = &tx.qr_code {
            batch.put_cf(
                self.cf(CF_BY_QR_CODE)?,
                time_index_key(code, tx),
                tx.id.as_str().as_bytes(),
            );
        }
        Ok(())
    }

    /// Records of one party between `since` and `until`, read through a
    /// time-ordered index instead of the whole ledger.
    fn scan_index(
        &self,
        index: &str,
        party: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>> {
        let cf = self.cf(index)?;
        let lower = party_key(party, since);
        let upper = match until {
            Some(until) => {
                let mut key = party_key(party, Some(until));
                key.push(1);
                key
            }
            None => {
                let mut key = party.as_bytes().to_vec();
                key.push(1);
                key
            }
        };

        let mut records = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(lower.as_slice(), Direction::Forward))
        {
            let (key, id) = item?;
            if &*key >= upper.as_slice() {
                break;
            }
            if let Some(tx) = self.read::<Transaction>(CF_TRANSACTIONS, &id)? {
                records.push(tx);
            }
        }
        Ok(records)
    }

    fn lookup_index(&self, index: &str, key: &[u8]) -> Result<Option<Transaction>> {
        let cf = self.cf(index)?;
        match self.db.get_cf(cf, key)? {
            Some(id) => self.read(CF_TRANSACTIONS, &id),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl WalletRepository for RocksDBStore {
    async fn insert(&self, wallet: Wallet) -> Result<()> {
        let key = wallet.owner.as_str().as_bytes().to_vec();
        let cf = self.cf(CF_WALLETS)?;
        if self.db.get_pinned_cf(cf, &key)?.is_some() {
            return Err(PaymentError::DuplicateWallet(wallet.owner));
        }
        self.write(CF_WALLETS, &key, &wallet)
    }

    async fn get(&self, owner: &AccountId) -> Result<Option<Wallet>> {
        self.read(CF_WALLETS, owner.as_str().as_bytes())
    }

    async fn save(&self, wallet: Wallet) -> Result<()> {
        self.write(CF_WALLETS, wallet.owner.as_str().as_bytes(), &wallet)
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        let cf = self.cf(CF_WALLETS)?;
        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            wallets.push(serde_json::from_slice(&value)?);
        }
        Ok(wallets)
    }
}

#[async_trait]
impl LedgerRepository for RocksDBStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_ledger(&mut batch, &tx)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, id.as_str().as_bytes())
    }

    async fn find_by_external_ref(&self, external_ref: &str) -> Result<Option<Transaction>> {
        self.lookup_index(CF_EXTERNAL_REFS, external_ref.as_bytes())
    }

    async fn find_refund_of(&self, original: &TransactionId) -> Result<Option<Transaction>> {
        self.lookup_index(CF_REFUNDS, original.as_str().as_bytes())
    }

    async fn save(&self, tx: Transaction) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_ledger(&mut batch, &tx)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn save_all(&self, txs: Vec<Transaction>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for tx in &txs {
            self.stage_ledger(&mut batch, tx)?;
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn scan(&self, filter: &LedgerFilter) -> Result<Vec<Transaction>> {
        let candidates = match (&filter.sender, &filter.qr_code) {
            (Some(sender), _) => {
                self.scan_index(CF_BY_SENDER, sender.as_str(), filter.since, filter.until)?
            }
            (None, Some(code)) => self.scan_index(CF_BY_QR_CODE, code, filter.since, filter.until)?,
            (None, None) => {
                let cf = self.cf(CF_TRANSACTIONS)?;
                let mut all = Vec::new();
                for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                    let (_key, value) = item?;
                    all.push(serde_json::from_slice(&value)?);
                }
                all
            }
        };
        let mut matched: Vec<Transaction> = candidates
            .into_iter()
            .filter(|tx| filter.matches(tx))
            .collect();
        matched.sort_by_key(|tx| tx.created_at);
        Ok(matched)
    }
}

#[async_trait]
impl QrRepository for RocksDBStore {
    async fn insert(&self, code: QrCode) -> Result<()> {
        let cf = self.cf(CF_QR_CODES)?;
        if self.db.get_pinned_cf(cf, code.code.as_bytes())?.is_some() {
            return Err(PaymentError::ValidationError(format!(
                "QR code {} already exists",
                code.code
            )));
        }
        self.write(CF_QR_CODES, code.code.as_bytes(), &code)
    }

    async fn get(&self, code: &str) -> Result<Option<QrCode>> {
        self.read(CF_QR_CODES, code.as_bytes())
    }

    async fn save(&self, code: QrCode) -> Result<()> {
        self.write(CF_QR_CODES, code.code.as_bytes(), &code)
    }
}
