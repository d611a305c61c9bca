use super::locks::{LockTable, external_ref_key};
use crate::domain::ports::{LedgerFilter, LedgerRepositoryRef};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus};
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Outcome of `TransactionLedger::create`.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Created(Transaction),
    /// A record with the same external reference already existed.
    Existing(Transaction),
}

impl Recorded {
    pub fn into_inner(self) -> Transaction {
        match self {
            Recorded::Created(tx) | Recorded::Existing(tx) => tx,
        }
    }
}

/// Append-only ledger with one-way `pending -> completed | failed` transitions.
pub struct TransactionLedger {
    repo: LedgerRepositoryRef,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
}

impl TransactionLedger {
    pub fn new(repo: LedgerRepositoryRef, locks: Arc<LockTable>, lock_timeout: Duration) -> Self {
        Self {
            repo,
            locks,
            lock_timeout,
        }
    }

    pub fn repository(&self) -> LedgerRepositoryRef {
        self.repo.clone()
    }

    /// Persists `tx` as pending, assigning an id when it has none.
    ///
    /// A record carrying an external reference that was already used is not
    /// duplicated; the stored one is returned instead.
    pub async fn create(&self, mut tx: Transaction) -> Result<Recorded> {
        let _guard = match &tx.external_ref {
            Some(external_ref) => {
                let deadline = Instant::now() + self.lock_timeout;
                let unit = self
                    .locks
                    .begin([external_ref_key(external_ref)], deadline)
                    .await?;
                if let Some(existing) = self.repo.find_by_external_ref(external_ref).await? {
                    debug!(external_ref = %external_ref, id = %existing.id, "duplicate external reference");
                    return Ok(Recorded::Existing(existing));
                }
                Some(unit)
            }
            None => None,
        };

        if !tx.id.is_assigned() {
            tx.id = TransactionId::generate(tx.r#type.id_prefix());
        }
        tx.status = TransactionStatus::Pending;
        tx.failure_reason = None;
        self.repo.insert(tx.clone()).await?;
        debug!(id = %tx.id, kind = ?tx.r#type, amount = %tx.amount, "ledger record created");
        Ok(Recorded::Created(tx))
    }

    /// Moves a pending record to a terminal status.
    pub async fn update(&self, tx: Transaction) -> Result<Transaction> {
        let stored = self.get(&tx.id).await?;
        Self::ensure_transition(&stored, tx.status)?;
        self.repo.save(tx.clone()).await?;
        Ok(tx)
    }

    /// Completes several pending legs in one storage write.
    pub async fn commit(&self, legs: Vec<Transaction>) -> Result<Vec<Transaction>> {
        let mut completed = Vec::with_capacity(legs.len());
        for mut leg in legs {
            let stored = self.get(&leg.id).await?;
            Self::ensure_transition(&stored, TransactionStatus::Completed)?;
            leg.mark_completed();
            completed.push(leg);
        }
        self.repo.save_all(completed.clone()).await?;
        for leg in &completed {
            info!(id = %leg.id, kind = ?leg.r#type, amount = %leg.amount, fee = %leg.fee, "ledger record completed");
        }
        Ok(completed)
    }

    pub async fn fail(&self, id: &TransactionId, reason: impl Into<String>) -> Result<Transaction> {
        let mut tx = self.get(id).await?;
        Self::ensure_transition(&tx, TransactionStatus::Failed)?;
        tx.mark_failed(reason);
        self.repo.save(tx.clone()).await?;
        info!(id = %tx.id, reason = ?tx.failure_reason, "ledger record failed");
        Ok(tx)
    }

    pub async fn get(&self, id: &TransactionId) -> Result<Transaction> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(id.to_string()))
    }

    pub async fn find_by_external_ref(&self, external_ref: &str) -> Result<Option<Transaction>> {
        self.repo.find_by_external_ref(external_ref).await
    }

    pub async fn find_refund_of(&self, original: &TransactionId) -> Result<Option<Transaction>> {
        self.repo.find_refund_of(original).await
    }

    pub async fn scan(&self, filter: &LedgerFilter) -> Result<Vec<Transaction>> {
        self.repo.scan(filter).await
    }

    fn ensure_transition(stored: &Transaction, next: TransactionStatus) -> Result<()> {
        if stored.status.is_terminal() {
            return Err(PaymentError::InvalidStateTransition(format!(
                "{} is already {}",
                stored.id, stored.status
            )));
        }
        if !next.is_terminal() {
            return Err(PaymentError::InvalidStateTransition(format!(
                "{} cannot move to {}",
                stored.id, next
            )));
        }
        Ok(())
    }
}
