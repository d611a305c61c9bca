//! Per-key exclusive locks and the atomic unit built on top of them.
//!
//! Keys are sorted and deduplicated before acquisition so two units that
//! need the same set of keys always take them in the same order.

use crate::domain::transaction::TransactionId;
use crate::domain::wallet::AccountId;
use crate::error::{PaymentError, Result};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

pub fn wallet_key(owner: &AccountId) -> String {
    format!("wallet:{}", owner)
}

pub fn qr_key(code: &str) -> String {
    format!("qr:{}", code)
}

pub fn refund_key(original: &TransactionId) -> String {
    format!("refund:{}", original)
}

pub fn external_ref_key(external_ref: &str) -> String {
    format!("ref:{}", external_ref)
}

#[derive(Default)]
pub struct LockTable {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires every key, in sorted order, before `deadline`.
    ///
    /// On timeout the guards taken so far are released and the caller gets
    /// `TransactionFailed`.
    pub async fn begin<I>(&self, keys: I, deadline: Instant) -> Result<UnitOfWork>
    where
        I: IntoIterator<Item = String>,
    {
        let keys: BTreeSet<String> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let slot = self.slots.entry(key.clone()).or_default().clone();
            let guard = tokio::time::timeout_at(deadline, slot.lock_owned())
                .await
                .map_err(|_| {
                    PaymentError::TransactionFailed(format!("timed out waiting for lock {}", key))
                })?;
            guards.push(guard);
        }
        debug!(keys = ?keys, "unit started");
        Ok(UnitOfWork {
            deadline,
            held: keys,
            _guards: guards,
            compensations: Vec::new(),
            touched: BTreeSet::new(),
        })
    }
}

/// Undo step recorded for every mutation made inside a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Compensation {
    Balance { account: AccountId, delta: Decimal },
    QrUse { code: String },
    LedgerLeg { id: TransactionId },
}

/// An atomic unit: the held locks, the deadline, and the undo log.
///
/// Locks are released when the unit is dropped.
pub struct UnitOfWork {
    deadline: Instant,
    held: BTreeSet<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
    compensations: Vec<Compensation>,
    touched: BTreeSet<AccountId>,
}

impl UnitOfWork {
    pub fn holds(&self, key: &str) -> bool {
        self.held.contains(key)
    }

    pub fn ensure_holds(&self, key: &str) -> Result<()> {
        if self.holds(key) {
            Ok(())
        } else {
            Err(PaymentError::internal(format!(
                "{} accessed outside of its lock",
                key
            )))
        }
    }

    pub fn ensure_live(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            Err(PaymentError::TransactionFailed(
                "deadline exceeded inside atomic unit".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    pub fn record(&mut self, compensation: Compensation) {
        self.compensations.push(compensation);
    }

    pub fn touch(&mut self, account: AccountId) {
        self.touched.insert(account);
    }

    pub fn touched(&self) -> Vec<AccountId> {
        self.touched.iter().cloned().collect()
    }

    /// Drains the undo log, newest first.
    pub fn take_compensations(&mut self) -> Vec<Compensation> {
        let mut steps = std::mem::take(&mut self.compensations);
        steps.reverse();
        steps
    }
}
