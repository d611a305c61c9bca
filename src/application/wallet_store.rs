use super::locks::{Compensation, LockTable, UnitOfWork, wallet_key};
use crate::domain::ports::WalletRepositoryRef;
use crate::domain::wallet::{AccountId, Wallet, WalletStatus};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Durable wallet balances behind exclusive per-account locks.
///
/// Reads that gate money movement go through `get_for_update`, which only
/// succeeds inside a unit that holds the account's lock.
pub struct WalletStore {
    repo: WalletRepositoryRef,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
}

impl WalletStore {
    pub fn new(repo: WalletRepositoryRef, locks: Arc<LockTable>, lock_timeout: Duration) -> Self {
        Self {
            repo,
            locks,
            lock_timeout,
        }
    }

    /// Opens a wallet with a zero balance.
    ///
    /// Holds the owner's lock so that the duplicate check and the write cannot
    /// interleave with another `create` or with a movement on the same account.
    pub async fn create(&self, owner: &AccountId, currency: &str) -> Result<Wallet> {
        let deadline = Instant::now() + self.lock_timeout;
        let _unit = self.locks.begin([wallet_key(owner)], deadline).await?;
        self.insert_new(owner, currency).await
    }

    async fn insert_new(&self, owner: &AccountId, currency: &str) -> Result<Wallet> {
        let wallet = Wallet::new(owner.clone(), currency);
        self.repo.insert(wallet.clone()).await?;
        info!(account = %owner, wallet_id = %wallet.id, "wallet created");
        Ok(wallet)
    }

    /// Authoritative read without a lock. Fine for display, never for a decision.
    pub async fn get(&self, owner: &AccountId) -> Result<Wallet> {
        self.repo
            .get(owner)
            .await?
            .ok_or_else(|| PaymentError::WalletNotFound(owner.clone()))
    }

    pub async fn get_all(&self) -> Result<Vec<Wallet>> {
        self.repo.get_all().await
    }

    pub async fn get_for_update(&self, unit: &UnitOfWork, owner: &AccountId) -> Result<Wallet> {
        unit.ensure_holds(&wallet_key(owner))?;
        self.get(owner).await
    }

    /// Like `get_for_update`, but opens the wallet if it does not exist yet.
    pub async fn get_or_create_for_update(
        &self,
        unit: &UnitOfWork,
        owner: &AccountId,
        currency: &str,
    ) -> Result<Wallet> {
        unit.ensure_holds(&wallet_key(owner))?;
        match self.repo.get(owner).await? {
            Some(wallet) => Ok(wallet),
            None => self.insert_new(owner, currency).await,
        }
    }

    /// Applies `delta` to the balance and records the inverse in the unit.
    pub async fn adjust_balance(
        &self,
        unit: &mut UnitOfWork,
        owner: &AccountId,
        delta: Decimal,
    ) -> Result<Wallet> {
        unit.ensure_live()?;
        let mut wallet = self.get_for_update(unit, owner).await?;
        wallet.apply_delta(delta)?;
        self.repo.save(wallet.clone()).await?;
        unit.record(Compensation::Balance {
            account: owner.clone(),
            delta: -delta,
        });
        unit.touch(owner.clone());
        Ok(wallet)
    }

    /// Reverses a prior `adjust_balance`. Ignores the unit deadline.
    pub async fn compensate(
        &self,
        unit: &mut UnitOfWork,
        owner: &AccountId,
        delta: Decimal,
    ) -> Result<Wallet> {
        let mut wallet = self.get_for_update(unit, owner).await?;
        wallet.apply_delta(delta)?;
        self.repo.save(wallet.clone()).await?;
        unit.touch(owner.clone());
        warn!(account = %owner, delta = %delta, "balance compensated");
        Ok(wallet)
    }

    /// Administrative active/locked switch, serialized with money movement.
    pub async fn set_status(
        &self,
        owner: &AccountId,
        status: WalletStatus,
        reason: Option<String>,
    ) -> Result<Wallet> {
        let deadline = Instant::now() + self.lock_timeout;
        let unit = self.locks.begin([wallet_key(owner)], deadline).await?;
        let mut wallet = self.get_for_update(&unit, owner).await?;
        match status {
            WalletStatus::Locked => {
                wallet.lock(reason.unwrap_or_else(|| "administrative lock".to_string()))
            }
            WalletStatus::Active => wallet.unlock(),
        }
        self.repo.save(wallet.clone()).await?;
        info!(account = %owner, status = %wallet.status, "wallet status changed");
        Ok(wallet)
    }
}
