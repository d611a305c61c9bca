use super::wallet_store::WalletStore;
use crate::domain::ports::CacheBackendRef;
use crate::domain::wallet::{AccountId, Wallet};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const INVALIDATE_ATTEMPTS: usize = 3;

/// Read-through cache in front of `WalletStore`.
///
/// Snapshots served from here are for display only. Every balance mutation
/// invalidates the affected entries before the mutating call returns.
pub struct CacheCoherencyLayer {
    backend: CacheBackendRef,
    wallets: Arc<WalletStore>,
    ttl: Duration,
}

impl CacheCoherencyLayer {
    pub fn new(backend: CacheBackendRef, wallets: Arc<WalletStore>, ttl: Duration) -> Self {
        Self {
            backend,
            wallets,
            ttl,
        }
    }

    pub async fn get(&self, owner: &AccountId) -> Result<Wallet> {
        match self.backend.get(owner).await {
            Ok(Some(wallet)) => {
                debug!(account = %owner, "cache hit");
                return Ok(wallet);
            }
            Ok(None) => debug!(account = %owner, "cache miss"),
            Err(e) => warn!(account = %owner, error = %e, "cache read failed, using store"),
        }

        let wallet = self.wallets.get(owner).await?;
        if let Err(e) = self.backend.put(wallet.clone(), self.ttl).await {
            warn!(account = %owner, error = %e, "cache population failed");
        }
        Ok(wallet)
    }

    /// Drops the cached snapshot, retrying a bounded number of times.
    ///
    /// A persistent failure is logged at error level; the entry then ages out
    /// through its TTL.
    pub async fn invalidate(&self, owner: &AccountId) {
        for attempt in 1..=INVALIDATE_ATTEMPTS {
            match self.backend.remove(owner).await {
                Ok(()) => return,
                Err(e) if attempt < INVALIDATE_ATTEMPTS => {
                    warn!(account = %owner, attempt, error = %e, "cache invalidation failed, retrying");
                }
                Err(e) => {
                    error!(account = %owner, error = %e, ttl_secs = self.ttl.as_secs(), "cache invalidation failed, entry may be stale until expiry");
                }
            }
        }
    }

    pub async fn invalidate_all(&self, owners: &[AccountId]) {
        for owner in owners {
            self.invalidate(owner).await;
        }
    }
}
