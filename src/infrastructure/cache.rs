//! TTL cache of wallet snapshots backed by `DashMap`.
//!
//! Expired entries are dropped lazily on read.

use crate::domain::ports::CacheBackend;
use crate::domain::wallet::{AccountId, Wallet};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct CachedWallet {
    wallet: Wallet,
    expires_at: Instant,
}

#[derive(Default, Clone)]
pub struct InMemoryCache {
    entries: Arc<DashMap<AccountId, CachedWallet>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, owner: &AccountId) -> Result<Option<Wallet>> {
        let hit = self.entries.get(owner).map(|entry| entry.clone());
        match hit {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.wallet)),
            Some(_) => {
                self.entries.remove(owner);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, wallet: Wallet, ttl: Duration) -> Result<()> {
        self.entries.insert(
            wallet.owner.clone(),
            CachedWallet {
                wallet,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, owner: &AccountId) -> Result<()> {
        self.entries.remove(owner);
        Ok(())
    }
}
