#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use walletcore::application::engine::{Storage, TransferEngine};
use walletcore::config::AppConfig;
use walletcore::domain::ports::WalletRepository;
use walletcore::domain::wallet::{AccountId, Wallet};
use walletcore::error::{PaymentError, Result};
use walletcore::infrastructure::in_memory::InMemoryWalletRepository;

pub fn engine() -> TransferEngine {
    TransferEngine::in_memory(&AppConfig::default())
}

pub fn engine_with(config: AppConfig) -> TransferEngine {
    TransferEngine::in_memory(&config)
}

/// Opens a wallet and tops it up when `amount` is positive.
pub async fn funded(engine: &TransferEngine, owner: &str, amount: Decimal) -> AccountId {
    let owner = AccountId::from(owner);
    engine.open_wallet(&owner).await.unwrap();
    if amount > Decimal::ZERO {
        engine.topup(&owner, amount, None).await.unwrap();
    }
    owner
}

pub async fn balance(engine: &TransferEngine, owner: &AccountId) -> Decimal {
    engine.authoritative_balance(owner).await.unwrap().value()
}

pub async fn total_balance(engine: &TransferEngine) -> Decimal {
    engine
        .wallets()
        .get_all()
        .await
        .unwrap()
        .iter()
        .map(|w| w.balance.value())
        .sum()
}

/// Wallet repository whose saves can be made to fail per account.
///
/// `fail_after(owner, n)` lets the next `n` saves of that wallet through and
/// fails every later one.
#[derive(Clone, Default)]
pub struct FlakyWalletRepository {
    inner: InMemoryWalletRepository,
    allowance: Arc<Mutex<HashMap<AccountId, usize>>>,
}

impl FlakyWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_after(&self, owner: &AccountId, saves: usize) {
        self.allowance.lock().unwrap().insert(owner.clone(), saves);
    }

    pub fn heal(&self) {
        self.allowance.lock().unwrap().clear();
    }

    fn permit(&self, owner: &AccountId) -> Result<()> {
        let mut allowance = self.allowance.lock().unwrap();
        match allowance.get_mut(owner) {
            Some(0) => Err(PaymentError::TransactionFailed(format!(
                "injected storage failure for {}",
                owner
            ))),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WalletRepository for FlakyWalletRepository {
    async fn insert(&self, wallet: Wallet) -> Result<()> {
        self.inner.insert(wallet).await
    }

    async fn get(&self, owner: &AccountId) -> Result<Option<Wallet>> {
        self.inner.get(owner).await
    }

    async fn save(&self, wallet: Wallet) -> Result<()> {
        self.permit(&wallet.owner)?;
        self.inner.save(wallet).await
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        self.inner.get_all().await
    }
}

pub fn flaky_engine() -> (TransferEngine, FlakyWalletRepository) {
    let repo = FlakyWalletRepository::new();
    let storage = Storage {
        wallets: Arc::new(repo.clone()),
        ..Storage::in_memory()
    };
    (TransferEngine::new(storage, &AppConfig::default()), repo)
}
