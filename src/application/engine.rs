use super::cache::CacheCoherencyLayer;
use super::ledger::{Recorded, TransactionLedger};
use super::limits::LimitEnforcer;
use super::locks::{Compensation, LockTable, UnitOfWork, qr_key, refund_key, wallet_key};
use super::qr::{QrAuthorizer, QrPaymentRequest};
use super::reporting::Reporting;
use super::wallet_store::WalletStore;
use crate::config::AppConfig;
use crate::domain::fee::{FeeCalculator, FeeOperation};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{
    CacheBackendRef, LedgerRepositoryRef, QrRepositoryRef, WalletRepositoryRef,
};
use crate::domain::report::{ReportQuery, TransactionStats};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus, TransactionType};
use crate::domain::wallet::{AccountId, AccountTier, Wallet, WalletStatus};
use crate::error::{PaymentError, Result};
use crate::infrastructure::cache::InMemoryCache;
use crate::infrastructure::in_memory::{
    InMemoryLedgerRepository, InMemoryQrRepository, InMemoryWalletRepository,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Storage handles injected into the engine.
#[derive(Clone)]
pub struct Storage {
    pub wallets: WalletRepositoryRef,
    pub ledger: LedgerRepositoryRef,
    pub qr_codes: QrRepositoryRef,
    pub cache: CacheBackendRef,
}

impl Storage {
    pub fn in_memory() -> Self {
        Self {
            wallets: Arc::new(InMemoryWalletRepository::new()),
            ledger: Arc::new(InMemoryLedgerRepository::new()),
            qr_codes: Arc::new(InMemoryQrRepository::new()),
            cache: Arc::new(InMemoryCache::new()),
        }
    }

    /// Durable wallets, ledger and QR codes in one RocksDB instance.
    #[cfg(feature = "storage-rocksdb")]
    pub fn rocksdb<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let store = crate::infrastructure::rocksdb::RocksDBStore::open(path)?;
        Ok(Self {
            wallets: Arc::new(store.clone()),
            ledger: Arc::new(store.clone()),
            qr_codes: Arc::new(store),
            cache: Arc::new(InMemoryCache::new()),
        })
    }
}

/// A peer-to-peer transfer as submitted by the caller.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: Decimal,
    /// Tier of the sender, supplied by the identity provider.
    pub tier: AccountTier,
    pub description: Option<String>,
    pub external_ref: Option<String>,
    pub instant: bool,
}

impl TransferRequest {
    pub fn new(
        sender: impl Into<AccountId>,
        receiver: impl Into<AccountId>,
        amount: Decimal,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            tier: AccountTier::Regular,
            description: None,
            external_ref: None,
            instant: false,
        }
    }

    pub fn with_tier(mut self, tier: AccountTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn instant(mut self) -> Self {
        self.instant = true;
        self
    }
}

/// Everything one atomic unit has to do for a single ledger record.
struct Movement {
    record: Transaction,
    /// Account charged and the gross amount (principal plus fee).
    debit: Option<(AccountId, Decimal)>,
    /// Account credited with the principal.
    credit: Option<(AccountId, Decimal)>,
    tier: AccountTier,
    enforce_limits: bool,
    qr: Option<QrPaymentRequest>,
}

impl Movement {
    fn new(record: Transaction) -> Self {
        Self {
            record,
            debit: None,
            credit: None,
            tier: AccountTier::Regular,
            enforce_limits: false,
            qr: None,
        }
    }

    fn debit(mut self, account: AccountId, gross: Decimal) -> Self {
        self.debit = Some((account, gross));
        self
    }

    fn credit(mut self, account: AccountId, amount: Decimal) -> Self {
        self.credit = Some((account, amount));
        self
    }

    fn limited(mut self, tier: AccountTier) -> Self {
        self.tier = tier;
        self.enforce_limits = true;
        self
    }

    fn through_qr(mut self, request: QrPaymentRequest) -> Self {
        self.qr = Some(request);
        self
    }
}

/// Orchestrates every balance-changing operation.
///
/// Each movement runs as one atomic unit: lock all wallets involved in sorted
/// order, re-check the authoritative state, apply the mutations, complete the
/// ledger legs. A failure after the first mutation replays the unit's undo
/// log; if that fails too the error escalates to
/// `CriticalReconciliationRequired`. Cached snapshots of every touched wallet
/// are invalidated before the call returns.
pub struct TransferEngine {
    locks: Arc<LockTable>,
    wallets: Arc<WalletStore>,
    ledger: Arc<TransactionLedger>,
    cache: CacheCoherencyLayer,
    limits: Arc<LimitEnforcer>,
    qr: QrAuthorizer,
    fees: FeeCalculator,
    reporting: Reporting,
    timeout: Duration,
    currency: String,
    house: AccountId,
    external: AccountId,
}

impl TransferEngine {
    pub fn new(storage: Storage, config: &AppConfig) -> Self {
        let locks = Arc::new(LockTable::new());
        let timeout = config.transfer_timeout();
        let wallets = Arc::new(WalletStore::new(storage.wallets, locks.clone(), timeout));
        let ledger = Arc::new(TransactionLedger::new(
            storage.ledger.clone(),
            locks.clone(),
            timeout,
        ));
        let cache = CacheCoherencyLayer::new(storage.cache, wallets.clone(), config.cache_ttl());
        let limits = Arc::new(LimitEnforcer::new(
            storage.ledger.clone(),
            config.limits.clone(),
        ));
        let fees = FeeCalculator::from_schedule(&config.fees);
        let qr = QrAuthorizer::new(
            storage.qr_codes,
            locks.clone(),
            timeout,
            limits.clone(),
            fees.clone(),
            config.dynamic_qr_ttl(),
        );
        Self {
            locks,
            wallets,
            ledger,
            cache,
            limits,
            qr,
            fees,
            reporting: Reporting::new(storage.ledger),
            timeout,
            currency: config.currency.clone(),
            house: config.house(),
            external: config.external(),
        }
    }

    pub fn in_memory(config: &AppConfig) -> Self {
        Self::new(Storage::in_memory(), config)
    }

    pub fn wallets(&self) -> &WalletStore {
        &self.wallets
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn qr(&self) -> &QrAuthorizer {
        &self.qr
    }

    pub fn limits(&self) -> &LimitEnforcer {
        &self.limits
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn cache(&self) -> &CacheCoherencyLayer {
        &self.cache
    }

    pub fn house_account(&self) -> &AccountId {
        &self.house
    }

    /// Opens a customer wallet. The house and external accounts are reserved.
    pub async fn open_wallet(&self, owner: &AccountId) -> Result<Wallet> {
        self.ensure_not_reserved(owner)?;
        self.wallets.create(owner, &self.currency).await
    }

    fn ensure_not_reserved(&self, account: &AccountId) -> Result<()> {
        if *account == self.house || *account == self.external {
            return Err(PaymentError::ValidationError(format!(
                "{} is a reserved system account",
                account
            )));
        }
        Ok(())
    }

    pub async fn lock_wallet(&self, owner: &AccountId, reason: impl Into<String>) -> Result<Wallet> {
        let wallet = self
            .wallets
            .set_status(owner, WalletStatus::Locked, Some(reason.into()))
            .await?;
        self.cache.invalidate(owner).await;
        Ok(wallet)
    }

    pub async fn unlock_wallet(&self, owner: &AccountId) -> Result<Wallet> {
        let wallet = self
            .wallets
            .set_status(owner, WalletStatus::Active, None)
            .await?;
        self.cache.invalidate(owner).await;
        Ok(wallet)
    }

    /// Display balance, possibly served from cache.
    pub async fn balance(&self, owner: &AccountId) -> Result<Balance> {
        Ok(self.cache.get(owner).await?.balance)
    }

    pub async fn authoritative_balance(&self, owner: &AccountId) -> Result<Balance> {
        Ok(self.wallets.get(owner).await?.balance)
    }

    pub async fn report(&self, query: &ReportQuery) -> Result<TransactionStats> {
        self.reporting.aggregate(query).await
    }

    /// Moves `amount` from sender to receiver. The sender also pays the
    /// transfer fee for its tier, booked to the house account.
    pub async fn transfer(&self, request: TransferRequest) -> Result<Transaction> {
        if request.sender == request.receiver {
            return Err(PaymentError::ValidationError(
                "sender and receiver must be different accounts".to_string(),
            ));
        }
        self.ensure_not_reserved(&request.sender)?;
        self.ensure_not_reserved(&request.receiver)?;
        let amount = Amount::new(request.amount)?;
        let fee = self
            .fees
            .fee(amount, request.tier, FeeOperation::Transfer, request.instant);

        let record = Transaction::new(
            TransactionType::Transfer,
            request.sender.clone(),
            request.receiver.clone(),
            amount.value(),
            self.currency.as_str(),
        )
        .with_fee(fee)
        .with_external_ref(request.external_ref)
        .with_description(request.description);

        let movement = Movement::new(record)
            .debit(request.sender, amount.value() + fee)
            .credit(request.receiver, amount.value())
            .limited(request.tier);
        self.execute(movement).await
    }

    /// Pays through a QR code. The code's usage count moves in the same
    /// atomic unit as the money.
    pub async fn pay_qr(&self, request: QrPaymentRequest) -> Result<Transaction> {
        if let Some(existing) = self.replay(request.external_ref.as_deref()).await? {
            return Ok(existing);
        }
        let auth = self.qr.validate(&request).await?;
        self.ensure_not_reserved(&auth.payer)?;
        self.ensure_not_reserved(&auth.payee)?;

        let mut record = Transaction::new(
            TransactionType::QrPayment,
            auth.payer.clone(),
            auth.payee.clone(),
            auth.amount.value(),
            self.currency.as_str(),
        )
        .with_fee(auth.fee)
        .with_external_ref(request.external_ref.clone());
        record.qr_code = Some(auth.code.clone());
        record.merchant = Some(auth.payee.clone());

        let movement = Movement::new(record)
            .debit(auth.payer.clone(), auth.gross())
            .credit(auth.payee.clone(), auth.amount.value())
            .limited(request.payer_tier)
            .through_qr(request);
        self.execute(movement).await
    }

    /// Credits money arriving from outside the system. Top-ups are fee-free.
    pub async fn topup(
        &self,
        account: &AccountId,
        amount: Decimal,
        external_ref: Option<String>,
    ) -> Result<Transaction> {
        self.ensure_not_reserved(account)?;
        let amount = Amount::new(amount)?;
        let record = Transaction::new(
            TransactionType::Topup,
            self.external.clone(),
            account.clone(),
            amount.value(),
            self.currency.as_str(),
        )
        .with_external_ref(external_ref);
        self.execute(Movement::new(record).credit(account.clone(), amount.value()))
            .await
    }

    /// Pays money out of the system, charging the withdrawal fee.
    pub async fn withdraw(
        &self,
        account: &AccountId,
        amount: Decimal,
        tier: AccountTier,
        external_ref: Option<String>,
    ) -> Result<Transaction> {
        self.ensure_not_reserved(account)?;
        let amount = Amount::new(amount)?;
        let fee = self.fees.fee(amount, tier, FeeOperation::Withdrawal, false);
        let record = Transaction::new(
            TransactionType::Withdrawal,
            account.clone(),
            self.external.clone(),
            amount.value(),
            self.currency.as_str(),
        )
        .with_fee(fee)
        .with_external_ref(external_ref);
        let movement = Movement::new(record)
            .debit(account.clone(), amount.value() + fee)
            .limited(tier);
        self.execute(movement).await
    }

    /// Administrative credit outside of any transfer.
    pub async fn credit(
        &self,
        account: &AccountId,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Result<Transaction> {
        self.ensure_not_reserved(account)?;
        let amount = Amount::new(amount)?;
        let record = Transaction::new(
            TransactionType::Credit,
            self.external.clone(),
            account.clone(),
            amount.value(),
            self.currency.as_str(),
        )
        .with_description(Some(description.into()));
        self.execute(Movement::new(record).credit(account.clone(), amount.value()))
            .await
    }

    /// Administrative debit. Never overdraws and is not subject to limits.
    pub async fn debit(
        &self,
        account: &AccountId,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Result<Transaction> {
        self.ensure_not_reserved(account)?;
        let amount = Amount::new(amount)?;
        let record = Transaction::new(
            TransactionType::Debit,
            account.clone(),
            self.external.clone(),
            amount.value(),
            self.currency.as_str(),
        )
        .with_description(Some(description.into()));
        self.execute(Movement::new(record).debit(account.clone(), amount.value()))
            .await
    }

    /// Reverses the principal of a completed transfer or QR payment.
    ///
    /// The fee is kept. Each original can be refunded once; a failed refund
    /// attempt does not count.
    pub async fn refund(
        &self,
        original_id: &TransactionId,
        external_ref: Option<String>,
    ) -> Result<Transaction> {
        if let Some(existing) = self.replay(external_ref.as_deref()).await? {
            return Ok(existing);
        }

        let deadline = Instant::now() + self.timeout;
        let _claim = self.locks.begin([refund_key(original_id)], deadline).await?;

        let original = self.ledger.get(original_id).await?;
        if !original.r#type.is_refundable() {
            return Err(PaymentError::ValidationError(format!(
                "{:?} transactions cannot be refunded",
                original.r#type
            )));
        }
        if !original.is_completed() {
            return Err(PaymentError::InvalidStateTransition(format!(
                "{} is {} and cannot be refunded",
                original.id, original.status
            )));
        }
        if let Some(previous) = self.ledger.find_refund_of(original_id).await?
            && previous.status != TransactionStatus::Failed
        {
            return Err(PaymentError::DuplicateRefund(original_id.to_string()));
        }

        let mut record = Transaction::new(
            TransactionType::Refund,
            original.receiver.clone(),
            original.sender.clone(),
            original.amount,
            original.currency.as_str(),
        )
        .with_external_ref(external_ref)
        .with_description(Some(format!("refund of {}", original.id)));
        record.original_tx = Some(original.id.clone());
        record.merchant = original.merchant.clone();

        let movement = Movement::new(record)
            .debit(original.receiver, original.amount)
            .credit(original.sender, original.amount);
        self.execute(movement).await
    }

    async fn replay(&self, external_ref: Option<&str>) -> Result<Option<Transaction>> {
        match external_ref {
            Some(external_ref) => self.ledger.find_by_external_ref(external_ref).await,
            None => Ok(None),
        }
    }

    /// Records the movement as pending, settles it, and lands the record in
    /// a terminal state.
    async fn execute(&self, movement: Movement) -> Result<Transaction> {
        let record = match self.ledger.create(movement.record.clone()).await? {
            Recorded::Created(tx) => tx,
            Recorded::Existing(tx) => {
                info!(id = %tx.id, status = %tx.status, "replayed request, returning stored record");
                return Ok(tx);
            }
        };
        let id = record.id.clone();
        let movement = Movement { record, ..movement };

        match self.settle(&movement).await {
            Ok(completed) => {
                info!(
                    id = %completed.id,
                    kind = ?completed.r#type,
                    sender = %completed.sender,
                    receiver = %completed.receiver,
                    amount = %completed.amount,
                    fee = %completed.fee,
                    "transaction completed"
                );
                Ok(completed)
            }
            Err(e) => {
                warn!(id = %id, code = e.code(), error = %e, "transaction failed");
                if let Err(fail_err) = self.ledger.fail(&id, e.to_string()).await {
                    error!(id = %id, error = %fail_err, "could not mark transaction failed");
                }
                Err(e)
            }
        }
    }

    async fn settle(&self, movement: &Movement) -> Result<Transaction> {
        let deadline = Instant::now() + self.timeout;
        let mut unit = self.locks.begin(self.lock_keys(movement), deadline).await?;

        let result = match self.apply(&mut unit, movement).await {
            Ok(completed) => Ok(completed),
            Err(e) => match self.compensate(&mut unit, &movement.record.id).await {
                Ok(()) => Err(e),
                Err(critical) => Err(critical),
            },
        };

        let touched = unit.touched();
        drop(unit);
        self.cache.invalidate_all(&touched).await;
        result
    }

    fn lock_keys(&self, movement: &Movement) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some((account, _)) = &movement.debit {
            keys.push(wallet_key(account));
        }
        if let Some((account, _)) = &movement.credit {
            keys.push(wallet_key(account));
        }
        if movement.record.fee > Decimal::ZERO {
            keys.push(wallet_key(&self.house));
        }
        if let Some(request) = &movement.qr {
            keys.push(qr_key(&request.code));
        }
        keys
    }

    async fn apply(&self, unit: &mut UnitOfWork, movement: &Movement) -> Result<Transaction> {
        let record = &movement.record;
        let now = Utc::now();

        if let Some(request) = &movement.qr {
            let code = self.qr.get_for_update(unit, &request.code).await?;
            self.qr.authorize(&code, request, now).await?;
        }
        if let Some((payer, gross)) = &movement.debit {
            let wallet = self.wallets.get_for_update(unit, payer).await?;
            wallet.ensure_active()?;
            wallet.ensure_covers(*gross)?;
        }
        if let Some((payee, _)) = &movement.credit {
            self.wallets.get_for_update(unit, payee).await?.ensure_active()?;
        }
        if movement.enforce_limits
            && let Some((payer, gross)) = &movement.debit
        {
            self.limits
                .check_account(payer, movement.tier, *gross, now)
                .await?;
        }

        if let Some(request) = &movement.qr {
            self.qr.record_use(unit, &request.code).await?;
        }
        if let Some((payer, gross)) = &movement.debit {
            self.wallets.adjust_balance(unit, payer, -*gross).await?;
        }
        if let Some((payee, amount)) = &movement.credit {
            self.wallets.adjust_balance(unit, payee, *amount).await?;
        }

        let mut legs = vec![record.clone()];
        if record.fee > Decimal::ZERO {
            legs.push(self.book_fee(unit, record).await?);
        }

        unit.ensure_live()?;
        let mut completed = self.ledger.commit(legs).await?;
        Ok(completed.swap_remove(0))
    }

    /// Credits the fee to the house wallet and records the fee leg.
    async fn book_fee(&self, unit: &mut UnitOfWork, principal: &Transaction) -> Result<Transaction> {
        self.wallets
            .get_or_create_for_update(unit, &self.house, &self.currency)
            .await?;
        self.wallets
            .adjust_balance(unit, &self.house, principal.fee)
            .await?;

        let mut fee_leg = Transaction::new(
            TransactionType::Fee,
            principal.sender.clone(),
            self.house.clone(),
            principal.fee,
            principal.currency.as_str(),
        )
        .with_description(Some(format!("fee for {}", principal.id)));
        fee_leg.original_tx = Some(principal.id.clone());
        let fee_leg = self.ledger.create(fee_leg).await?.into_inner();
        unit.record(Compensation::LedgerLeg {
            id: fee_leg.id.clone(),
        });
        Ok(fee_leg)
    }

    /// Replays the unit's undo log, newest first. Every step is attempted
    /// even after one fails.
    async fn compensate(&self, unit: &mut UnitOfWork, id: &TransactionId) -> Result<()> {
        let steps = unit.take_compensations();
        if steps.is_empty() {
            return Ok(());
        }

        let mut failures = Vec::new();
        for step in steps {
            let outcome = match &step {
                Compensation::Balance { account, delta } => self
                    .wallets
                    .compensate(unit, account, *delta)
                    .await
                    .map(|_| ()),
                Compensation::QrUse { code } => {
                    self.qr.release_use(unit, code).await.map(|_| ())
                }
                Compensation::LedgerLeg { id: leg } => self
                    .ledger
                    .fail(leg, format!("rolled back with {}", id))
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = outcome {
                error!(id = %id, step = ?step, error = %e, "compensation failed");
                failures.push(format!("{:?}: {}", step, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            error!(id = %id, "manual reconciliation required");
            Err(PaymentError::CriticalReconciliationRequired {
                tx_id: id.to_string(),
                detail: failures.join("; "),
            })
        }
    }
}
