use super::limits::LimitEnforcer;
use super::locks::{Compensation, LockTable, UnitOfWork, qr_key};
use crate::domain::fee::{FeeCalculator, FeeOperation};
use crate::domain::money::Amount;
use crate::domain::ports::QrRepositoryRef;
use crate::domain::qr::{QrCode, QrStatus, QrType, UNLIMITED_USES};
use crate::domain::wallet::{AccountId, AccountTier};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A QR code presented for payment.
#[derive(Debug, Clone)]
pub struct QrPaymentRequest {
    pub code: String,
    /// The party presenting or scanning the code: the payer for receive
    /// codes, the merchant for payment-presentment codes.
    pub counterparty: AccountId,
    pub amount: Decimal,
    /// Tier of the paying account, supplied by the identity provider.
    pub payer_tier: AccountTier,
    pub instant: bool,
    pub external_ref: Option<String>,
}

impl QrPaymentRequest {
    pub fn new(code: impl Into<String>, counterparty: impl Into<AccountId>, amount: Decimal) -> Self {
        Self {
            code: code.into(),
            counterparty: counterparty.into(),
            amount,
            payer_tier: AccountTier::Regular,
            instant: false,
            external_ref: None,
        }
    }

    pub fn with_tier(mut self, tier: AccountTier) -> Self {
        self.payer_tier = tier;
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }
}

/// A successful validation, resolved to the parties of the movement.
#[derive(Debug, Clone, PartialEq)]
pub struct QrAuthorization {
    pub code: String,
    pub payer: AccountId,
    pub payee: AccountId,
    pub amount: Amount,
    pub fee: Decimal,
}

impl QrAuthorization {
    pub fn gross(&self) -> Decimal {
        self.amount.value() + self.fee
    }
}

/// Optional settings for a static receive code.
#[derive(Debug, Clone, Default)]
pub struct StaticQrOptions {
    pub amount: Option<Decimal>,
    pub daily_limit: Option<Decimal>,
    pub monthly_limit: Option<Decimal>,
    pub allowed_payers: BTreeSet<AccountId>,
}

pub struct QrAuthorizer {
    repo: QrRepositoryRef,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
    limits: Arc<LimitEnforcer>,
    fees: FeeCalculator,
    dynamic_ttl: chrono::Duration,
}

impl QrAuthorizer {
    pub fn new(
        repo: QrRepositoryRef,
        locks: Arc<LockTable>,
        lock_timeout: Duration,
        limits: Arc<LimitEnforcer>,
        fees: FeeCalculator,
        dynamic_ttl: chrono::Duration,
    ) -> Self {
        Self {
            repo,
            locks,
            lock_timeout,
            limits,
            fees,
            dynamic_ttl,
        }
    }

    pub async fn issue_static(&self, owner: &AccountId, options: StaticQrOptions) -> Result<QrCode> {
        let mut code = QrCode::new(owner.clone(), QrType::Static);
        code.amount = options.amount.map(Amount::new).transpose()?.map(|a| a.value());
        code.daily_limit = options.daily_limit;
        code.monthly_limit = options.monthly_limit;
        code.allowed_payers = options.allowed_payers;
        self.register(code).await
    }

    /// Single-use receive code for one exact amount.
    pub async fn issue_dynamic(&self, owner: &AccountId, amount: Decimal) -> Result<QrCode> {
        let amount = Amount::new(amount)?;
        let mut code = QrCode::new(owner.clone(), QrType::Dynamic);
        code.amount = Some(amount.value());
        code.max_uses = 1;
        code.expires_at = Some(Utc::now() + self.dynamic_ttl);
        self.register(code).await
    }

    /// Single-use code the owner shows to a merchant to be charged.
    pub async fn issue_presentment(
        &self,
        owner: &AccountId,
        amount: Option<Decimal>,
    ) -> Result<QrCode> {
        let mut code = QrCode::new(owner.clone(), QrType::PaymentPresentment);
        code.amount = amount.map(Amount::new).transpose()?.map(|a| a.value());
        code.max_uses = 1;
        code.expires_at = Some(Utc::now() + self.dynamic_ttl);
        self.register(code).await
    }

    /// Stores a code minted elsewhere after checking its invariants.
    pub async fn register(&self, code: QrCode) -> Result<QrCode> {
        if code.max_uses < UNLIMITED_USES {
            return Err(PaymentError::ValidationError(format!(
                "max_uses must be -1 or non-negative, got {}",
                code.max_uses
            )));
        }
        if code.max_uses >= 0 && code.usage_count > code.max_uses {
            return Err(PaymentError::ValidationError(
                "usage_count exceeds max_uses".to_string(),
            ));
        }
        if let Some(amount) = code.amount {
            Amount::new(amount)?;
        }
        for ceiling in [code.daily_limit, code.monthly_limit].into_iter().flatten() {
            if ceiling < Decimal::ZERO {
                return Err(PaymentError::ValidationError(format!(
                    "QR limit must not be negative, got {}",
                    ceiling
                )));
            }
        }
        self.repo.insert(code.clone()).await?;
        info!(code = %code.code, owner = %code.owner, kind = ?code.r#type, "QR code issued");
        Ok(code)
    }

    /// Waits for any unit holding the code to finish before revoking it.
    pub async fn revoke(&self, code: &str) -> Result<QrCode> {
        let deadline = Instant::now() + self.lock_timeout;
        let unit = self.locks.begin([qr_key(code)], deadline).await?;
        let mut qr = self.get_for_update(&unit, code).await?;
        qr.status = QrStatus::Revoked;
        self.repo.save(qr.clone()).await?;
        info!(code = %code, "QR code revoked");
        Ok(qr)
    }

    pub async fn get(&self, code: &str) -> Result<QrCode> {
        self.repo
            .get(code)
            .await?
            .ok_or_else(|| PaymentError::QrNotFound(code.to_string()))
    }

    /// Validates a presentation against the current stored state of the code.
    ///
    /// Without the code's lock this is only a pre-check; the engine repeats
    /// it under lock before moving money.
    pub async fn validate(&self, request: &QrPaymentRequest) -> Result<QrAuthorization> {
        let code = self.get(&request.code).await?;
        self.authorize(&code, request, Utc::now()).await
    }

    /// Applies the rules in order, stopping at the first failure.
    pub async fn authorize(
        &self,
        code: &QrCode,
        request: &QrPaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<QrAuthorization> {
        let amount = Amount::new(request.amount)?;

        code.ensure_active()?;
        code.ensure_not_expired(now)?;
        code.ensure_uses_left()?;
        code.ensure_amount_matches(amount)?;
        code.ensure_payer_allowed(&request.counterparty)?;

        let fee = self
            .fees
            .fee(amount, request.payer_tier, FeeOperation::QrPayment, request.instant);
        self.limits.check_qr(code, amount.value() + fee, now).await?;

        code.ensure_not_owner(&request.counterparty)?;

        let (payer, payee) = if code.r#type.owner_pays() {
            (code.owner.clone(), request.counterparty.clone())
        } else {
            (request.counterparty.clone(), code.owner.clone())
        };
        debug!(code = %code.code, payer = %payer, payee = %payee, amount = %amount, "QR code authorized");
        Ok(QrAuthorization {
            code: code.code.clone(),
            payer,
            payee,
            amount,
            fee,
        })
    }

    pub async fn get_for_update(&self, unit: &UnitOfWork, code: &str) -> Result<QrCode> {
        unit.ensure_holds(&qr_key(code))?;
        self.get(code).await
    }

    /// Counts one use inside the unit that moves the money.
    pub async fn record_use(&self, unit: &mut UnitOfWork, code: &str) -> Result<QrCode> {
        unit.ensure_live()?;
        let mut qr = self.get_for_update(unit, code).await?;
        qr.ensure_uses_left()?;
        qr.record_use();
        self.repo.save(qr.clone()).await?;
        unit.record(Compensation::QrUse {
            code: code.to_string(),
        });
        Ok(qr)
    }

    pub async fn release_use(&self, unit: &UnitOfWork, code: &str) -> Result<QrCode> {
        let mut qr = self.get_for_update(unit, code).await?;
        qr.release_use();
        self.repo.save(qr.clone()).await?;
        Ok(qr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::limits::LimitPolicy;
    use crate::domain::qr::QrRejection;
    use crate::infrastructure::in_memory::{InMemoryLedgerRepository, InMemoryQrRepository};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn authorizer_with(locks: Arc<LockTable>, lock_timeout: std::time::Duration) -> QrAuthorizer {
        let limits = Arc::new(LimitEnforcer::new(
            Arc::new(InMemoryLedgerRepository::new()),
            LimitPolicy::default(),
        ));
        QrAuthorizer::new(
            Arc::new(InMemoryQrRepository::new()),
            locks,
            lock_timeout,
            limits,
            FeeCalculator::default(),
            Duration::minutes(15),
        )
    }

    fn authorizer() -> QrAuthorizer {
        authorizer_with(Arc::new(LockTable::new()), std::time::Duration::from_secs(1))
    }

    fn rejection(result: Result<QrAuthorization>) -> QrRejection {
        match result {
            Err(PaymentError::QrInvalid(rejection)) => rejection,
            other => panic!("expected QR rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dynamic_code_defaults() {
        let qr = authorizer();
        let code = qr
            .issue_dynamic(&AccountId::from("shop"), dec!(19.999))
            .await
            .unwrap();
        assert_eq!(code.amount, Some(dec!(20.00)));
        assert_eq!(code.max_uses, 1);
        let expiry = code.expires_at.unwrap();
        assert!(expiry > Utc::now() + Duration::minutes(14));
        assert!(expiry <= Utc::now() + Duration::minutes(15));
    }

    #[tokio::test]
    async fn test_static_code_resolves_owner_as_payee() {
        let qr = authorizer();
        let code = qr
            .issue_static(&AccountId::from("shop"), StaticQrOptions::default())
            .await
            .unwrap();
        let auth = qr
            .validate(&QrPaymentRequest::new(code.code.clone(), "alice", dec!(1000)))
            .await
            .unwrap();
        assert_eq!(auth.payer, AccountId::from("alice"));
        assert_eq!(auth.payee, AccountId::from("shop"));
        assert_eq!(auth.fee, dec!(5.00));
        assert_eq!(auth.gross(), dec!(1005.00));
    }

    #[tokio::test]
    async fn test_presentment_code_resolves_owner_as_payer() {
        let qr = authorizer();
        let code = qr
            .issue_presentment(&AccountId::from("alice"), None)
            .await
            .unwrap();
        let auth = qr
            .validate(
                &QrPaymentRequest::new(code.code.clone(), "shop", dec!(12.5))
                    .with_tier(AccountTier::Merchant),
            )
            .await
            .unwrap();
        assert_eq!(auth.payer, AccountId::from("alice"));
        assert_eq!(auth.payee, AccountId::from("shop"));
    }

    #[tokio::test]
    async fn test_rules_short_circuit_in_order() {
        let qr = authorizer();
        let mut code = QrCode::new(AccountId::from("shop"), QrType::Dynamic);
        code.amount = Some(dec!(20));
        code.max_uses = 1;
        code.usage_count = 1;
        code.expires_at = Some(Utc::now() - Duration::minutes(1));
        code.status = QrStatus::Revoked;
        let code = qr.register(code).await.unwrap();

        // Wrong amount, self-payment, expired and used up: NotActive wins.
        let request = QrPaymentRequest::new(code.code.clone(), "shop", dec!(5));
        assert_eq!(rejection(qr.validate(&request).await), QrRejection::NotActive);

        let mut active = code.clone();
        active.status = QrStatus::Active;
        let now = Utc::now();
        assert_eq!(
            rejection(qr.authorize(&active, &request, now).await),
            QrRejection::Expired
        );

        active.expires_at = None;
        assert_eq!(
            rejection(qr.authorize(&active, &request, now).await),
            QrRejection::UsageExceeded
        );

        active.usage_count = 0;
        assert_eq!(
            rejection(qr.authorize(&active, &request, now).await),
            QrRejection::AmountMismatch
        );

        active.allowed_payers.insert(AccountId::from("bob"));
        let exact = QrPaymentRequest::new(code.code.clone(), "shop", dec!(20));
        assert_eq!(
            rejection(qr.authorize(&active, &exact, now).await),
            QrRejection::Unauthorized
        );

        active.allowed_payers.clear();
        assert_eq!(
            rejection(qr.authorize(&active, &exact, now).await),
            QrRejection::SelfPayment
        );
    }

    #[tokio::test]
    async fn test_rounded_amount_matches_dynamic_code() {
        let qr = authorizer();
        let code = qr
            .issue_dynamic(&AccountId::from("shop"), dec!(20.00))
            .await
            .unwrap();
        let request = QrPaymentRequest::new(code.code, "alice", dec!(19.999));
        assert!(qr.validate(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_and_unknown_code() {
        let qr = authorizer();
        let code = qr
            .issue_static(&AccountId::from("shop"), StaticQrOptions::default())
            .await
            .unwrap();
        qr.revoke(&code.code).await.unwrap();
        let request = QrPaymentRequest::new(code.code, "alice", dec!(1));
        assert_eq!(rejection(qr.validate(&request).await), QrRejection::NotActive);

        let missing = QrPaymentRequest::new("QRnope", "alice", dec!(1));
        assert!(matches!(
            qr.validate(&missing).await,
            Err(PaymentError::QrNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_broken_invariants() {
        let qr = authorizer();
        let mut code = QrCode::new(AccountId::from("shop"), QrType::Dynamic);
        code.max_uses = 1;
        code.usage_count = 2;
        assert!(matches!(
            qr.register(code).await,
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_static_code_rejects_non_positive_amount_and_negative_limits() {
        let qr = authorizer();
        let shop = AccountId::from("shop");
        for amount in [dec!(0), dec!(-5), dec!(0.001)] {
            let options = StaticQrOptions {
                amount: Some(amount),
                ..Default::default()
            };
            assert!(matches!(
                qr.issue_static(&shop, options).await,
                Err(PaymentError::ValidationError(_))
            ));
        }

        let options = StaticQrOptions {
            daily_limit: Some(dec!(-1)),
            ..Default::default()
        };
        assert!(matches!(
            qr.issue_static(&shop, options).await,
            Err(PaymentError::ValidationError(_))
        ));

        let mut code = QrCode::new(shop.clone(), QrType::Static);
        code.monthly_limit = Some(dec!(-100));
        assert!(matches!(
            qr.register(code).await,
            Err(PaymentError::ValidationError(_))
        ));

        let options = StaticQrOptions {
            amount: Some(dec!(12.345)),
            daily_limit: Some(dec!(0)),
            ..Default::default()
        };
        let code = qr.issue_static(&shop, options).await.unwrap();
        assert_eq!(code.amount, Some(dec!(12.35)));
    }

    #[tokio::test]
    async fn test_revoke_waits_for_unit_holding_the_code() {
        let locks = Arc::new(LockTable::new());
        let qr = authorizer_with(locks.clone(), std::time::Duration::from_millis(30));
        let code = qr
            .issue_static(&AccountId::from("shop"), StaticQrOptions::default())
            .await
            .unwrap();

        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let mut unit = locks.begin([qr_key(&code.code)], deadline).await.unwrap();
        qr.record_use(&mut unit, &code.code).await.unwrap();

        assert!(matches!(
            qr.revoke(&code.code).await,
            Err(PaymentError::TransactionFailed(_))
        ));
        let stored = qr.get(&code.code).await.unwrap();
        assert_eq!(stored.status, QrStatus::Active);
        assert_eq!(stored.usage_count, 1);

        drop(unit);
        let revoked = qr.revoke(&code.code).await.unwrap();
        assert_eq!(revoked.status, QrStatus::Revoked);
        assert_eq!(revoked.usage_count, 1);
    }
}
