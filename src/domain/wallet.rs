use super::money::Balance;
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an account as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account tier, supplied by the caller on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    #[default]
    Regular,
    Merchant,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Locked,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletStatus::Active => f.write_str("active"),
            WalletStatus::Locked => f.write_str("locked"),
        }
    }
}

/// The durable balance record of one account.
///
/// There is exactly one wallet per owner. The balance never goes below zero;
/// `credit` and `debit` refuse to run while the wallet is locked.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    pub id: String,
    pub owner: AccountId,
    pub balance: Balance,
    pub currency: String,
    pub status: WalletStatus,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner: AccountId, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("WAL-{}", uuid::Uuid::new_v4().simple()),
            owner,
            balance: Balance::ZERO,
            currency: currency.into(),
            status: WalletStatus::Active,
            status_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    pub fn ensure_active(&self) -> Result<(), PaymentError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(PaymentError::WalletLocked(self.owner.clone()))
        }
    }

    pub fn ensure_covers(&self, required: Decimal) -> Result<(), PaymentError> {
        if self.balance.value() >= required {
            Ok(())
        } else {
            Err(PaymentError::InsufficientBalance {
                account: self.owner.clone(),
                available: self.balance.value(),
                required,
            })
        }
    }

    /// Applies a signed delta. A negative result is refused and leaves the wallet untouched.
    pub fn apply_delta(&mut self, delta: Decimal) -> Result<(), PaymentError> {
        self.ensure_active()?;
        let next = self.balance + Balance(delta);
        if next.is_negative() {
            return Err(PaymentError::InsufficientBalance {
                account: self.owner.clone(),
                available: self.balance.value(),
                required: -delta,
            });
        }
        self.balance = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn lock(&mut self, reason: impl Into<String>) {
        self.status = WalletStatus::Locked;
        self.status_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    pub fn unlock(&mut self) {
        self.status = WalletStatus::Active;
        self.status_reason = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn funded(amount: Decimal) -> Wallet {
        let mut wallet = Wallet::new(AccountId::from("alice"), "USD");
        wallet.balance = Balance::new(amount);
        wallet
    }

    #[test]
    fn test_new_wallet_starts_empty_and_active() {
        let wallet = Wallet::new(AccountId::from("alice"), "USD");
        assert_eq!(wallet.balance, Balance::ZERO);
        assert!(wallet.is_active());
        assert!(wallet.id.starts_with("WAL-"));
    }

    #[test]
    fn test_wallet_debit_success() {
        let mut wallet = funded(dec!(10.0));
        wallet.apply_delta(dec!(-4.0)).unwrap();
        assert_eq!(wallet.balance, Balance::new(dec!(6.0)));
    }

    #[test]
    fn test_wallet_debit_insufficient() {
        let mut wallet = funded(dec!(10.0));
        let result = wallet.apply_delta(dec!(-20.0));
        assert!(matches!(
            result,
            Err(PaymentError::InsufficientBalance { .. })
        ));
        assert_eq!(wallet.balance, Balance::new(dec!(10.0)));
    }

    #[test]
    fn test_locked_wallet_rejects_credit_and_debit() {
        let mut wallet = funded(dec!(10.0));
        wallet.lock("fraud review");
        assert!(matches!(
            wallet.apply_delta(dec!(1.0)),
            Err(PaymentError::WalletLocked(_))
        ));
        assert!(matches!(
            wallet.apply_delta(dec!(-1.0)),
            Err(PaymentError::WalletLocked(_))
        ));
        assert_eq!(wallet.status_reason.as_deref(), Some("fraud review"));

        wallet.unlock();
        wallet.apply_delta(dec!(1.0)).unwrap();
        assert_eq!(wallet.balance, Balance::new(dec!(11.0)));
    }
}
