use super::money::{Amount, round_minor};
use super::wallet::AccountId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Sentinel for `max_uses` meaning the code can be used any number of times.
pub const UNLIMITED_USES: i64 = -1;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum QrType {
    /// Reusable receive code. Owner is the payee.
    Static,
    /// Single-use, amount-fixed, short-lived receive code. Owner is the payee.
    Dynamic,
    /// A payer's own code shown to a merchant. Owner is the payer.
    PaymentPresentment,
}

impl QrType {
    pub fn owner_pays(&self) -> bool {
        matches!(self, QrType::PaymentPresentment)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum QrStatus {
    Active,
    Expired,
    Revoked,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrRejection {
    #[error("code is not active")]
    NotActive,
    #[error("code has expired")]
    Expired,
    #[error("code usage limit reached")]
    UsageExceeded,
    #[error("presented amount does not match the code amount")]
    AmountMismatch,
    #[error("payer is not allowed to use this code")]
    Unauthorized,
    #[error("payer and code owner are the same account")]
    SelfPayment,
}

impl QrRejection {
    pub fn code(&self) -> &'static str {
        match self {
            QrRejection::NotActive => "QR_NOT_ACTIVE",
            QrRejection::Expired => "QR_EXPIRED",
            QrRejection::UsageExceeded => "QR_USAGE_EXCEEDED",
            QrRejection::AmountMismatch => "QR_AMOUNT_MISMATCH",
            QrRejection::Unauthorized => "QR_UNAUTHORIZED",
            QrRejection::SelfPayment => "QR_SELF_PAYMENT",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct QrCode {
    pub code: String,
    pub owner: AccountId,
    pub r#type: QrType,
    /// `None` accepts any amount.
    pub amount: Option<Decimal>,
    pub status: QrStatus,
    pub max_uses: i64,
    pub usage_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub daily_limit: Option<Decimal>,
    pub monthly_limit: Option<Decimal>,
    /// Empty means anyone may pay.
    pub allowed_payers: BTreeSet<AccountId>,
    pub created_at: DateTime<Utc>,
}

impl QrCode {
    pub fn new(owner: AccountId, r#type: QrType) -> Self {
        Self {
            code: format!("QR{}", uuid::Uuid::new_v4().simple()),
            owner,
            r#type,
            amount: None,
            status: QrStatus::Active,
            max_uses: UNLIMITED_USES,
            usage_count: 0,
            expires_at: None,
            daily_limit: None,
            monthly_limit: None,
            allowed_payers: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn ensure_active(&self) -> Result<(), QrRejection> {
        match self.status {
            QrStatus::Active => Ok(()),
            _ => Err(QrRejection::NotActive),
        }
    }

    pub fn ensure_not_expired(&self, now: DateTime<Utc>) -> Result<(), QrRejection> {
        match self.expires_at {
            Some(expiry) if now > expiry => Err(QrRejection::Expired),
            _ => Ok(()),
        }
    }

    pub fn ensure_uses_left(&self) -> Result<(), QrRejection> {
        if self.max_uses >= 0 && self.usage_count >= self.max_uses {
            Err(QrRejection::UsageExceeded)
        } else {
            Ok(())
        }
    }

    /// Exact comparison of the rounded values.
    pub fn ensure_amount_matches(&self, presented: Amount) -> Result<(), QrRejection> {
        match self.amount {
            Some(fixed) if round_minor(fixed) != presented.value() => {
                Err(QrRejection::AmountMismatch)
            }
            _ => Ok(()),
        }
    }

    pub fn ensure_payer_allowed(&self, payer: &AccountId) -> Result<(), QrRejection> {
        if self.allowed_payers.is_empty() || self.allowed_payers.contains(payer) {
            Ok(())
        } else {
            Err(QrRejection::Unauthorized)
        }
    }

    pub fn ensure_not_owner(&self, counterparty: &AccountId) -> Result<(), QrRejection> {
        if *counterparty == self.owner {
            Err(QrRejection::SelfPayment)
        } else {
            Ok(())
        }
    }

    pub fn record_use(&mut self) {
        self.usage_count += 1;
    }

    /// Undo of `record_use`, used only when the paired movement is compensated.
    pub fn release_use(&mut self) {
        self.usage_count = (self.usage_count - 1).max(0);
    }
}
