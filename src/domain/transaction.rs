use super::wallet::AccountId;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Builds an id of the form `{prefix}-{unix_millis}-{nonce}`.
    pub fn generate(prefix: &str) -> Self {
        let nonce: u32 = rand::thread_rng().r#gen();
        Self(format!(
            "{}-{}-{:08x}",
            prefix,
            Utc::now().timestamp_millis(),
            nonce
        ))
    }

    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
    Transfer,
    Topup,
    Withdrawal,
    QrPayment,
    Fee,
    Refund,
}

impl TransactionType {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            TransactionType::Credit => "CRD",
            TransactionType::Debit => "DBT",
            TransactionType::Transfer => "TRF",
            TransactionType::Topup => "TOP",
            TransactionType::Withdrawal => "WDR",
            TransactionType::QrPayment => "QRP",
            TransactionType::Fee => "FEE",
            TransactionType::Refund => "RFD",
        }
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, TransactionType::Transfer | TransactionType::QrPayment)
    }

    /// Legs that count toward the sender's rolling spend limits.
    pub fn is_spend(&self) -> bool {
        matches!(
            self,
            TransactionType::Transfer | TransactionType::QrPayment | TransactionType::Withdrawal
        )
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => f.write_str("pending"),
            TransactionStatus::Completed => f.write_str("completed"),
            TransactionStatus::Failed => f.write_str("failed"),
        }
    }
}

/// One leg of a money movement as recorded in the ledger.
///
/// `amount` is the principal credited to the receiver; `fee` is what the
/// sender paid on top of it, booked separately as a `Fee` leg.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub external_ref: Option<String>,
    pub r#type: TransactionType,
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub qr_code: Option<String>,
    pub merchant: Option<AccountId>,
    pub original_tx: Option<TransactionId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A pending record with no id; the ledger assigns one on creation.
    pub fn new(
        r#type: TransactionType,
        sender: AccountId,
        receiver: AccountId,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::default(),
            external_ref: None,
            r#type,
            sender,
            receiver,
            amount,
            fee: Decimal::ZERO,
            currency: currency.into(),
            status: TransactionStatus::Pending,
            description: None,
            qr_code: None,
            merchant: None,
            original_tx: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_external_ref(mut self, external_ref: Option<String>) -> Self {
        self.external_ref = external_ref;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Gross amount that left the sender's wallet for this leg.
    pub fn gross_debit(&self) -> Decimal {
        self.amount + self.fee
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    pub fn mark_completed(&mut self) {
        self.status = TransactionStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = TransactionStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }
}
