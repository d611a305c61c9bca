use crate::domain::wallet::{AccountId, AccountTier};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommandOp {
    Open,
    Topup,
    Transfer,
    Withdraw,
    Lock,
    Unlock,
}

/// One row of a batch file: `op,account,counterparty,amount,tier,reference`.
///
/// Trailing columns an operation does not use may be left empty or omitted.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Command {
    pub op: CommandOp,
    pub account: AccountId,
    #[serde(default)]
    pub counterparty: Option<AccountId>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub tier: Option<AccountTier>,
    /// External reference for money movements, reason for `lock`.
    #[serde(default)]
    pub reference: Option<String>,
}

impl Command {
    pub fn require_amount(&self) -> Result<Decimal> {
        self.amount.ok_or_else(|| {
            PaymentError::ValidationError(format!("{:?} requires an amount", self.op))
        })
    }

    pub fn require_counterparty(&self) -> Result<&AccountId> {
        self.counterparty.as_ref().ok_or_else(|| {
            PaymentError::ValidationError(format!("{:?} requires a counterparty", self.op))
        })
    }

    pub fn tier(&self) -> AccountTier {
        self.tier.unwrap_or_default()
    }
}

/// Reads batch commands from a CSV source.
///
/// Wraps `csv::Reader`, trimming whitespace and accepting short rows.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes one command per row.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, account, counterparty, amount, tier, reference\n\
                    open, alice\n\
                    topup, alice, , 100.00, , dep-1\n\
                    transfer, alice, bob, 19.999, merchant,";
        let reader = CommandReader::new(data.as_bytes());
        let results: Vec<Result<Command>> = reader.commands().collect();
        assert_eq!(results.len(), 3);

        let open = results[0].as_ref().unwrap();
        assert_eq!(open.op, CommandOp::Open);
        assert_eq!(open.account, AccountId::from("alice"));
        assert_eq!(open.amount, None);

        let topup = results[1].as_ref().unwrap();
        assert_eq!(topup.counterparty, None);
        assert_eq!(topup.require_amount().unwrap(), dec!(100.00));
        assert_eq!(topup.reference.as_deref(), Some("dep-1"));
        assert_eq!(topup.tier(), AccountTier::Regular);

        let transfer = results[2].as_ref().unwrap();
        assert_eq!(transfer.require_counterparty().unwrap(), &AccountId::from("bob"));
        assert_eq!(transfer.tier(), AccountTier::Merchant);
        assert_eq!(transfer.reference, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "op, account, counterparty, amount\nrefund, alice, bob, 1.0";
        let reader = CommandReader::new(data.as_bytes());
        let results: Vec<Result<Command>> = reader.commands().collect();
        assert!(results[0].is_err());
    }

    #[test]
    fn test_missing_required_fields() {
        let data = "op, account\ntransfer, alice";
        let reader = CommandReader::new(data.as_bytes());
        let command = reader.commands().next().unwrap().unwrap();
        assert!(command.require_amount().is_err());
        assert!(command.require_counterparty().is_err());
    }
}
