use crate::domain::wallet::Wallet;
use crate::error::{PaymentError, Result};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow<'a> {
    account: &'a str,
    balance: String,
    currency: &'a str,
    status: String,
}

/// Writes final wallet states as `account,balance,currency,status`.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, wallets: &[Wallet]) -> Result<()> {
        for wallet in wallets {
            self.writer.serialize(WalletRow {
                account: wallet.owner.as_str(),
                balance: wallet.balance.to_string(),
                currency: &wallet.currency,
                status: wallet.status.to_string(),
            })?;
        }
        self.writer.flush().map_err(PaymentError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use crate::domain::wallet::AccountId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rows() {
        let mut alice = Wallet::new(AccountId::from("alice"), "USD");
        alice.balance = Balance::new(dec!(60));
        let mut bob = Wallet::new(AccountId::from("bob"), "USD");
        bob.lock("fraud review");

        let mut out = Vec::new();
        WalletWriter::new(&mut out)
            .write_wallets(&[alice, bob])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "account,balance,currency,status\nalice,60.00,USD,active\nbob,0.00,USD,locked\n"
        );
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let mut out = Vec::new();
        WalletWriter::new(&mut out).write_wallets(&[]).unwrap();
        assert!(out.is_empty());
    }
}
