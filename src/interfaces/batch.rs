//! Applies batch commands to a `TransferEngine`, one at a time.

use super::csv::command_reader::{Command, CommandOp};
use crate::application::engine::{TransferEngine, TransferRequest};
use crate::error::Result;
use tracing::debug;

pub async fn apply_command(engine: &TransferEngine, command: Command) -> Result<()> {
    debug!(op = ?command.op, account = %command.account, "applying command");
    match command.op {
        CommandOp::Open => {
            engine.open_wallet(&command.account).await?;
        }
        CommandOp::Topup => {
            let amount = command.require_amount()?;
            engine
                .topup(&command.account, amount, command.reference)
                .await?;
        }
        CommandOp::Transfer => {
            let mut request = TransferRequest::new(
                command.account.clone(),
                command.require_counterparty()?.clone(),
                command.require_amount()?,
            )
            .with_tier(command.tier());
            request.external_ref = command.reference;
            engine.transfer(request).await?;
        }
        CommandOp::Withdraw => {
            let amount = command.require_amount()?;
            engine
                .withdraw(&command.account, amount, command.tier(), command.reference)
                .await?;
        }
        CommandOp::Lock => {
            let reason = command
                .reference
                .unwrap_or_else(|| "locked by batch".to_string());
            engine.lock_wallet(&command.account, reason).await?;
        }
        CommandOp::Unlock => {
            engine.unlock_wallet(&command.account).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::domain::money::Balance;
    use crate::domain::wallet::AccountId;
    use crate::error::PaymentError;
    use crate::interfaces::csv::command_reader::CommandReader;
    use rust_decimal_macros::dec;

    async fn run(engine: &TransferEngine, data: &str) -> Vec<Result<()>> {
        let mut outcomes = Vec::new();
        for command in CommandReader::new(data.as_bytes()).commands() {
            outcomes.push(match command {
                Ok(command) => apply_command(engine, command).await,
                Err(e) => Err(e),
            });
        }
        outcomes
    }

    #[tokio::test]
    async fn test_batch_scenario() {
        let engine = TransferEngine::in_memory(&AppConfig::default());
        let outcomes = run(
            &engine,
            "op,account,counterparty,amount,tier,reference\n\
             open,A\n\
             open,B\n\
             topup,A,,100,,dep-1\n\
             transfer,A,B,40,,\n\
             transfer,B,A,500,,\n",
        )
        .await;

        assert!(outcomes[..4].iter().all(|o| o.is_ok()));
        assert!(matches!(
            outcomes[4],
            Err(PaymentError::InsufficientBalance { .. })
        ));
        assert_eq!(
            engine
                .authoritative_balance(&AccountId::from("A"))
                .await
                .unwrap(),
            Balance::new(dec!(60))
        );
        assert_eq!(
            engine
                .authoritative_balance(&AccountId::from("B"))
                .await
                .unwrap(),
            Balance::new(dec!(40))
        );
    }

    #[tokio::test]
    async fn test_lock_blocks_movement_until_unlocked() {
        let engine = TransferEngine::in_memory(&AppConfig::default());
        let outcomes = run(
            &engine,
            "op,account,counterparty,amount,tier,reference\n\
             open,A\n\
             lock,A,,,,kyc\n\
             topup,A,,10,,\n\
             unlock,A\n\
             topup,A,,10,,\n",
        )
        .await;

        assert!(matches!(outcomes[2], Err(PaymentError::WalletLocked(_))));
        assert!(outcomes[4].is_ok());
        assert_eq!(
            engine
                .authoritative_balance(&AccountId::from("A"))
                .await
                .unwrap(),
            Balance::new(dec!(10))
        );
    }
}
