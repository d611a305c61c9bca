//! Fee calculation
//!
//! Rates are percentages: `0.5` means 0.5% of the principal.

use super::money::{Amount, round_minor};
use super::wallet::AccountTier;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeOperation {
    Transfer,
    QrPayment,
    Withdrawal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRate {
    pub tier: AccountTier,
    pub operation: FeeOperation,
    pub percent: Decimal,
}

/// Fee table as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub rates: Vec<FeeRate>,
    pub instant_surcharge_percent: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        use AccountTier::*;
        use FeeOperation::*;
        let rate = |tier, operation, percent| FeeRate {
            tier,
            operation,
            percent,
        };
        Self {
            rates: vec![
                rate(Regular, Transfer, dec!(0)),
                rate(Regular, QrPayment, dec!(0.5)),
                rate(Regular, Withdrawal, dec!(1.0)),
                rate(Merchant, Transfer, dec!(0.5)),
                rate(Merchant, QrPayment, dec!(0)),
                rate(Merchant, Withdrawal, dec!(0.5)),
            ],
            instant_surcharge_percent: dec!(0.25),
        }
    }
}

/// Pure fee lookup keyed by `(tier, operation)`.
///
/// A missing table entry means the operation is fee-free.
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    rates: HashMap<(AccountTier, FeeOperation), Decimal>,
    instant_surcharge: Decimal,
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::from_schedule(&FeeSchedule::default())
    }
}

impl FeeCalculator {
    pub fn from_schedule(schedule: &FeeSchedule) -> Self {
        let rates = schedule
            .rates
            .iter()
            .map(|r| ((r.tier, r.operation), r.percent))
            .collect();
        Self {
            rates,
            instant_surcharge: schedule.instant_surcharge_percent,
        }
    }

    pub fn rate(&self, tier: AccountTier, operation: FeeOperation) -> Decimal {
        self.rates
            .get(&(tier, operation))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Fee in the minor unit, rounded half-up.
    pub fn fee(
        &self,
        amount: Amount,
        tier: AccountTier,
        operation: FeeOperation,
        instant: bool,
    ) -> Decimal {
        let mut percent = self.rate(tier, operation);
        if instant {
            percent += self.instant_surcharge;
        }
        if percent <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        round_minor(amount.value() * percent / dec!(100))
    }
}
