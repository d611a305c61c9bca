use super::wallet::AccountTier;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitWindow {
    Daily,
    Monthly,
}

impl LimitWindow {
    pub const ALL: [LimitWindow; 2] = [LimitWindow::Daily, LimitWindow::Monthly];

    /// Start of the rolling window ending at `now`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            LimitWindow::Daily => now - Duration::hours(24),
            LimitWindow::Monthly => now - Duration::days(30),
        }
    }
}

impl fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitWindow::Daily => f.write_str("daily"),
            LimitWindow::Monthly => f.write_str("monthly"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ceilings {
    pub daily: Decimal,
    pub monthly: Decimal,
}

impl Ceilings {
    pub fn for_window(&self, window: LimitWindow) -> Decimal {
        match window {
            LimitWindow::Daily => self.daily,
            LimitWindow::Monthly => self.monthly,
        }
    }
}

/// Account-level spend ceilings per tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitPolicy {
    pub regular: Ceilings,
    pub merchant: Ceilings,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            regular: Ceilings {
                daily: dec!(10000),
                monthly: dec!(100000),
            },
            merchant: Ceilings {
                daily: dec!(1000000),
                monthly: dec!(10000000),
            },
        }
    }
}

impl LimitPolicy {
    pub fn ceiling(&self, tier: AccountTier, window: LimitWindow) -> Decimal {
        match tier {
            AccountTier::Regular => self.regular.for_window(window),
            AccountTier::Merchant => self.merchant.for_window(window),
        }
    }
}
