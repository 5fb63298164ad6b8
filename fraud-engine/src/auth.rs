//! Authentication tier selection
//!
//! The engine never performs a challenge itself. It only asks a [`TierPolicy`]
//! which tier a CHALLENGE outcome requires.

use crate::RiskLevel;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Authentication tier, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuthTier {
    /// PIN only
    Low,
    /// PIN + OTP
    Medium,
    /// PIN + OTP + additional verification
    High,
}

impl AuthTier {
    /// Factors the tier asks for
    pub fn factors(&self) -> &'static str {
        match self {
            AuthTier::Low => "PIN",
            AuthTier::Medium => "PIN and one-time code",
            AuthTier::High => "PIN, one-time code and additional verification",
        }
    }
}

/// Amount band used for tier selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AmountTier {
    /// <= 5,000
    Low,
    /// 5,001 - 50,000
    Medium,
    /// > 50,000
    High,
}

impl AmountTier {
    /// Band an amount
    pub fn of(amount: Decimal) -> Self {
        if amount <= Decimal::from(5_000) {
            AmountTier::Low
        } else if amount <= Decimal::from(50_000) {
            AmountTier::Medium
        } else {
            AmountTier::High
        }
    }
}

/// Chooses the tier a challenged transaction must satisfy
pub trait TierPolicy: Send + Sync {
    /// Required tier for a challenged transaction
    fn required_tier(&self, risk_level: RiskLevel, amount: Decimal) -> AuthTier;
}

/// Default policy: the stricter of the risk-level tier and the amount tier
#[derive(Debug, Clone, Copy, Default)]
pub struct TieredAuthPolicy;

impl TierPolicy for TieredAuthPolicy {
    fn required_tier(&self, risk_level: RiskLevel, amount: Decimal) -> AuthTier {
        let by_risk = match risk_level {
            RiskLevel::Low => AuthTier::Low,
            RiskLevel::Medium => AuthTier::Medium,
            RiskLevel::High | RiskLevel::Critical => AuthTier::High,
        };
        let by_amount = match AmountTier::of(amount) {
            AmountTier::Low => AuthTier::Low,
            AmountTier::Medium => AuthTier::Medium,
            AmountTier::High => AuthTier::High,
        };
        by_risk.max(by_amount)
    }
}
