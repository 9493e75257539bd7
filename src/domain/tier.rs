use crate::error::TollgateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named bandwidth/service tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
    Staff,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Staff => "staff",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            "staff" => Ok(Tier::Staff),
            other => Err(TollgateError::Config(format!("unknown tier: {other}"))),
        }
    }
}

/// Rate ceilings per tier, in kbps. `0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    pub free: u32,
    pub premium: u32,
    pub staff: u32,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            free: 2048,
            premium: 0,
            staff: 0,
        }
    }
}

impl TierLimits {
    pub fn ceiling_kbps(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free,
            Tier::Premium => self.premium,
            Tier::Staff => self.staff,
        }
    }
}

/// Picks a tier from a single payment amount.
#[derive(Debug, Clone, Copy)]
pub struct TierClassifier {
    premium_threshold: u64,
}

impl TierClassifier {
    pub fn new(premium_threshold: u64) -> Self {
        Self { premium_threshold }
    }

    /// `0` and anything below the threshold is free; the threshold and above
    /// is premium. Staff is never assigned from a payment.
    pub fn classify(&self, amount: u64) -> Tier {
        if amount == 0 {
            Tier::Free
        } else if amount >= self.premium_threshold {
            Tier::Premium
        } else {
            Tier::Free
        }
    }
}
