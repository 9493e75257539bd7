use super::session::Metric;
use crate::error::{Result, TollgateError};
use serde::{Deserialize, Serialize};

/// Pricing and payout settings for one accepted mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintConfig {
    pub url: String,
    pub price_per_step: u64,
    #[serde(default = "default_price_unit")]
    pub price_unit: String,
    #[serde(default = "default_min_purchase_steps")]
    pub min_purchase_steps: u64,
    #[serde(default)]
    pub min_balance: u64,
    #[serde(default)]
    pub balance_tolerance_percent: u64,
    #[serde(default)]
    pub min_payout_amount: u64,
}

fn default_price_unit() -> String {
    "sats".to_string()
}

fn default_min_purchase_steps() -> u64 {
    1
}

/// Converts a received amount into an allotment in `metric` units.
///
/// Only whole steps are credited; any remainder of the payment is kept
/// without credit.
pub fn compute_allotment(
    amount_received: u64,
    mint: &MintConfig,
    step_size: u64,
    metric: Metric,
) -> Result<u64> {
    if mint.price_per_step == 0 {
        return Err(TollgateError::Config(format!(
            "price_per_step is zero for mint {}",
            mint.url
        )));
    }
    let steps = amount_received / mint.price_per_step;

    if steps < mint.min_purchase_steps {
        return Err(TollgateError::InsufficientPayment {
            steps,
            min_steps: mint.min_purchase_steps,
        });
    }

    match metric {
        Metric::Milliseconds => {
            let total_ms = steps.saturating_mul(step_size);
            tracing::debug!(steps, total_ms, step_size, "converted steps to milliseconds");
            Ok(total_ms)
        }
        other => Err(TollgateError::UnsupportedMetric(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint(price_per_step: u64, min_purchase_steps: u64) -> MintConfig {
        MintConfig {
            url: "https://mint.example".to_string(),
            price_per_step,
            price_unit: "sats".to_string(),
            min_purchase_steps,
            min_balance: 0,
            balance_tolerance_percent: 0,
            min_payout_amount: 0,
        }
    }

    #[test]
    fn test_partial_steps_are_truncated() {
        let allotment = compute_allotment(25, &mint(10, 1), 3_600_000, Metric::Milliseconds);
        assert_eq!(allotment.unwrap(), 7_200_000);
    }

    #[test]
    fn test_below_minimum_purchase() {
        let result = compute_allotment(5, &mint(10, 1), 3_600_000, Metric::Milliseconds);
        assert!(matches!(
            result,
            Err(TollgateError::InsufficientPayment {
                steps: 0,
                min_steps: 1
            })
        ));

        let result = compute_allotment(29, &mint(10, 3), 60_000, Metric::Milliseconds);
        assert!(matches!(
            result,
            Err(TollgateError::InsufficientPayment {
                steps: 2,
                min_steps: 3
            })
        ));
    }

    #[test]
    fn test_unsupported_metric() {
        let result = compute_allotment(100, &mint(10, 1), 1024, Metric::Bytes);
        assert!(matches!(result, Err(TollgateError::UnsupportedMetric(m)) if m == "bytes"));
    }

    #[test]
    fn test_zero_price_rejected() {
        let result = compute_allotment(100, &mint(0, 1), 1000, Metric::Milliseconds);
        assert!(matches!(result, Err(TollgateError::Config(_))));
    }
}
