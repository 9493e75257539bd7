//! Service configuration.
//!
//! Loaded from a JSON file and overridden by `TOLLGATE_`-prefixed environment
//! variables (nested keys use `__`, e.g. `TOLLGATE_GATE__INTERFACE=br-guest`).

use crate::domain::allotment::MintConfig;
use crate::domain::session::Metric;
use crate::domain::tier::TierLimits;
use crate::error::{Result, TollgateError};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub metric: Metric,
    /// Metric units bought by one step.
    pub step_size: u64,
    #[serde(default)]
    pub accepted_mints: Vec<MintConfig>,
    #[serde(default)]
    pub profit_share: Vec<ProfitShare>,
    #[serde(default)]
    pub identities: Vec<PublicIdentity>,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default = "default_payout_interval_secs")]
    pub payout_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metric: Metric::Milliseconds,
            step_size: 60_000,
            accepted_mints: Vec::new(),
            profit_share: Vec::new(),
            identities: Vec::new(),
            gate: GateConfig::default(),
            payout_interval_secs: default_payout_interval_secs(),
        }
    }
}

/// Fraction of surplus paid to a named identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitShare {
    pub factor: Decimal,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub name: String,
    #[serde(default)]
    pub pubkey: Option<String>,
    pub lightning_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Bridge interface carrying customer traffic.
    pub interface: String,
    pub ndsctl: PathBuf,
    pub tc: PathBuf,
    /// Smallest single payment that buys the premium tier.
    pub premium_threshold: u64,
    pub tiers: TierLimits,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            interface: "br-lan".to_string(),
            ndsctl: PathBuf::from("ndsctl"),
            tc: PathBuf::from("tc"),
            premium_threshold: 10,
            tiers: TierLimits::default(),
        }
    }
}

fn default_payout_interval_secs() -> u64 {
    60
}

impl Config {
    /// Loads `path` layered over defaults and the environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Json::file(path.as_ref()))
            .merge(Env::prefixed("TOLLGATE_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_size == 0 {
            return Err(TollgateError::Config("step_size must be positive".into()));
        }
        if self.payout_interval_secs == 0 {
            return Err(TollgateError::Config(
                "payout_interval_secs must be positive".into(),
            ));
        }
        for mint in &self.accepted_mints {
            if mint.price_per_step == 0 {
                return Err(TollgateError::Config(format!(
                    "price_per_step must be positive for mint {}",
                    mint.url
                )));
            }
        }
        for share in &self.profit_share {
            if share.factor < Decimal::ZERO || share.factor > Decimal::ONE {
                return Err(TollgateError::Config(format!(
                    "profit share factor {} for '{}' is outside [0, 1]",
                    share.factor, share.identity
                )));
            }
        }
        Ok(())
    }

    pub fn mint(&self, url: &str) -> Option<&MintConfig> {
        self.accepted_mints.iter().find(|mint| mint.url == url)
    }

    pub fn identity(&self, name: &str) -> Result<&PublicIdentity> {
        self.identities
            .iter()
            .find(|identity| identity.name == name)
            .ok_or_else(|| TollgateError::IdentityNotFound(name.to_string()))
    }

    pub fn payout_interval(&self) -> Duration {
        Duration::from_secs(self.payout_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "metric": "milliseconds",
        "step_size": 60000,
        "accepted_mints": [
            {"url": "https://mint.example", "price_per_step": 1, "min_purchase_steps": 5,
             "min_balance": 64, "balance_tolerance_percent": 10, "min_payout_amount": 128}
        ],
        "profit_share": [
            {"factor": 0.7, "identity": "owner"},
            {"factor": 0.3, "identity": "developer"}
        ],
        "identities": [
            {"name": "owner", "lightning_address": "owner@ln.example"}
        ]
    }"#;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_with_defaults() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.metric, Metric::Milliseconds);
        assert_eq!(config.accepted_mints[0].price_unit, "sats");
        assert_eq!(config.profit_share[0].factor, dec!(0.7));
        assert_eq!(config.gate.interface, "br-lan");
        assert_eq!(config.gate.premium_threshold, 10);
        assert_eq!(config.payout_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_lookup_helpers() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();

        assert!(config.mint("https://mint.example").is_some());
        assert!(config.mint("https://other.example").is_none());
        assert_eq!(
            config.identity("owner").unwrap().lightning_address,
            "owner@ln.example"
        );
        assert!(matches!(
            config.identity("developer"),
            Err(TollgateError::IdentityNotFound(_))
        ));
    }

    #[test]
    fn test_rejects_zero_price() {
        let file = write_config(
            r#"{"metric": "milliseconds", "step_size": 1000,
                "accepted_mints": [{"url": "m", "price_per_step": 0}]}"#,
        );
        assert!(matches!(
            Config::load(file.path()),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_factor() {
        let mut config = Config::default();
        config.profit_share.push(ProfitShare {
            factor: dec!(1.5),
            identity: "owner".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_payout_interval() {
        let file = write_config(
            r#"{"metric": "milliseconds", "step_size": 1000, "payout_interval_secs": 0}"#,
        );
        let result = Config::load(file.path());
        assert!(
            matches!(result, Err(TollgateError::Config(ref msg)) if msg.contains("payout_interval_secs"))
        );
    }
}
