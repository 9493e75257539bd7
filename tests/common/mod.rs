#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tollgate::application::gate::GateController;
use tollgate::application::pipeline::PaymentPipeline;
use tollgate::application::sessions::SessionStore;
use tollgate::config::Config;
use tollgate::domain::allotment::MintConfig;
use tollgate::domain::message::PaymentMessage;
use tollgate::domain::session::Metric;
use tollgate::domain::tier::TierLimits;
use tollgate::infrastructure::in_memory::{
    InMemoryAuthorizer, InMemoryLimiter, InMemoryWallet, StaticSigner,
};

pub const MINT: &str = "https://mint.example";
pub const PAYER: &str = "npub1payer";
pub const DEVICE: &str = "aa:bb:cc:dd:ee:ff";

/// One hour per step, one sat per step.
pub fn test_config() -> Config {
    Config {
        metric: Metric::Milliseconds,
        step_size: 3_600_000,
        accepted_mints: vec![MintConfig {
            url: MINT.to_string(),
            price_per_step: 1,
            price_unit: "sats".to_string(),
            min_purchase_steps: 1,
            min_balance: 0,
            balance_tolerance_percent: 0,
            min_payout_amount: 0,
        }],
        ..Config::default()
    }
}

pub struct Harness {
    pub pipeline: PaymentPipeline,
    pub wallet: Arc<InMemoryWallet>,
    pub authorizer: Arc<InMemoryAuthorizer>,
    pub limiter: Arc<InMemoryLimiter>,
    pub signer: Arc<StaticSigner>,
    pub sessions: Arc<SessionStore>,
    pub gate: GateController,
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: Config) -> Harness {
    let wallet = Arc::new(InMemoryWallet::new());
    let authorizer = Arc::new(InMemoryAuthorizer::new());
    let limiter = Arc::new(InMemoryLimiter::new());
    let signer = Arc::new(StaticSigner::new("merchant"));
    let sessions = Arc::new(SessionStore::new());
    let gate = GateController::new(authorizer.clone(), limiter.clone(), TierLimits::default());

    let pipeline = PaymentPipeline::new(
        Arc::new(config),
        wallet.clone(),
        signer.clone(),
        sessions.clone(),
        gate.clone(),
    )
    .await
    .expect("pipeline should build");

    Harness {
        pipeline,
        wallet,
        authorizer,
        limiter,
        signer,
        sessions,
        gate,
    }
}

pub fn payment(token: Option<&str>, device: Option<&str>) -> PaymentMessage {
    PaymentMessage {
        payer: PAYER.to_string(),
        payment: token.map(str::to_string),
        device_identifier: device.map(str::to_string),
    }
}

pub fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}
