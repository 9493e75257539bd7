use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tollgate::application::gate::GateController;
use tollgate::config::Config;
use tollgate::domain::allotment::compute_allotment;
use tollgate::domain::device::MacAddress;
use tollgate::domain::session::CustomerSession;
use tollgate::domain::tier::{Tier, TierClassifier};
use tollgate::infrastructure::ndsctl::NdsctlAuthorizer;
use tollgate::infrastructure::tc::TcLimiter;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, short, default_value = "/etc/tollgate/config.json")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install the rate-limiting root on the bridge interface if missing
    InitTc,
    /// Open the gate for a device and hold it until it expires
    Open {
        #[arg(long)]
        mac: MacAddress,
        /// Unix timestamp at which the gate closes
        #[arg(long, conflicts_with = "minutes", required_unless_present = "minutes")]
        until: Option<i64>,
        /// Minutes from now at which the gate closes
        #[arg(long)]
        minutes: Option<i64>,
        #[arg(long, default_value = "staff")]
        tier: Tier,
    },
    /// Print the tier a single payment amount buys
    Classify {
        #[arg(long)]
        amount: u64,
    },
    /// Preview the allotment and expiry a payment buys at a mint
    Quote {
        #[arg(long)]
        mint: String,
        #[arg(long)]
        amount: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = Config::load(&cli.config).into_diagnostic()?;

    match cli.command {
        Command::InitTc => {
            let gate = gate_controller(&config);
            gate.init_traffic_control().await.into_diagnostic()?;
        }
        Command::Open {
            mac,
            until,
            minutes,
            tier,
        } => {
            let now = chrono::Utc::now().timestamp();
            let until = match (until, minutes) {
                (Some(until), _) => until,
                (None, Some(minutes)) => minutes
                    .checked_mul(60)
                    .and_then(|secs| now.checked_add(secs))
                    .ok_or_else(|| miette!("--minutes {minutes} is out of range"))?,
                (None, None) => return Err(miette!("either --until or --minutes is required")),
            };

            let gate = gate_controller(&config);
            if let Err(e) = gate.init_traffic_control().await {
                warn!(error = %e, "failed to initialize traffic control, bandwidth limiting may not work");
            }
            gate.authorize_until(&mac, until, tier)
                .await
                .into_diagnostic()?;
            println!("{mac} open until {until} ({tier})");

            tokio::select! {
                () = gate.wait_closed(&mac, Duration::from_secs(1)) => {
                    info!(mac_address = %mac, "gate closed");
                }
                _ = tokio::signal::ctrl_c() => {
                    gate.close(&mac).await.into_diagnostic()?;
                }
            }
        }
        Command::Classify { amount } => {
            let classifier = TierClassifier::new(config.gate.premium_threshold);
            println!("{}", classifier.classify(amount));
        }
        Command::Quote { mint, amount } => {
            let mint_config = config
                .mint(&mint)
                .ok_or_else(|| miette!("mint {mint} is not accepted"))?;
            let allotment = compute_allotment(amount, mint_config, config.step_size, config.metric)
                .into_diagnostic()?;
            let now = chrono::Utc::now().timestamp();
            let mac: MacAddress = "00:00:00:00:00:00".parse().into_diagnostic()?;
            let session = CustomerSession::new(mac, config.metric, allotment, now);
            let tier = TierClassifier::new(config.gate.premium_threshold).classify(amount);

            let quote = serde_json::json!({
                "mint": mint,
                "amount": amount,
                "allotment": allotment,
                "metric": config.metric,
                "tier": tier,
                "expires_at": session.expires_at(now),
            });
            println!("{quote}");
        }
    }

    Ok(())
}

fn gate_controller(config: &Config) -> GateController {
    GateController::new(
        Arc::new(NdsctlAuthorizer::new(&config.gate.ndsctl)),
        Arc::new(TcLimiter::new(&config.gate.tc, config.gate.interface.clone())),
        config.gate.tiers,
    )
}
