use super::gate::GateController;
use super::payout::PayoutScheduler;
use super::pipeline::PaymentPipeline;
use super::sessions::SessionStore;
use crate::config::Config;
use crate::domain::ports::{BandwidthLimiterRef, NetworkAuthorizerRef, ReplySignerRef, WalletRef};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running merchant: the payment pipeline plus its background payouts.
///
/// [`Merchant::start`] prepares traffic control, builds the shared services
/// and spawns one payout loop per accepted mint. The loops stop when the
/// cancellation token fires; [`Merchant::shutdown`] fires it and joins them.
pub struct Merchant {
    pipeline: PaymentPipeline,
    gate: GateController,
    sessions: Arc<SessionStore>,
    cancel: CancellationToken,
    payout_handles: Vec<JoinHandle<()>>,
}

impl Merchant {
    pub async fn start(
        config: Arc<Config>,
        wallet: WalletRef,
        signer: ReplySignerRef,
        authorizer: NetworkAuthorizerRef,
        limiter: BandwidthLimiterRef,
    ) -> Result<Self> {
        let gate = GateController::new(authorizer, limiter, config.gate.tiers);
        if let Err(e) = gate.init_traffic_control().await {
            warn!(error = %e, "failed to initialize traffic control, bandwidth limiting may not work");
        }

        let sessions = Arc::new(SessionStore::new());
        let pipeline = PaymentPipeline::new(
            Arc::clone(&config),
            Arc::clone(&wallet),
            signer,
            Arc::clone(&sessions),
            gate.clone(),
        )
        .await?;

        let cancel = CancellationToken::new();
        let payouts = Arc::new(PayoutScheduler::new(config, wallet));
        let payout_handles = payouts.start(cancel.child_token());

        info!(payout_tasks = payout_handles.len(), "merchant started");
        Ok(Self {
            pipeline,
            gate,
            sessions,
            cancel,
            payout_handles,
        })
    }

    pub fn pipeline(&self) -> &PaymentPipeline {
        &self.pipeline
    }

    pub fn gate(&self) -> &GateController {
        &self.gate
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Token that stops the payout loops when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for `signal` (typically ctrl-c), then shuts down.
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            () = signal => info!("shutdown requested"),
            () = self.cancel.cancelled() => {}
        }
        self.shutdown().await;
    }

    /// Stops the payout loops and waits for them to finish.
    ///
    /// Open gates keep their expiry timers.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.payout_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "payout task ended abnormally");
            }
        }
        info!("merchant stopped");
    }
}
