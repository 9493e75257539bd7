use crate::config::Config;
use crate::domain::allotment::MintConfig;
use crate::domain::ports::WalletRef;
use crate::error::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result of one payout pass over a mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutTick {
    /// Balance could not be read; nothing attempted.
    BalanceUnavailable,
    /// Balance did not exceed the retained minimum by the payout threshold.
    BelowThreshold { balance: u64 },
    /// Shares were attempted; `paid` of them succeeded.
    Distributed { aimed: u64, attempted: usize, paid: usize },
}

/// Periodically pays surplus wallet balance out to the profit-share payees.
///
/// One task per accepted mint. Failed payouts are not retried within a tick;
/// the next tick recomputes everything from the current balance.
pub struct PayoutScheduler {
    config: Arc<Config>,
    wallet: WalletRef,
}

impl PayoutScheduler {
    pub fn new(config: Arc<Config>, wallet: WalletRef) -> Self {
        Self { config, wallet }
    }

    /// Spawns one payout loop per accepted mint. The loops run until `cancel`
    /// fires.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(mints = self.config.accepted_mints.len(), "starting payout routine");
        self.config
            .accepted_mints
            .iter()
            .cloned()
            .map(|mint| {
                let scheduler = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move { scheduler.run(mint, cancel).await })
            })
            .collect()
    }

    async fn run(&self, mint: MintConfig, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.payout_interval());
        interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.process_payout(&mint).await;
                }
            }
        }
        info!(mint = %mint.url, "payout routine stopped");
    }

    /// Runs a single payout pass for `mint`.
    pub async fn process_payout(&self, mint: &MintConfig) -> PayoutTick {
        let balance = match self.wallet.balance_for_mint(&mint.url).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(mint = %mint.url, error = %e, "could not read balance, skipping payout");
                return PayoutTick::BalanceUnavailable;
            }
        };

        let threshold = mint.min_balance.saturating_add(mint.min_payout_amount);
        if balance < threshold {
            info!(
                mint = %mint.url,
                balance,
                threshold,
                "skipping payout, balance does not meet threshold"
            );
            return PayoutTick::BelowThreshold { balance };
        }

        let aimed = balance - mint.min_balance;
        let mut attempted = 0;
        let mut paid = 0;

        for share in &self.config.profit_share {
            let share_amount = share_amount(aimed, share.factor);
            let identity = match self.config.identity(&share.identity) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(identity = %share.identity, error = %e, "could not resolve profit share payee");
                    continue;
                }
            };
            attempted += 1;
            if self
                .payout_share(mint, share_amount, &identity.lightning_address)
                .await
                .is_ok()
            {
                paid += 1;
            }
        }

        info!(mint = %mint.url, aimed, attempted, paid, "payout completed");
        PayoutTick::Distributed {
            aimed,
            attempted,
            paid,
        }
    }

    async fn payout_share(&self, mint: &MintConfig, amount: u64, address: &str) -> Result<()> {
        let max_cost = max_cost(amount, mint.balance_tolerance_percent);
        info!(
            mint = %mint.url,
            amount,
            max_cost,
            "processing payout"
        );

        self.wallet
            .payout(&mint.url, amount, max_cost, address)
            .await
            .inspect_err(|e| {
                warn!(mint = %mint.url, amount, error = %e, "error melting to lightning, skipping");
            })
    }
}

/// `aimed * factor`, rounded half away from zero.
pub fn share_amount(aimed: u64, factor: Decimal) -> u64 {
    (Decimal::from(aimed) * factor)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .unwrap_or_default()
}

/// Spend ceiling for a payout of `aimed`.
///
/// Counts `aimed` twice before the tolerance is added:
/// `aimed + (aimed + aimed * tolerance / 100)`.
pub fn max_cost(aimed: u64, tolerance_percent: u64) -> u64 {
    let tolerance = aimed.saturating_add(aimed.saturating_mul(tolerance_percent) / 100);
    aimed.saturating_add(tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProfitShare, PublicIdentity};
    use crate::infrastructure::in_memory::InMemoryWallet;
    use crate::domain::ports::Wallet;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const MINT: &str = "https://mint.example";

    fn mint() -> MintConfig {
        MintConfig {
            url: MINT.to_string(),
            price_per_step: 1,
            price_unit: "sats".to_string(),
            min_purchase_steps: 1,
            min_balance: 100,
            balance_tolerance_percent: 10,
            min_payout_amount: 50,
        }
    }

    fn config() -> Config {
        Config {
            accepted_mints: vec![mint()],
            profit_share: vec![
                ProfitShare {
                    factor: dec!(0.7),
                    identity: "owner".into(),
                },
                ProfitShare {
                    factor: dec!(0.3),
                    identity: "developer".into(),
                },
            ],
            identities: vec![
                PublicIdentity {
                    name: "owner".into(),
                    pubkey: None,
                    lightning_address: "owner@ln.example".into(),
                },
                PublicIdentity {
                    name: "developer".into(),
                    pubkey: None,
                    lightning_address: "dev@ln.example".into(),
                },
            ],
            ..Config::default()
        }
    }

    #[test]
    fn test_share_amount_rounds_half_away_from_zero() {
        assert_eq!(share_amount(5, dec!(0.5)), 3);
        assert_eq!(share_amount(100, dec!(0.7)), 70);
        assert_eq!(share_amount(7, dec!(0.3)), 2);
        assert_eq!(share_amount(0, dec!(1)), 0);
    }

    #[test]
    fn test_max_cost_counts_aimed_twice() {
        assert_eq!(max_cost(100, 10), 210);
        assert_eq!(max_cost(70, 0), 140);
        assert_eq!(max_cost(15, 10), 31);
    }

    #[tokio::test]
    async fn test_below_threshold_skips() {
        let wallet = Arc::new(InMemoryWallet::new());
        wallet.set_balance(MINT, 149).await;
        let scheduler = PayoutScheduler::new(Arc::new(config()), wallet.clone());

        let tick = scheduler.process_payout(&mint()).await;
        assert_eq!(tick, PayoutTick::BelowThreshold { balance: 149 });
        assert!(wallet.payouts().await.is_empty());
    }

    #[tokio::test]
    async fn test_distributes_surplus() {
        let wallet = Arc::new(InMemoryWallet::new());
        wallet.set_balance(MINT, 300).await;
        let scheduler = PayoutScheduler::new(Arc::new(config()), wallet.clone());

        let tick = scheduler.process_payout(&mint()).await;
        assert_eq!(
            tick,
            PayoutTick::Distributed {
                aimed: 200,
                attempted: 2,
                paid: 2
            }
        );

        let payouts = wallet.payouts().await;
        assert_eq!(payouts[0].amount, 140);
        assert_eq!(payouts[0].max_cost, 294);
        assert_eq!(payouts[0].address, "owner@ln.example");
        assert_eq!(payouts[1].amount, 60);
        assert_eq!(payouts[1].max_cost, 126);
        assert_eq!(wallet.balance_for_mint(MINT).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_unresolved_identity_skips_only_that_share() {
        let wallet = Arc::new(InMemoryWallet::new());
        wallet.set_balance(MINT, 300).await;
        let mut config = config();
        config.identities.retain(|identity| identity.name != "owner");
        let scheduler = PayoutScheduler::new(Arc::new(config), wallet.clone());

        let tick = scheduler.process_payout(&mint()).await;
        assert_eq!(
            tick,
            PayoutTick::Distributed {
                aimed: 200,
                attempted: 1,
                paid: 1
            }
        );
        assert_eq!(wallet.payouts().await[0].address, "dev@ln.example");
    }

    #[tokio::test]
    async fn test_failed_payout_is_retried_next_tick() {
        let wallet = Arc::new(InMemoryWallet::new());
        wallet.set_balance(MINT, 300).await;
        wallet.set_fail_payout(true);
        let scheduler = PayoutScheduler::new(Arc::new(config()), wallet.clone());

        let tick = scheduler.process_payout(&mint()).await;
        assert_eq!(
            tick,
            PayoutTick::Distributed {
                aimed: 200,
                attempted: 2,
                paid: 0
            }
        );

        wallet.set_fail_payout(false);
        scheduler.process_payout(&mint()).await;
        assert_eq!(wallet.payouts().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_ticks_until_cancelled() {
        let wallet = Arc::new(InMemoryWallet::new());
        wallet.set_balance(MINT, 300).await;
        let scheduler = Arc::new(PayoutScheduler::new(Arc::new(config()), wallet.clone()));
        let cancel = CancellationToken::new();

        let handles = scheduler.start(cancel.clone());
        assert_eq!(handles.len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(wallet.payouts().await.is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(wallet.payouts().await.len(), 2);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
