use crate::domain::device::MacAddress;
use crate::domain::ports::{BandwidthLimiterRef, NetworkAuthorizerRef};
use crate::domain::tier::{Tier, TierLimits};
use crate::error::{Result, TollgateError};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-device gate state.
///
/// `Open` owns the pending expiry task. Whoever tears the gate down (the
/// expiry task or [`GateController::close`]) first moves the entry to
/// `Closing`, deauthorizes outside the lock, then removes the entry and drops
/// the matching sender. Every caller that finds `Closing` waits on the
/// receiver until that happens.
enum GateState {
    Open(JoinHandle<()>),
    Closing(watch::Receiver<()>),
}

struct GateEntry {
    generation: u64,
    state: GateState,
}

impl GateEntry {
    /// Marks the entry as closing; the returned sender must be dropped only
    /// after the entry has been removed.
    fn begin_closing(&mut self) -> watch::Sender<()> {
        let (done, closing) = watch::channel(());
        self.state = GateState::Closing(closing);
        done
    }

    /// A closing entry whose closer went away without removing it.
    fn is_abandoned(&self) -> bool {
        matches!(&self.state, GateState::Closing(closing) if closing.has_changed().is_err())
    }
}

struct GateInner {
    gates: Mutex<HashMap<MacAddress, GateEntry>>,
    authorizer: NetworkAuthorizerRef,
    limiter: BandwidthLimiterRef,
    tiers: TierLimits,
    generations: AtomicU64,
}

impl GateInner {
    /// Removes `mac` if it still belongs to `generation`, then releases
    /// everyone waiting on the close.
    async fn finish_closing(&self, mac: &MacAddress, generation: u64, done: watch::Sender<()>) {
        let mut gates = self.gates.lock().await;
        if gates
            .get(mac)
            .is_some_and(|entry| entry.generation == generation)
        {
            gates.remove(mac);
        }
        drop(done);
    }
}

/// Outcome of a successful [`GateController::authorize_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOpening {
    /// The device was closed and has been authorized.
    Opened,
    /// The device was already open; only its expiry moved.
    Extended,
}

enum Step {
    Authorize,
    AwaitClose(watch::Receiver<()>),
    Done(GateOpening),
}

/// Owns which devices are authorized and when each authorization expires.
///
/// External calls (portal and shaper) are always issued outside the map lock.
/// Each open device has exactly one live expiry task, identified by a
/// generation number; a task that lost a race with an extension finds a newer
/// generation in the map and leaves it alone.
#[derive(Clone)]
pub struct GateController {
    inner: Arc<GateInner>,
}

impl GateController {
    pub fn new(
        authorizer: NetworkAuthorizerRef,
        limiter: BandwidthLimiterRef,
        tiers: TierLimits,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                gates: Mutex::new(HashMap::new()),
                authorizer,
                limiter,
                tiers,
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Sets up the rate-limiting root on the bridge unless one is present.
    pub async fn init_traffic_control(&self) -> Result<()> {
        if self.inner.limiter.has_rate_root().await? {
            debug!("traffic control already initialized");
            return Ok(());
        }
        self.inner.limiter.install_rate_root().await?;
        info!("initialized traffic control");
        Ok(())
    }

    /// Opens the gate for `mac` until `until` (unix seconds), or moves the
    /// expiry of an already open gate, and applies the bandwidth limit of
    /// `tier`.
    pub async fn authorize_until(
        &self,
        mac: &MacAddress,
        until: i64,
        tier: Tier,
    ) -> Result<GateOpening> {
        self.authorize_until_at(mac, until, tier, chrono::Utc::now().timestamp())
            .await
    }

    pub(crate) async fn authorize_until_at(
        &self,
        mac: &MacAddress,
        until: i64,
        tier: Tier,
        now: i64,
    ) -> Result<GateOpening> {
        let duration_secs = match until.checked_sub(now) {
            Some(secs) if secs > 0 => secs,
            Some(_) => return Err(TollgateError::PastDeadline { until, now }),
            None if until < now => return Err(TollgateError::PastDeadline { until, now }),
            None => return Err(TollgateError::DeadlineOutOfRange(until)),
        };
        let delay = Duration::from_secs(duration_secs.unsigned_abs());

        info!(
            mac_address = %mac,
            until_timestamp = until,
            duration_seconds = duration_secs,
            "opening gate until timestamp"
        );

        let mut authorized = false;
        let opening = loop {
            let step = {
                let mut gates = self.inner.gates.lock().await;
                if gates.get(mac).is_some_and(GateEntry::is_abandoned) {
                    warn!(mac_address = %mac, "dropping abandoned close");
                    gates.remove(mac);
                }
                match gates.get_mut(mac) {
                    Some(entry) => match entry.state {
                        GateState::Closing(ref closing) => Step::AwaitClose(closing.clone()),
                        GateState::Open(_) => {
                            let generation = self.next_generation();
                            let timer = self.spawn_expiry(mac.clone(), generation, delay);
                            entry.generation = generation;
                            if let GateState::Open(previous) =
                                std::mem::replace(&mut entry.state, GateState::Open(timer))
                            {
                                previous.abort();
                            }
                            Step::Done(if authorized {
                                GateOpening::Opened
                            } else {
                                GateOpening::Extended
                            })
                        }
                    },
                    None if authorized => {
                        let generation = self.next_generation();
                        let timer = self.spawn_expiry(mac.clone(), generation, delay);
                        gates.insert(
                            mac.clone(),
                            GateEntry {
                                generation,
                                state: GateState::Open(timer),
                            },
                        );
                        Step::Done(GateOpening::Opened)
                    }
                    None => Step::Authorize,
                }
            };

            match step {
                Step::Done(opening) => break opening,
                Step::Authorize => {
                    if let Err(e) = self.inner.authorizer.authorize(mac).await {
                        error!(mac_address = %mac, tier = %tier, error = %e, "error authorizing MAC address");
                        return Err(e);
                    }
                    info!(mac_address = %mac, tier = %tier, "authorization successful for MAC");
                    authorized = true;
                }
                Step::AwaitClose(mut closing) => {
                    debug!(mac_address = %mac, "waiting for in-flight close");
                    // Nothing is ever sent; this resolves once the sender drops.
                    let _ = closing.changed().await;
                    // The close deauthorized the device; authorize again.
                    authorized = false;
                }
            }
        };

        match opening {
            GateOpening::Opened => debug!(mac_address = %mac, "new authorization for MAC"),
            GateOpening::Extended => {
                debug!(mac_address = %mac, "extending access for already authorized MAC")
            }
        }

        self.apply_bandwidth_limit(mac, tier).await;
        Ok(opening)
    }

    /// Closes an open gate ahead of its expiry.
    ///
    /// Returns `false` if the device had no open gate. An expiry or close
    /// already in flight is left to finish on its own. Authorizations for the
    /// same device wait until the deauthorization has landed.
    pub async fn close(&self, mac: &MacAddress) -> Result<bool> {
        let (generation, done) = {
            let mut gates = self.inner.gates.lock().await;
            let Some(entry) = gates.get_mut(mac) else {
                return Ok(false);
            };
            let GateState::Open(timer) = &entry.state else {
                return Ok(false);
            };
            timer.abort();
            (entry.generation, entry.begin_closing())
        };

        if let Err(e) = self.inner.limiter.remove_limit(mac, mac.class_id()).await {
            warn!(mac_address = %mac, error = %e, "failed to remove bandwidth limit");
        }
        let deauthorized = self.inner.authorizer.deauthorize(mac).await;
        self.inner.finish_closing(mac, generation, done).await;

        deauthorized?;
        info!(mac_address = %mac, "closed gate");
        Ok(true)
    }

    /// Whether `mac` currently has an open gate.
    pub async fn is_open(&self, mac: &MacAddress) -> bool {
        matches!(
            self.inner.gates.lock().await.get(mac),
            Some(GateEntry {
                state: GateState::Open(_),
                ..
            })
        )
    }

    pub async fn open_count(&self) -> usize {
        self.inner
            .gates
            .lock()
            .await
            .values()
            .filter(|entry| matches!(entry.state, GateState::Open(_)))
            .count()
    }

    /// Resolves once `mac` has no gate entry left.
    pub async fn wait_closed(&self, mac: &MacAddress, poll: Duration) {
        while self.inner.gates.lock().await.contains_key(mac) {
            tokio::time::sleep(poll).await;
        }
    }

    fn next_generation(&self) -> u64 {
        self.inner.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn spawn_expiry(&self, mac: MacAddress, generation: u64, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(expire(Arc::clone(&self.inner), mac, generation, delay))
    }

    async fn apply_bandwidth_limit(&self, mac: &MacAddress, tier: Tier) {
        let limit = self.inner.tiers.ceiling_kbps(tier);
        let class_id = mac.class_id();

        if limit == 0 {
            if let Err(e) = self.inner.limiter.remove_limit(mac, class_id).await {
                debug!(mac_address = %mac, error = %e, "no bandwidth limit to remove");
            }
            return;
        }

        match self.inner.limiter.install_limit(mac, class_id, limit).await {
            Ok(()) => info!(
                mac_address = %mac,
                tier = %tier,
                limit_kbps = limit,
                "applied bandwidth limit"
            ),
            Err(e) => warn!(
                mac_address = %mac,
                tier = %tier,
                limit_kbps = limit,
                error = %e,
                "failed to set bandwidth limit, continuing without it"
            ),
        }
    }
}

async fn expire(inner: Arc<GateInner>, mac: MacAddress, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;

    let done = {
        let mut gates = inner.gates.lock().await;
        let Some(entry) = gates.get_mut(&mac) else {
            return;
        };
        if entry.generation != generation || !matches!(entry.state, GateState::Open(_)) {
            return;
        }
        entry.begin_closing()
    };

    match inner.authorizer.deauthorize(&mac).await {
        Ok(()) => debug!(mac_address = %mac, "successfully deauthorized MAC after timeout"),
        Err(e) => error!(mac_address = %mac, error = %e, "error deauthorizing MAC after timeout"),
    }
    if let Err(e) = inner.limiter.remove_limit(&mac, mac.class_id()).await {
        warn!(mac_address = %mac, error = %e, "failed to remove bandwidth limit");
    }

    inner.finish_closing(&mac, generation, done).await;
}
