//! In-memory implementations of every port.
//!
//! They record the calls they receive and can be told to fail, which lets the
//! gate and payment logic be exercised without root privileges, a captive
//! portal daemon, or a live mint.

use crate::domain::device::MacAddress;
use crate::domain::message::{Reply, SignedReply};
use crate::domain::ports::{BandwidthLimiter, NetworkAuthorizer, PaymentToken, ReplySigner, Wallet};
use crate::error::{Result, TollgateError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct AuthorizerState {
    authorized: HashSet<MacAddress>,
    authorize_calls: usize,
    deauthorize_calls: usize,
    deauthorize_delay: Option<Duration>,
}

/// Captive-portal stand-in tracking which devices are authorized.
#[derive(Default)]
pub struct InMemoryAuthorizer {
    state: Mutex<AuthorizerState>,
    fail_authorize: AtomicBool,
}

impl InMemoryAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_authorize(&self, fail: bool) {
        self.fail_authorize.store(fail, Ordering::SeqCst);
    }

    /// Makes each deauthorization take `delay` before it lands.
    pub async fn set_deauthorize_delay(&self, delay: Duration) {
        self.state.lock().await.deauthorize_delay = Some(delay);
    }

    pub async fn is_authorized(&self, mac: &MacAddress) -> bool {
        self.state.lock().await.authorized.contains(mac)
    }

    pub async fn authorized_count(&self) -> usize {
        self.state.lock().await.authorized.len()
    }

    pub async fn authorize_calls(&self) -> usize {
        self.state.lock().await.authorize_calls
    }

    pub async fn deauthorize_calls(&self) -> usize {
        self.state.lock().await.deauthorize_calls
    }
}

#[async_trait]
impl NetworkAuthorizer for InMemoryAuthorizer {
    async fn authorize(&self, mac: &MacAddress) -> Result<()> {
        let mut state = self.state.lock().await;
        state.authorize_calls += 1;
        if self.fail_authorize.load(Ordering::SeqCst) {
            return Err(TollgateError::Authorization {
                mac_address: mac.to_string(),
                reason: "portal rejected client".to_string(),
            });
        }
        state.authorized.insert(mac.clone());
        Ok(())
    }

    async fn deauthorize(&self, mac: &MacAddress) -> Result<()> {
        let delay = {
            let mut state = self.state.lock().await;
            state.deauthorize_calls += 1;
            state.deauthorize_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().await.authorized.remove(mac);
        Ok(())
    }
}

#[derive(Default)]
struct LimiterState {
    root_installed: bool,
    limits: HashMap<MacAddress, (u16, u32)>,
    install_calls: usize,
    remove_calls: usize,
}

/// Traffic shaper stand-in keeping the active per-device limits.
#[derive(Default)]
pub struct InMemoryLimiter {
    state: Mutex<LimiterState>,
    fail: AtomicBool,
}

impl InMemoryLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every limiter operation fails while set.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// `(class_id, kbps)` currently applied to `mac`.
    pub async fn limit_for(&self, mac: &MacAddress) -> Option<(u16, u32)> {
        self.state.lock().await.limits.get(mac).copied()
    }

    pub async fn root_installed(&self) -> bool {
        self.state.lock().await.root_installed
    }

    pub async fn install_calls(&self) -> usize {
        self.state.lock().await.install_calls
    }

    pub async fn remove_calls(&self) -> usize {
        self.state.lock().await.remove_calls
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TollgateError::Command {
                program: "tc".to_string(),
                status: "exit status: 2".to_string(),
                stderr: format!("{operation}: RTNETLINK answers: Operation not permitted"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BandwidthLimiter for InMemoryLimiter {
    async fn has_rate_root(&self) -> Result<bool> {
        self.check("qdisc show")?;
        Ok(self.state.lock().await.root_installed)
    }

    async fn install_rate_root(&self) -> Result<()> {
        self.check("qdisc add")?;
        self.state.lock().await.root_installed = true;
        Ok(())
    }

    async fn install_limit(&self, mac: &MacAddress, class_id: u16, kbps: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        state.install_calls += 1;
        self.check("class replace")?;
        state.limits.insert(mac.clone(), (class_id, kbps));
        Ok(())
    }

    async fn remove_limit(&self, mac: &MacAddress, _class_id: u16) -> Result<()> {
        let mut state = self.state.lock().await;
        state.remove_calls += 1;
        self.check("class del")?;
        state.limits.remove(mac);
        Ok(())
    }
}

/// A payout the wallet was asked to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRecord {
    pub mint: String,
    pub amount: u64,
    pub max_cost: u64,
    pub address: String,
}

#[derive(Default)]
struct WalletState {
    issued: HashMap<String, (String, u64)>,
    spent: HashSet<String>,
    balances: HashMap<String, u64>,
    change_units: HashMap<String, u64>,
    payouts: Vec<PayoutRecord>,
    sent: u64,
}

impl WalletState {
    fn change_unit(&self, mint: &str) -> u64 {
        self.change_units.get(mint).copied().unwrap_or(1).max(1)
    }

    /// Debits `amount` and issues a fresh token for it.
    fn mint_token(&mut self, mint: &str, amount: u64) -> Result<String> {
        {
            let balance = self.balances.entry(mint.to_string()).or_default();
            if *balance < amount {
                return Err(TollgateError::Wallet(format!(
                    "not enough proofs: need {amount}, have {balance}"
                )));
            }
            *balance -= amount;
        }
        self.sent += 1;
        let token = format!("cashuBsent{}", self.sent);
        self.issued
            .insert(token.clone(), (mint.to_string(), amount));
        Ok(token)
    }
}

/// Wallet stand-in. Tokens must be issued before they can be decoded.
#[derive(Default)]
pub struct InMemoryWallet {
    state: Mutex<WalletState>,
    fail_redeem: AtomicBool,
    fail_payout: AtomicBool,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` as worth `amount` at `mint`.
    pub async fn issue(&self, token: &str, mint: &str, amount: u64) {
        self.state
            .lock()
            .await
            .issued
            .insert(token.to_string(), (mint.to_string(), amount));
    }

    pub async fn set_balance(&self, mint: &str, amount: u64) {
        self.state
            .lock()
            .await
            .balances
            .insert(mint.to_string(), amount);
    }

    /// Smallest amount the `mint` proofs can be split into. Defaults to 1.
    pub async fn set_change_unit(&self, mint: &str, unit: u64) {
        self.state
            .lock()
            .await
            .change_units
            .insert(mint.to_string(), unit);
    }

    pub fn set_fail_redeem(&self, fail: bool) {
        self.fail_redeem.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_payout(&self, fail: bool) {
        self.fail_payout.store(fail, Ordering::SeqCst);
    }

    pub async fn payouts(&self) -> Vec<PayoutRecord> {
        self.state.lock().await.payouts.clone()
    }
}

#[async_trait]
impl Wallet for InMemoryWallet {
    async fn decode(&self, token: &str) -> Result<PaymentToken> {
        if !token.starts_with("cashu") {
            return Err(TollgateError::InvalidToken(
                "token does not carry a cashu prefix".to_string(),
            ));
        }
        let state = self.state.lock().await;
        let (mint, _) = state
            .issued
            .get(token)
            .ok_or_else(|| TollgateError::InvalidToken("unknown token".to_string()))?;
        Ok(PaymentToken {
            mint: mint.clone(),
            encoded: token.to_string(),
        })
    }

    async fn redeem(&self, token: &PaymentToken) -> Result<u64> {
        if self.fail_redeem.load(Ordering::SeqCst) {
            return Err(TollgateError::Redemption("mint unreachable".to_string()));
        }
        let mut state = self.state.lock().await;
        if state.spent.contains(&token.encoded) {
            return Err(TollgateError::TokenSpent);
        }
        let (mint, amount) = state
            .issued
            .get(&token.encoded)
            .cloned()
            .ok_or_else(|| TollgateError::Redemption("unknown token".to_string()))?;
        state.spent.insert(token.encoded.clone());
        *state.balances.entry(mint).or_default() += amount;
        Ok(amount)
    }

    async fn balance_total(&self) -> Result<u64> {
        Ok(self.state.lock().await.balances.values().sum())
    }

    async fn balance_for_mint(&self, mint: &str) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .await
            .balances
            .get(mint)
            .copied()
            .unwrap_or_default())
    }

    async fn send(&self, mint: &str, amount: u64) -> Result<String> {
        let mut state = self.state.lock().await;
        let unit = state.change_unit(mint);
        if amount % unit != 0 {
            return Err(TollgateError::Wallet(format!(
                "no exact change for {amount} at {mint}"
            )));
        }
        state.mint_token(mint, amount)
    }

    async fn send_with_overpayment(
        &self,
        mint: &str,
        amount: u64,
        max_overpayment_percent: u64,
        max_overpayment_absolute: u64,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        let unit = state.change_unit(mint);
        let rounded = amount.div_ceil(unit).saturating_mul(unit);
        let overpayment = rounded - amount;
        let allowed = (amount.saturating_mul(max_overpayment_percent) / 100)
            .min(max_overpayment_absolute);
        if overpayment > allowed {
            return Err(TollgateError::Wallet(format!(
                "overpayment of {overpayment} exceeds limit of {allowed}"
            )));
        }
        state.mint_token(mint, rounded)
    }

    async fn payout(&self, mint: &str, amount: u64, max_cost: u64, address: &str) -> Result<()> {
        if self.fail_payout.load(Ordering::SeqCst) {
            return Err(TollgateError::Payout("melt quote expired".to_string()));
        }
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(mint.to_string()).or_default();
        if *balance < amount {
            return Err(TollgateError::Payout(format!(
                "insufficient balance: need {amount}, have {balance}"
            )));
        }
        *balance -= amount;
        state.payouts.push(PayoutRecord {
            mint: mint.to_string(),
            amount,
            max_cost,
            address: address.to_string(),
        });
        Ok(())
    }
}

/// Signer producing deterministic, sequence-numbered signatures.
pub struct StaticSigner {
    author: String,
    sequence: AtomicU64,
    fail: AtomicBool,
}

impl StaticSigner {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            sequence: AtomicU64::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReplySigner for StaticSigner {
    async fn sign(&self, reply: Reply) -> Result<SignedReply> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TollgateError::Signing("signing key unavailable".to_string()));
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(SignedReply {
            author: self.author.clone(),
            created_at: chrono::Utc::now().timestamp(),
            reply,
            signature: format!("{}:{sequence}", self.author),
        })
    }
}
