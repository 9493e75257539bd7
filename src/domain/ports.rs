use super::device::MacAddress;
use super::message::{Reply, SignedReply};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Grants or revokes network access at the captive portal.
#[async_trait]
pub trait NetworkAuthorizer: Send + Sync {
    async fn authorize(&self, mac: &MacAddress) -> Result<()>;
    async fn deauthorize(&self, mac: &MacAddress) -> Result<()>;
}

/// Per-device rate limiting on the bridge interface.
#[async_trait]
pub trait BandwidthLimiter: Send + Sync {
    /// Whether a compatible rate-limiting root discipline is already present.
    async fn has_rate_root(&self) -> Result<bool>;
    /// Installs the root discipline with one unlimited root class.
    async fn install_rate_root(&self) -> Result<()>;
    /// Installs or replaces the rate class `class_id` and the rule steering
    /// `mac` traffic into it.
    async fn install_limit(&self, mac: &MacAddress, class_id: u16, kbps: u32) -> Result<()>;
    /// Removes the rule and class for `mac`. Absent entries are not an error.
    async fn remove_limit(&self, mac: &MacAddress, class_id: u16) -> Result<()>;
}

/// A payment token decoded by the wallet, not yet redeemed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentToken {
    pub mint: String,
    pub encoded: String,
}

/// Ecash wallet holding the operator's funds.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn decode(&self, token: &str) -> Result<PaymentToken>;
    /// Swaps the token into the wallet; returns the amount received.
    ///
    /// Fails with `TollgateError::TokenSpent` when the mint reports the token
    /// as already spent.
    async fn redeem(&self, token: &PaymentToken) -> Result<u64>;
    async fn balance_total(&self) -> Result<u64>;
    async fn balance_for_mint(&self, mint: &str) -> Result<u64>;
    /// Creates a token worth exactly `amount` from the wallet's `mint` proofs
    /// and returns it encoded.
    async fn send(&self, mint: &str, amount: u64) -> Result<String>;
    /// Like [`Wallet::send`], but may overpay when exact change is not
    /// available, by at most `max_overpayment_percent` of `amount` and at most
    /// `max_overpayment_absolute`.
    async fn send_with_overpayment(
        &self,
        mint: &str,
        amount: u64,
        max_overpayment_percent: u64,
        max_overpayment_absolute: u64,
    ) -> Result<String>;
    /// Melts `amount` to `address`, spending at most `max_cost` including fees.
    async fn payout(&self, mint: &str, amount: u64, max_cost: u64, address: &str) -> Result<()>;
}

/// Signs outbound replies with the service identity.
#[async_trait]
pub trait ReplySigner: Send + Sync {
    async fn sign(&self, reply: Reply) -> Result<SignedReply>;
}

pub type NetworkAuthorizerRef = Arc<dyn NetworkAuthorizer>;
pub type BandwidthLimiterRef = Arc<dyn BandwidthLimiter>;
pub type WalletRef = Arc<dyn Wallet>;
pub type ReplySignerRef = Arc<dyn ReplySigner>;
