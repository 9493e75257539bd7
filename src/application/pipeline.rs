use super::gate::GateController;
use super::sessions::SessionStore;
use crate::config::Config;
use crate::domain::allotment::{MintConfig, compute_allotment};
use crate::domain::device::MacAddress;
use crate::domain::message::{
    Advertisement, NoticeCode, NoticeLevel, NoticeReply, PaymentMessage, PricePerStep, Reply,
    SessionReply, SignedReply,
};
use crate::domain::ports::{ReplySignerRef, WalletRef};
use crate::domain::session::{CustomerSession, Metric};
use crate::domain::tier::TierClassifier;
use crate::error::{Result, TollgateError};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shortest string that could plausibly be an ecash token.
const MIN_FUNDING_TOKEN_LEN: usize = 10;

struct Rejection {
    code: NoticeCode,
    message: String,
}

impl Rejection {
    fn new(code: NoticeCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Turns payments into sessions and open gates.
///
/// Every customer-facing failure becomes a signed notice; the only error
/// returned to the caller is a failure to sign the reply itself.
pub struct PaymentPipeline {
    config: Arc<Config>,
    wallet: WalletRef,
    signer: ReplySignerRef,
    sessions: Arc<SessionStore>,
    gate: GateController,
    classifier: TierClassifier,
    advertisement: String,
}

impl PaymentPipeline {
    /// Builds the pipeline and signs the pricing advertisement once.
    pub async fn new(
        config: Arc<Config>,
        wallet: WalletRef,
        signer: ReplySignerRef,
        sessions: Arc<SessionStore>,
        gate: GateController,
    ) -> Result<Self> {
        let advertisement = create_advertisement(&config, &signer).await?;
        let classifier = TierClassifier::new(config.gate.premium_threshold);
        Ok(Self {
            config,
            wallet,
            signer,
            sessions,
            gate,
            classifier,
            advertisement,
        })
    }

    /// Processes a payment and returns either a session or a notice reply.
    pub async fn purchase_session(&self, payment: &PaymentMessage) -> Result<SignedReply> {
        match self.process(payment).await {
            Ok(session) => {
                let reply = SessionReply::from_session(&session, &payment.payer);
                self.signer.sign(Reply::Session(reply)).await
            }
            Err(rejection) => {
                warn!(
                    payer = %payment.payer,
                    code = %rejection.code,
                    message = %rejection.message,
                    "payment rejected"
                );
                self.create_notice(
                    NoticeLevel::Error,
                    rejection.code,
                    rejection.message,
                    Some(&payment.payer),
                )
                .await
            }
        }
    }

    async fn process(
        &self,
        payment: &PaymentMessage,
    ) -> std::result::Result<CustomerSession, Rejection> {
        let token = payment
            .payment
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                Rejection::new(
                    NoticeCode::InvalidPaymentToken,
                    "Failed to extract payment token: no payment tag found in event",
                )
            })?;

        let device_identifier = payment
            .device_identifier
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Rejection::new(
                    NoticeCode::InvalidDeviceIdentifier,
                    "Failed to extract device identifier: no device-identifier tag found in event",
                )
            })?;

        let mac: MacAddress = device_identifier.parse().map_err(|_| {
            Rejection::new(
                NoticeCode::InvalidMacAddress,
                format!("Invalid MAC address: {device_identifier}"),
            )
        })?;

        let token = self.wallet.decode(token).await.map_err(|e| {
            Rejection::new(
                NoticeCode::PaymentErrorInvalidToken,
                format!("Invalid cashu token: {e}"),
            )
        })?;

        let amount = self.wallet.redeem(&token).await.map_err(|e| match e {
            TollgateError::TokenSpent => Rejection::new(
                NoticeCode::PaymentErrorTokenSpent,
                "Token has already been spent",
            ),
            other => Rejection::new(
                NoticeCode::PaymentProcessingFailed,
                format!("Payment processing failed: {other}"),
            ),
        })?;
        info!(mac_address = %mac, mint = %token.mint, amount, "payment redeemed");

        // Funds are captured from here on.
        let allotment = self.calculate_allotment(amount, &token.mint).map_err(|e| {
            error!(mac_address = %mac, mint = %token.mint, amount, error = %e, "redeemed payment bought no allotment");
            Rejection::new(
                NoticeCode::AllotmentCalculationFailed,
                format!("Failed to calculate allotment: {e}"),
            )
        })?;

        let session = self
            .sessions
            .add_allotment(&mac, self.config.metric, allotment)
            .await
            .map_err(|e| {
                Rejection::new(
                    NoticeCode::SessionManagementFailed,
                    format!("Failed to manage session: {e}"),
                )
            })?;

        let now = chrono::Utc::now().timestamp();
        let until = session.expires_at(now);

        // Tier follows this payment alone, not the cumulative session.
        let tier = self.classifier.classify(amount);
        info!(mac_address = %mac, tier = %tier, amount, "determined tier");

        if let Err(e) = self.gate.authorize_until(&mac, until, tier).await {
            // The allotment stays credited to the session; the next successful
            // payment for this device reopens the gate with the full total.
            error!(
                mac_address = %mac,
                mint = %token.mint,
                amount,
                allotment = session.allotment,
                error = %e,
                "gate failed to open after payment was captured"
            );
            return Err(Rejection::new(
                NoticeCode::GateOpeningFailed,
                format!("Failed to open gate for session: {e}"),
            ));
        }

        Ok(session)
    }

    fn calculate_allotment(&self, amount: u64, mint_url: &str) -> Result<u64> {
        let mint = self
            .config
            .mint(mint_url)
            .ok_or_else(|| TollgateError::UnknownMint(mint_url.to_string()))?;
        compute_allotment(amount, mint, self.config.step_size, self.config.metric)
    }

    /// Builds and signs a notice, optionally addressed to `payer`.
    pub async fn create_notice(
        &self,
        level: NoticeLevel,
        code: NoticeCode,
        message: impl Into<String>,
        payer: Option<&str>,
    ) -> Result<SignedReply> {
        let notice = NoticeReply {
            level,
            code,
            message: message.into(),
            payer: payer.filter(|p| !p.is_empty()).map(str::to_string),
        };
        self.signer.sign(Reply::Notice(notice)).await
    }

    /// Signed pricing advertisement, as JSON.
    pub fn advertisement(&self) -> &str {
        &self.advertisement
    }

    pub fn accepted_mints(&self) -> &[MintConfig] {
        &self.config.accepted_mints
    }

    pub async fn balance(&self) -> Result<u64> {
        self.wallet.balance_total().await
    }

    pub async fn balance_for_mint(&self, mint: &str) -> Result<u64> {
        self.wallet.balance_for_mint(mint).await
    }

    pub async fn get_session(&self, mac: &MacAddress) -> Result<CustomerSession> {
        self.sessions.get_session(mac).await
    }

    pub async fn add_allotment(
        &self,
        mac: &MacAddress,
        metric: Metric,
        amount: u64,
    ) -> Result<CustomerSession> {
        self.sessions.add_allotment(mac, metric, amount).await
    }

    /// Creates a token worth `amount` from the wallet's balance at `mint`.
    pub async fn create_payment_token(&self, mint: &str, amount: u64) -> Result<String> {
        let available = self.wallet.balance_for_mint(mint).await?;
        let total = self.wallet.balance_total().await?;
        info!(amount, mint, available, total, "creating payment token");

        if available < amount {
            return Err(TollgateError::InsufficientBalance {
                mint: mint.to_string(),
                needed: amount,
                available,
                total,
            });
        }

        let token = self.wallet.send(mint, amount).await?;
        if token.is_empty() {
            return Err(TollgateError::Wallet(
                "token serialization returned empty string".to_string(),
            ));
        }
        info!(token_len = token.len(), mint, "created payment token");
        Ok(token)
    }

    /// Like [`PaymentPipeline::create_payment_token`], but lets the wallet
    /// overpay within the given bounds when it has no exact change.
    pub async fn create_payment_token_with_overpayment(
        &self,
        mint: &str,
        amount: u64,
        max_overpayment_percent: u64,
        max_overpayment_absolute: u64,
    ) -> Result<String> {
        self.wallet
            .send_with_overpayment(mint, amount, max_overpayment_percent, max_overpayment_absolute)
            .await
    }

    /// Adds a token to the operator's wallet without buying a session.
    pub async fn fund(&self, token: &str) -> Result<u64> {
        info!(token_len = token.len(), "funding wallet");
        if token.len() < MIN_FUNDING_TOKEN_LEN {
            return Err(TollgateError::InvalidToken(
                "token too short (expected cashu token format)".to_string(),
            ));
        }
        let decoded = self.wallet.decode(token).await?;
        let amount = self.wallet.redeem(&decoded).await?;
        info!(amount, mint = %decoded.mint, "funded wallet");
        Ok(amount)
    }
}

async fn create_advertisement(config: &Config, signer: &ReplySignerRef) -> Result<String> {
    let advertisement = Advertisement {
        metric: config.metric,
        step_size: config.step_size,
        prices: config
            .accepted_mints
            .iter()
            .map(|mint| PricePerStep {
                price_per_step: mint.price_per_step,
                price_unit: mint.price_unit.clone(),
                mint_url: mint.url.clone(),
                min_purchase_steps: mint.min_purchase_steps,
            })
            .collect(),
    };
    let signed = signer.sign(Reply::Advertisement(advertisement)).await?;
    Ok(serde_json::to_string(&signed)?)
}
