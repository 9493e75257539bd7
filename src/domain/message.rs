use super::device::MacAddress;
use super::session::{CustomerSession, Metric};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inbound purchase request.
///
/// Fields are optional because the transport carries them as loose tags; the
/// pipeline rejects messages that lack either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMessage {
    /// Payer public key; replies are addressed to it.
    pub payer: String,
    pub payment: Option<String>,
    pub device_identifier: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Stable, customer-facing failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeCode {
    InvalidPaymentToken,
    InvalidDeviceIdentifier,
    InvalidMacAddress,
    PaymentErrorInvalidToken,
    PaymentErrorTokenSpent,
    PaymentProcessingFailed,
    AllotmentCalculationFailed,
    SessionManagementFailed,
    GateOpeningFailed,
}

impl NoticeCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeCode::InvalidPaymentToken => "invalid-payment-token",
            NoticeCode::InvalidDeviceIdentifier => "invalid-device-identifier",
            NoticeCode::InvalidMacAddress => "invalid-mac-address",
            NoticeCode::PaymentErrorInvalidToken => "payment-error-invalid-token",
            NoticeCode::PaymentErrorTokenSpent => "payment-error-token-spent",
            NoticeCode::PaymentProcessingFailed => "payment-processing-failed",
            NoticeCode::AllotmentCalculationFailed => "allotment-calculation-failed",
            NoticeCode::SessionManagementFailed => "session-management-failed",
            NoticeCode::GateOpeningFailed => "gate-opening-failed",
        }
    }
}

impl fmt::Display for NoticeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReply {
    pub payer: String,
    pub device_identifier: MacAddress,
    pub allotment: u64,
    pub metric: Metric,
    pub start_time: i64,
}

impl SessionReply {
    pub fn from_session(session: &CustomerSession, payer: &str) -> Self {
        Self {
            payer: payer.to_string(),
            device_identifier: session.mac_address.clone(),
            allotment: session.allotment,
            metric: session.metric,
            start_time: session.start_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeReply {
    pub level: NoticeLevel,
    pub code: NoticeCode,
    pub message: String,
    pub payer: Option<String>,
}

/// Pricing terms published for prospective customers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub metric: Metric,
    pub step_size: u64,
    pub prices: Vec<PricePerStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePerStep {
    pub price_per_step: u64,
    pub price_unit: String,
    pub mint_url: String,
    pub min_purchase_steps: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum Reply {
    Session(SessionReply),
    Notice(NoticeReply),
    Advertisement(Advertisement),
}

/// A reply after it has been signed with the service key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedReply {
    pub author: String,
    pub created_at: i64,
    pub reply: Reply,
    pub signature: String,
}

impl SignedReply {
    pub fn as_session(&self) -> Option<&SessionReply> {
        match &self.reply {
            Reply::Session(session) => Some(session),
            _ => None,
        }
    }

    pub fn as_notice(&self) -> Option<&NoticeReply> {
        match &self.reply {
            Reply::Notice(notice) => Some(notice),
            _ => None,
        }
    }
}
