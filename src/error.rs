use thiserror::Error;

#[derive(Error, Debug)]
pub enum TollgateError {
    #[error("timestamp {until} is in the past (current time: {now})")]
    PastDeadline { until: i64, now: i64 },
    #[error("deadline {0} is out of range")]
    DeadlineOutOfRange(i64),
    #[error("error authorizing MAC {mac_address}: {reason}")]
    Authorization { mac_address: String, reason: String },
    #[error("error deauthorizing MAC {mac_address}: {reason}")]
    Deauthorization { mac_address: String, reason: String },
    #[error("payment only covers {steps} steps, but minimum purchase is {min_steps} steps")]
    InsufficientPayment { steps: u64, min_steps: u64 },
    #[error("unsupported metric: {0}")]
    UnsupportedMetric(String),
    #[error("mint configuration not found for URL: {0}")]
    UnknownMint(String),
    #[error("session not found for MAC address: {0}")]
    SessionNotFound(String),
    #[error("invalid MAC address: {0}")]
    InvalidMacAddress(String),
    #[error("invalid payment token: {0}")]
    InvalidToken(String),
    #[error("Token already spent")]
    TokenSpent,
    #[error("redemption failed: {0}")]
    Redemption(String),
    #[error(
        "insufficient balance: need {needed} sats, have {available} sats for mint {mint} (total balance: {total})"
    )]
    InsufficientBalance {
        mint: String,
        needed: u64,
        available: u64,
        total: u64,
    },
    #[error("wallet error: {0}")]
    Wallet(String),
    #[error("payout failed: {0}")]
    Payout(String),
    #[error("failed to sign reply: {0}")]
    Signing(String),
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("`{program}` exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<figment::Error> for TollgateError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TollgateError>;
