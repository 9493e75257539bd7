use crate::domain::device::MacAddress;
use crate::domain::session::{CustomerSession, Metric};
use crate::error::{Result, TollgateError};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory store of customer sessions, keyed by device.
///
/// Sessions live for the lifetime of the process and are never removed,
/// independently of whether the device's gate is currently open.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<MacAddress, CustomerSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_session(&self, mac: &MacAddress) -> Result<CustomerSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(mac)
            .cloned()
            .ok_or_else(|| TollgateError::SessionNotFound(mac.to_string()))
    }

    /// Adds `amount` to the device's session, creating it if needed.
    ///
    /// An existing session's start time is reset to now with the full
    /// cumulative allotment, regardless of how much had already elapsed.
    pub async fn add_allotment(
        &self,
        mac: &MacAddress,
        metric: Metric,
        amount: u64,
    ) -> Result<CustomerSession> {
        self.add_allotment_at(mac, metric, amount, chrono::Utc::now().timestamp())
            .await
    }

    pub(crate) async fn add_allotment_at(
        &self,
        mac: &MacAddress,
        metric: Metric,
        amount: u64,
        now: i64,
    ) -> Result<CustomerSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(mac.clone())
            .and_modify(|session| session.extend(amount, now))
            .or_insert_with(|| CustomerSession::new(mac.clone(), metric, amount, now));
        Ok(session.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
