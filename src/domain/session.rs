use super::device::MacAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fallback session length for metrics that do not measure time.
pub const NON_TIME_SESSION_SECS: i64 = 24 * 60 * 60;

/// Unit in which an allotment is denominated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Milliseconds,
    Bytes,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Milliseconds => "milliseconds",
            Metric::Bytes => "bytes",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated access purchased for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSession {
    pub mac_address: MacAddress,
    /// Unix timestamp (seconds) of the most recent payment.
    pub start_time: i64,
    pub metric: Metric,
    /// Total allotment for this session, in `metric` units.
    pub allotment: u64,
}

impl CustomerSession {
    pub fn new(mac_address: MacAddress, metric: Metric, allotment: u64, now: i64) -> Self {
        Self {
            mac_address,
            start_time: now,
            metric,
            allotment,
        }
    }

    /// Adds to the allotment and restarts the consumption clock at `now`.
    ///
    /// Whatever had elapsed since the previous start is not deducted.
    pub fn extend(&mut self, amount: u64, now: i64) {
        self.allotment = self.allotment.saturating_add(amount);
        self.start_time = now;
    }

    /// Unix timestamp (seconds) at which the gate should close.
    pub fn expires_at(&self, now: i64) -> i64 {
        match self.metric {
            Metric::Milliseconds => {
                let secs = i64::try_from(self.allotment / 1000).unwrap_or(i64::MAX);
                self.start_time.saturating_add(secs)
            }
            _ => now + NON_TIME_SESSION_SECS,
        }
    }

    /// Allotment left after subtracting time elapsed since `start_time`.
    ///
    /// Informational only; extensions never use it.
    pub fn remaining_ms(&self, now: i64) -> u64 {
        match self.metric {
            Metric::Milliseconds => {
                let elapsed_ms = u64::try_from(now.saturating_sub(self.start_time))
                    .unwrap_or_default()
                    .saturating_mul(1000);
                self.allotment.saturating_sub(elapsed_ms)
            }
            _ => self.allotment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    #[test]
    fn test_extend_resets_start_without_decay() {
        let mut session = CustomerSession::new(mac(), Metric::Milliseconds, 60_000, 1_000);
        session.extend(30_000, 1_050);
        assert_eq!(session.allotment, 90_000);
        assert_eq!(session.start_time, 1_050);
    }

    #[test]
    fn test_expires_at_milliseconds() {
        let session = CustomerSession::new(mac(), Metric::Milliseconds, 7_200_999, 1_000);
        // Sub-second remainder is truncated.
        assert_eq!(session.expires_at(5_000), 1_000 + 7_200);
    }

    #[test]
    fn test_expires_at_other_metric_defaults_to_a_day() {
        let session = CustomerSession::new(mac(), Metric::Bytes, 1_000_000, 1_000);
        assert_eq!(session.expires_at(2_000), 2_000 + NON_TIME_SESSION_SECS);
    }

    #[test]
    fn test_remaining_ms() {
        let session = CustomerSession::new(mac(), Metric::Milliseconds, 10_000, 100);
        assert_eq!(session.remaining_ms(103), 7_000);
        assert_eq!(session.remaining_ms(200), 0);
    }

    #[test]
    fn test_metric_serialization() {
        assert_eq!(
            serde_json::to_string(&Metric::Milliseconds).unwrap(),
            "\"milliseconds\""
        );
        let metric: Metric = serde_json::from_str("\"bytes\"").unwrap();
        assert_eq!(metric, Metric::Bytes);
    }
}
