use crate::domain::device::MacAddress;
use crate::domain::ports::NetworkAuthorizer;
use crate::error::{Result, TollgateError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Authorizes clients through the captive portal's `ndsctl` control tool.
pub struct NdsctlAuthorizer {
    program: PathBuf,
}

impl NdsctlAuthorizer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, action: &str, mac: &MacAddress) -> std::result::Result<String, String> {
        let output = Command::new(&self.program)
            .args([action, mac.as_str()])
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.program.display()))?;

        if !output.status.success() {
            return Err(format!(
                "{} {action} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl NetworkAuthorizer for NdsctlAuthorizer {
    async fn authorize(&self, mac: &MacAddress) -> Result<()> {
        let output = self
            .run("auth", mac)
            .await
            .map_err(|reason| TollgateError::Authorization {
                mac_address: mac.to_string(),
                reason,
            })?;
        debug!(mac_address = %mac, output = %output, "ndsctl auth");
        Ok(())
    }

    async fn deauthorize(&self, mac: &MacAddress) -> Result<()> {
        let output = self
            .run("deauth", mac)
            .await
            .map_err(|reason| TollgateError::Deauthorization {
                mac_address: mac.to_string(),
                reason,
            })?;
        debug!(mac_address = %mac, output = %output, "ndsctl deauth");
        Ok(())
    }
}
