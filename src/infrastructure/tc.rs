use crate::domain::device::MacAddress;
use crate::domain::ports::BandwidthLimiter;
use crate::error::{Result, TollgateError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

const ROOT_CLASS: &str = "1:1";
const ROOT_RATE: &str = "1000mbit";

/// HTB-based per-device shaping on a bridge interface via `tc`.
///
/// Each device gets a child class `1:<class_id>` of the unlimited root class
/// and a u32 filter matching its destination MAC.
pub struct TcLimiter {
    program: PathBuf,
    interface: String,
}

impl TcLimiter {
    pub fn new(program: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            interface: interface.into(),
        }
    }

    async fn tc(&self, args: &[String]) -> Result<String> {
        debug!(args = ?args, "tc");
        let output = Command::new(&self.program).args(args).output().await?;
        if !output.status.success() {
            return Err(TollgateError::Command {
                program: self.program.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn dev(&self) -> [String; 2] {
        ["dev".to_string(), self.interface.clone()]
    }

    fn class_args(&self, verb: &str, class_id: u16, kbps: Option<u32>) -> Vec<String> {
        let mut args = vec!["class".to_string(), verb.to_string()];
        args.extend(self.dev());
        if let Some(kbps) = kbps {
            let rate = format!("{kbps}kbit");
            args.extend(["parent".to_string(), ROOT_CLASS.to_string()]);
            args.extend(["classid".to_string(), format!("1:{class_id}")]);
            args.extend(["htb".to_string(), "rate".to_string(), rate.clone()]);
            args.extend(["ceil".to_string(), rate]);
        } else {
            args.extend(["classid".to_string(), format!("1:{class_id}")]);
        }
        args
    }

    fn filter_args(&self, verb: &str, mac: &MacAddress, class_id: u16) -> Vec<String> {
        let [a, b, c, d, e, f] = mac.octets();
        let mut args = vec!["filter".to_string(), verb.to_string()];
        args.extend(self.dev());
        args.extend(
            [
                "protocol", "ip", "parent", "1:0", "prio", "1", "u32", "match", "u16", "0x0800",
                "0xffff", "at", "-2", "match", "u32",
            ]
            .map(str::to_string),
        );
        args.push(format!("0x{a:02x}{b:02x}{c:02x}{d:02x}"));
        args.extend(["0xffffffff", "at", "-14", "match", "u16"].map(str::to_string));
        args.push(format!("0x{e:02x}{f:02x}"));
        args.extend(["0xffff", "at", "-10", "flowid"].map(str::to_string));
        args.push(format!("1:{class_id}"));
        args
    }
}

#[async_trait]
impl BandwidthLimiter for TcLimiter {
    async fn has_rate_root(&self) -> Result<bool> {
        let mut args = vec!["qdisc".to_string(), "show".to_string()];
        args.extend(self.dev());
        let output = self.tc(&args).await?;
        Ok(output.contains("htb"))
    }

    async fn install_rate_root(&self) -> Result<()> {
        let mut del = vec!["qdisc".to_string(), "del".to_string()];
        del.extend(self.dev());
        del.push("root".to_string());
        // No root qdisc to delete is fine.
        let _ = self.tc(&del).await;

        let mut add = vec!["qdisc".to_string(), "add".to_string()];
        add.extend(self.dev());
        add.extend(["root", "handle", "1:", "htb", "default", "1"].map(str::to_string));
        self.tc(&add).await?;

        let mut root = vec!["class".to_string(), "add".to_string()];
        root.extend(self.dev());
        root.extend(
            [
                "parent", "1:", "classid", ROOT_CLASS, "htb", "rate", ROOT_RATE, "ceil", ROOT_RATE,
            ]
            .map(str::to_string),
        );
        self.tc(&root).await?;
        Ok(())
    }

    async fn install_limit(&self, mac: &MacAddress, class_id: u16, kbps: u32) -> Result<()> {
        let class_result = self
            .tc(&self.class_args("replace", class_id, Some(kbps)))
            .await;

        // Drop any earlier rule for this device so extensions don't stack filters.
        let _ = self.tc(&self.filter_args("del", mac, class_id)).await;
        let filter_result = self.tc(&self.filter_args("add", mac, class_id)).await;

        class_result?;
        filter_result?;
        Ok(())
    }

    async fn remove_limit(&self, mac: &MacAddress, class_id: u16) -> Result<()> {
        if let Err(e) = self.tc(&self.filter_args("del", mac, class_id)).await {
            debug!(mac_address = %mac, error = %e, "no tc filter to remove");
        }
        if let Err(e) = self.tc(&self.class_args("del", class_id, None)).await {
            debug!(mac_address = %mac, error = %e, "no tc class to remove");
        }
        Ok(())
    }
}
