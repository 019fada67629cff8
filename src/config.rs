use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::{Network, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::swap::accept::AcceptanceConfig;
use crate::swap::monitor::MonitorConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub network: Network,
    pub provider_timeout_secs: u64,
    pub verify_provider_signature: bool,
    /// Hex redeem script of the active federation; enables the pegin deposit derivation check.
    pub federation_redeem_script: Option<ScriptBuf>,
    pub monitor: MonitorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            provider_timeout_secs: 30,
            verify_provider_signature: true,
            federation_redeem_script: None,
            monitor: MonitorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn acceptance(&self) -> AcceptanceConfig {
        AcceptanceConfig {
            network: self.network,
            verify_provider_signature: self.verify_provider_signature,
            federation_redeem_script: self.federation_redeem_script.clone(),
        }
    }
}
