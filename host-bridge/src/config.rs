//! JSON configuration for one bridge side.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serial_link::{ConfigSettings, LinkConfig, PeerAddress};

use crate::HostError;

fn default_linger_ms() -> u64 {
    1000
}

/// Local serial settings, mirrored to the peer by the USB side
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub bitrate: u32,
    pub data_bits: u8,
    pub parity: u8,
    pub stop_bits: u8,
    pub hw_flow: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        let defaults = ConfigSettings::default();
        Self {
            bitrate: defaults.bitrate,
            data_bits: defaults.data_bits,
            parity: defaults.parity,
            stop_bits: defaults.stop_bits,
            hw_flow: defaults.hw_flow_enabled(),
        }
    }
}

impl From<SerialSettings> for ConfigSettings {
    fn from(serial: SerialSettings) -> Self {
        ConfigSettings {
            bitrate: serial.bitrate,
            data_bits: serial.data_bits,
            parity: serial.parity,
            stop_bits: serial.stop_bits,
            hw_flow_status: serial.hw_flow.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// UDP address this side listens on
    pub bind: SocketAddr,
    /// UDP address of the other side
    pub remote: SocketAddr,
    /// Emulated hardware address of this side, `aa:bb:cc:dd:ee:ff`
    pub address: String,
    /// File holding the bonded peer
    pub peer_store: PathBuf,
    /// Bond this peer before starting, replacing the stored one
    #[serde(default)]
    pub bond: Option<String>,
    /// How long to keep receiving after stdin closes
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub link: LinkConfig,
}

impl HostConfig {
    pub fn from_json(json: &str) -> Result<Self, HostError> {
        let config: Self = serde_json::from_str(json)?;
        // Addresses are parsed again where used; fail here first
        config.local_address()?;
        config.bond_address()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn local_address(&self) -> Result<PeerAddress, HostError> {
        Ok(self.address.parse()?)
    }

    pub fn bond_address(&self) -> Result<Option<PeerAddress>, HostError> {
        Ok(self.bond.as_deref().map(str::parse::<PeerAddress>).transpose()?)
    }
}
