//! # Collaborator Traits & Link Configuration
//!
//! The link core never touches hardware. Everything outside the reliable
//! transport is injected through the traits in this module:
//!
//! - [`Radio`]: the unreliable datagram primitive (ESP-NOW style send)
//! - [`AckTimer`]: the time source used while waiting for an ACK
//! - [`LinkEvents`]: the configuration handler reacting to control frames
//!
//! The local serial endpoint is plain [`embedded_io_async::Read`] /
//! [`embedded_io_async::Write`], so USB CDC and UART drivers plug in directly.
//!
//! ```text
//! ┌────────────┐  send_stream   ┌──────────────┐  transmit  ┌─────────┐
//! │ Serial RX  │───────────────►│              │───────────►│         │
//! └────────────┘                │              │            │  Radio  │
//! ┌────────────┐  write_all     │     Link     │ on_datagram│         │
//! │ Serial TX  │◄───────────────│              │◄───────────│         │
//! └────────────┘                │              │            └─────────┘
//! ┌────────────┐  apply_config  │              │
//! │ LinkEvents │◄───────────────│              │
//! └────────────┘                └──────────────┘
//! ```

use core::future::Future;

use serde::{Deserialize, Serialize};

use crate::peer::PeerAddress;
use crate::protocol::{ConfigSettings, DeviceConn, HwLineState};
use crate::timing::{DEFAULT_BITRATE, PROCESSING_MARGIN_MS};

/// The radio refused or failed to queue a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// Transmission failed at the link layer
    #[error("radio transmit failed")]
    TransmitFailed,
    /// The radio is not initialised or the peer is not registered
    #[error("radio not ready")]
    NotReady,
}

/// Unreliable, connectionless datagram primitive
///
/// Delivery is best effort; a successful return only means the datagram
/// left this device. Encryption, if any, happens below this trait.
pub trait Radio {
    /// Send `datagram` to `peer`
    fn transmit(
        &mut self,
        peer: &PeerAddress,
        datagram: &[u8],
    ) -> impl Future<Output = Result<(), RadioError>>;
}

/// Time source for acknowledgment waits
///
/// Firmware implements this over `embassy_time::Timer`; the host harness and
/// tests use `tokio::time::sleep`.
pub trait AckTimer {
    /// Complete after `ms` milliseconds
    fn wait_ms(&mut self, ms: u32) -> impl Future<Output = ()>;
}

/// Configuration handler for control frames received from the peer
///
/// Handlers run on the dispatcher task and must return quickly.
pub trait LinkEvents {
    /// Peer changed bitrate, framing or hardware flow control
    fn apply_config(&mut self, settings: ConfigSettings) {
        let _ = settings;
    }

    /// Peer's host toggled DTR / RTS
    fn set_line_state(&mut self, line: HwLineState) {
        let _ = line;
    }

    /// Peer asks for the connection indicator to blink
    fn indicate_connection(&mut self, pattern: DeviceConn) {
        let _ = pattern;
    }

    /// Peer asks for our serial configuration.
    ///
    /// A returned value is sent back as a CONFIG_SETTINGS frame.
    fn config_requested(&mut self) -> Option<ConfigSettings> {
        None
    }
}

/// Which end of the bridge this device is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// USB virtual serial port facing the host computer
    UsbHost,
    /// Hardware UART facing the target device
    UartBridge,
}

impl Role {
    /// The USB side acknowledges data before writing it out so the sender's
    /// ack wait overlaps the USB transfer.
    pub fn acks_before_delivery(self) -> bool {
        matches!(self, Role::UsbHost)
    }

    /// The UART side asks the USB side for its configuration on start-up
    pub fn requests_config_on_start(self) -> bool {
        matches!(self, Role::UartBridge)
    }
}

/// Configuration for the link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct LinkConfig {
    /// Role of this device
    pub role: Role,
    /// Transmissions per frame before it is dropped
    pub max_attempts: u8,
    /// Processing margin added to the ack timeout in milliseconds
    pub processing_margin_ms: u32,
    /// Bitrate used for the ack timeout until a configuration arrives
    pub initial_bitrate: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            role: Role::UsbHost,
            max_attempts: 3,
            processing_margin_ms: PROCESSING_MARGIN_MS,
            initial_bitrate: DEFAULT_BITRATE,
        }
    }
}

impl LinkConfig {
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }
}

/// Counters describing link health
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    /// Datagrams handed to the radio, retransmissions and ACKs included
    pub frames_sent: u32,
    /// Radio transmit calls that failed
    pub transmit_failures: u32,
    /// Attempts after the first for the same frame
    pub retransmissions: u32,
    /// Frames whose ACK arrived
    pub frames_acked: u32,
    /// Frames dropped after the last attempt
    pub frames_exhausted: u32,
    /// ACK frames emitted
    pub acks_sent: u32,
    /// ACKs that matched no pending send
    pub stray_acks: u32,
    /// DATA frames written to the local sink
    pub data_frames_delivered: u32,
    /// Payload bytes written to the local sink
    pub bytes_delivered: u64,
    /// DATA frames discarded as repeats
    pub duplicates_suppressed: u32,
    /// Datagrams or payloads that failed to decode
    pub malformed_dropped: u32,
    /// Datagrams from an address other than the bonded peer
    pub foreign_dropped: u32,
    /// Frames lost because the inbound queue was full
    pub queue_overflows: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_config_default() {
        let config = LinkConfig::default();
        assert_eq!(config.role, Role::UsbHost);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.processing_margin_ms, 20);
        assert_eq!(config.initial_bitrate, 9600);
    }

    #[test]
    fn test_role_behaviour() {
        assert!(Role::UsbHost.acks_before_delivery());
        assert!(!Role::UartBridge.acks_before_delivery());
        assert!(Role::UartBridge.requests_config_on_start());
        assert!(!Role::UsbHost.requests_config_on_start());
    }

    #[test]
    fn test_config_from_postcard() {
        let config = LinkConfig {
            role: Role::UartBridge,
            max_attempts: 5,
            processing_margin_ms: 40,
            initial_bitrate: 115_200,
        };
        let mut buffer = [0u8; 32];
        let bytes = postcard::to_slice(&config, &mut buffer).unwrap();
        let decoded: LinkConfig = postcard::from_bytes(bytes).unwrap();
        assert_eq!(decoded.role, Role::UartBridge);
        assert_eq!(decoded.max_attempts, 5);
        assert_eq!(decoded.initial_bitrate, 115_200);
    }
}
