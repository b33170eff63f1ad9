//! Radio emulation over UDP.
//!
//! Each UDP datagram carries the emulated hardware address of the sender
//! followed by one link frame:
//!
//! ```text
//! ┌────────────────────┬──────────────────────────┐
//! │ sender address (6) │ frame (2 + 0..240 bytes) │
//! └────────────────────┴──────────────────────────┘
//! ```

use std::net::SocketAddr;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use log::{debug, warn};
use serial_link::peer::ADDRESS_LEN;
use serial_link::{AckTimer, Link, PeerAddress, Radio, RadioError, MAX_FRAME_LEN};
use tokio::net::UdpSocket;

use crate::HostError;

const ENVELOPE_LEN: usize = ADDRESS_LEN + MAX_FRAME_LEN;

/// Prefix `frame` with the sender address
pub fn seal(sender: &PeerAddress, frame: &[u8]) -> Vec<u8> {
    let mut envelope = Vec::with_capacity(ADDRESS_LEN + frame.len());
    envelope.extend_from_slice(sender.as_bytes());
    envelope.extend_from_slice(frame);
    envelope
}

/// Split a received envelope into sender address and frame
pub fn open(envelope: &[u8]) -> Option<(PeerAddress, &[u8])> {
    if envelope.len() < ADDRESS_LEN {
        return None;
    }
    let (address, frame) = envelope.split_at(ADDRESS_LEN);
    let address: [u8; ADDRESS_LEN] = address.try_into().ok()?;
    Some((PeerAddress::new(address), frame))
}

/// Sends link frames to the other bridge side
pub struct UdpRadio<'a> {
    socket: &'a UdpSocket,
    address: PeerAddress,
    remote: SocketAddr,
}

impl<'a> UdpRadio<'a> {
    pub fn new(socket: &'a UdpSocket, address: PeerAddress, remote: SocketAddr) -> Self {
        Self {
            socket,
            address,
            remote,
        }
    }
}

impl Radio for UdpRadio<'_> {
    async fn transmit(&mut self, peer: &PeerAddress, datagram: &[u8]) -> Result<(), RadioError> {
        debug!("tx {} bytes to {}", datagram.len(), peer);
        self.socket
            .send_to(&seal(&self.address, datagram), self.remote)
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!("udp send to {}: {}", self.remote, e);
                RadioError::TransmitFailed
            })
    }
}

/// Ack waits on the tokio clock
pub struct TokioTimer;

impl AckTimer for TokioTimer {
    async fn wait_ms(&mut self, ms: u32) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms.into())).await;
    }
}

/// Feed every datagram arriving on `socket` into `link`.
///
/// Returns only when the socket fails.
pub async fn receive_loop<R, T>(
    socket: &UdpSocket,
    link: &Link<NoopRawMutex, R, T>,
) -> Result<(), HostError>
where
    R: Radio,
    T: AckTimer,
{
    let mut buf = [0u8; ENVELOPE_LEN + 1];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        if n > ENVELOPE_LEN {
            warn!("oversized datagram from {}", from);
            continue;
        }
        match open(&buf[..n]) {
            Some((sender, frame)) => {
                // Drops are counted and logged by the link
                let _ = link.on_datagram(&sender, frame);
            }
            None => warn!("runt datagram from {}", from),
        }
    }
}
