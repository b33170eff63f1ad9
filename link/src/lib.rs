//! # Serial Link
//!
//! Reliable transport for a wireless serial bridge. Two devices, one facing a
//! host computer over USB and one facing a target over a UART, exchange serial
//! bytes and line configuration over an unreliable radio datagram channel.
//!
//! - **Protocol**: 2-byte header framing with typed control payloads
//! - **ARQ Engine**: stop-and-wait delivery with bitrate-adaptive timeouts
//! - **Dispatcher**: duplicate suppression, role-dependent ACK ordering and
//!   control frame handling
//! - **Peer Registry**: the single bonded counterpart, read from storage
//!
//! ## Architecture
//!
//! ```text
//!  USB / UART ──► forward_from ──► ArqEngine ──► Radio ~~~~~~~~ peer
//!                                     ▲
//!                                   ACKs
//!                                     │
//!  USB / UART ◄── Dispatcher ◄── inbound queue ◄── on_datagram ◄~~ peer
//! ```
//!
//! The crate is `no_std` without the `std` feature and is generic over the
//! `embassy-sync` raw mutex, so the same code runs on the device
//! (`CriticalSectionRawMutex`) and in the host harness (`NoopRawMutex`).

#![cfg_attr(not(feature = "std"), no_std)]

pub mod arq;
pub mod dispatcher;
pub mod link;
pub mod peer;
pub mod protocol;
pub mod stream;
pub mod timing;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use arq::{ArqEngine, Delivery, LinkError, SendError, SequenceCounters};
pub use dispatcher::ReceiveError;
pub use link::{Link, DEFAULT_QUEUE_DEPTH};
pub use peer::{PeerAddress, PeerRegistry, PeerStore, PeerStoreError};
pub use protocol::{
    AckInfo, ConfigSettings, Datagram, DeviceConn, Frame, FrameError, FrameType, HwLineState,
    Message, Payload, MAX_FRAME_LEN, MAX_PAYLOAD,
};
pub use stream::StreamReport;
pub use timing::{adaptive_timeout, LinkTiming, DEFAULT_BITRATE};
pub use traits::{AckTimer, LinkConfig, LinkEvents, LinkStats, Radio, RadioError, Role};

/// Library version, logged by both ends at start-up
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
