//! Bonded peer registry.
//!
//! Each device talks to exactly one counterpart whose hardware address is
//! written to persistent storage at pairing time. The address is read once at
//! start-up and is immutable for the rest of the session.

use core::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Length of a radio hardware address
pub const ADDRESS_LEN: usize = 6;

/// Size of the persisted peer record
pub const PEER_RECORD_LEN: usize = ADDRESS_LEN;

/// 6-byte radio hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress(pub [u8; ADDRESS_LEN]);

impl PeerAddress {
    /// Used when no peer has been bonded yet
    pub const BROADCAST: Self = Self([0xFF; ADDRESS_LEN]);

    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl core::str::FromStr for PeerAddress {
    type Err = PeerStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; ADDRESS_LEN];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(PeerStoreError::InvalidAddress)?;
            if part.len() != 2 {
                return Err(PeerStoreError::InvalidAddress);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| PeerStoreError::InvalidAddress)?;
        }
        if parts.next().is_some() {
            return Err(PeerStoreError::InvalidAddress);
        }
        Ok(Self(bytes))
    }
}

/// Errors from the persisted peer record
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerStoreError {
    /// The backing storage failed
    #[error("peer storage unavailable")]
    Storage,
    /// The stored blob does not decode to an address
    #[error("corrupt peer record")]
    Corrupt,
    /// Text form is not `aa:bb:cc:dd:ee:ff`
    #[error("invalid hardware address")]
    InvalidAddress,
}

/// Blob storage holding the bonded peer (NVS namespace on the device)
pub trait PeerStore {
    /// Copy the stored blob into `buf`, returning its length, or `None` if
    /// nothing has been stored yet
    fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, PeerStoreError>;

    /// Replace the stored blob
    fn save(&mut self, blob: &[u8]) -> Result<(), PeerStoreError>;
}

/// The single bonded peer for this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerRegistry {
    peer: PeerAddress,
}

impl PeerRegistry {
    /// Registry for an already known address
    pub const fn with_peer(peer: PeerAddress) -> Self {
        Self { peer }
    }

    /// Read the bonded peer from `store`.
    ///
    /// A missing or unreadable record falls back to the broadcast address so
    /// the device stays reachable for pairing.
    pub fn load<S: PeerStore>(store: &mut S) -> Self {
        let mut blob = [0u8; PEER_RECORD_LEN];
        let peer = match store.load(&mut blob) {
            Ok(Some(len)) => match decode_record(&blob[..len.min(blob.len())]) {
                Ok(peer) => peer,
                Err(e) => {
                    warn!("peer record unreadable ({e}), using broadcast");
                    PeerAddress::BROADCAST
                }
            },
            Ok(None) => {
                warn!("no bonded peer stored, using broadcast");
                PeerAddress::BROADCAST
            }
            Err(e) => {
                warn!("peer store failed ({e}), using broadcast");
                PeerAddress::BROADCAST
            }
        };
        info!("peer mac address - {peer}");
        Self { peer }
    }

    /// Persist `peer` as the bonded counterpart for the next session
    pub fn bond<S: PeerStore>(store: &mut S, peer: PeerAddress) -> Result<(), PeerStoreError> {
        let mut blob = [0u8; PEER_RECORD_LEN];
        let encoded = postcard::to_slice(&peer, &mut blob).map_err(|_| PeerStoreError::Corrupt)?;
        store.save(encoded)?;
        info!("bonded peer {peer}");
        Ok(())
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    /// Whether a datagram from `sender` belongs to this link
    pub fn accepts(&self, sender: &PeerAddress) -> bool {
        *sender == self.peer
    }
}

fn decode_record(blob: &[u8]) -> Result<PeerAddress, PeerStoreError> {
    postcard::from_bytes(blob).map_err(|_| PeerStoreError::Corrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        blob: Option<heapless::Vec<u8, 16>>,
        fail: bool,
    }

    impl PeerStore for MemoryStore {
        fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, PeerStoreError> {
            if self.fail {
                return Err(PeerStoreError::Storage);
            }
            Ok(self.blob.as_ref().map(|blob| {
                let len = blob.len().min(buf.len());
                buf[..len].copy_from_slice(&blob[..len]);
                len
            }))
        }

        fn save(&mut self, blob: &[u8]) -> Result<(), PeerStoreError> {
            self.blob = Some(heapless::Vec::from_slice(blob).map_err(|_| PeerStoreError::Storage)?);
            Ok(())
        }
    }

    const PEER: PeerAddress = PeerAddress::new([0x24, 0x6f, 0x28, 0x01, 0x02, 0x03]);

    #[test]
    fn test_bond_then_load() {
        let mut store = MemoryStore::default();
        PeerRegistry::bond(&mut store, PEER).unwrap();
        assert_eq!(store.blob.as_ref().unwrap().as_slice(), PEER.as_bytes());

        let registry = PeerRegistry::load(&mut store);
        assert_eq!(registry.peer(), PEER);
        assert!(registry.accepts(&PEER));
        assert!(!registry.accepts(&PeerAddress::BROADCAST));
    }

    #[test]
    fn test_missing_record_falls_back_to_broadcast() {
        let mut store = MemoryStore::default();
        assert!(PeerRegistry::load(&mut store).peer().is_broadcast());
    }

    #[test]
    fn test_failing_store_falls_back_to_broadcast() {
        let mut store = MemoryStore {
            fail: true,
            ..Default::default()
        };
        assert!(PeerRegistry::load(&mut store).peer().is_broadcast());
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let mut store = MemoryStore {
            blob: Some(heapless::Vec::from_slice(&[1, 2, 3]).unwrap()),
            fail: false,
        };
        assert!(PeerRegistry::load(&mut store).peer().is_broadcast());
    }

    #[test]
    fn test_address_text_form() {
        let parsed: PeerAddress = "24:6f:28:01:02:03".parse().unwrap();
        assert_eq!(parsed, PEER);
        assert!("24:6f:28:01:02".parse::<PeerAddress>().is_err());
        assert!("24:6f:28:01:02:03:04".parse::<PeerAddress>().is_err());
        assert!("zz:6f:28:01:02:03".parse::<PeerAddress>().is_err());
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_address_display() {
        assert_eq!(PEER.to_string(), "24:6f:28:01:02:03");
    }
}
