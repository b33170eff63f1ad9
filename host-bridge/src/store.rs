//! Peer record kept in a plain file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::warn;
use serial_link::{PeerStore, PeerStoreError};

pub struct FilePeerStore {
    path: PathBuf,
}

impl FilePeerStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PeerStore for FilePeerStore {
    fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, PeerStoreError> {
        let blob = match std::fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!("read {}: {}", self.path.display(), e);
                return Err(PeerStoreError::Storage);
            }
        };
        if blob.len() > buf.len() {
            return Err(PeerStoreError::Corrupt);
        }
        buf[..blob.len()].copy_from_slice(&blob);
        Ok(Some(blob.len()))
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), PeerStoreError> {
        std::fs::write(&self.path, blob).map_err(|e| {
            warn!("write {}: {}", self.path.display(), e);
            PeerStoreError::Storage
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_link::{PeerAddress, PeerRegistry};

    fn scratch(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("host-bridge-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_bond_persists_across_sessions() {
        let path = scratch("bond");
        let peer = PeerAddress::new([0x24, 0x6f, 0x28, 0x9a, 0xbc, 0xde]);

        PeerRegistry::bond(&mut FilePeerStore::new(&path), peer).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), peer.as_bytes());

        let registry = PeerRegistry::load(&mut FilePeerStore::new(&path));
        assert_eq!(registry.peer(), peer);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let path = scratch("missing");
        let mut buf = [0u8; 6];
        assert_eq!(FilePeerStore::new(&path).load(&mut buf), Ok(None));
        assert!(PeerRegistry::load(&mut FilePeerStore::new(&path)).peer().is_broadcast());
    }

    #[test]
    fn test_oversized_file_is_corrupt() {
        let path = scratch("oversized");
        std::fs::write(&path, [0u8; 32]).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(
            FilePeerStore::new(&path).load(&mut buf),
            Err(PeerStoreError::Corrupt)
        );
        let _ = std::fs::remove_file(&path);
    }
}
