//! Bitrate-adaptive acknowledgment timeout.
//!
//! The peer forwards every frame onto a serial line before it can finish
//! processing, so the wait for an ACK scales with the emulated bitrate:
//!
//! ```text
//! timeout_ms = ceil(240 * 8 * 1000 / bitrate) + ceil(1000 / bitrate) + margin
//! ```
//!
//! The first term is the wire time of a full frame, the second one extra bit
//! time, the margin covers radio and task latency.

use crate::protocol::MAX_PAYLOAD;

/// Serial bitrate assumed until a configuration is seen
pub const DEFAULT_BITRATE: u32 = 9600;

/// Fixed processing allowance added to every timeout
pub const PROCESSING_MARGIN_MS: u32 = 20;

/// Ack timeout for a frame of `payload_len` bytes at `bitrate`.
///
/// The wait is always sized for a full frame so that it only needs
/// recomputing when the bitrate changes. `payload_len` does not shorten it,
/// and lengths past the frame limit get the same full-frame wait.
pub fn adaptive_timeout(_payload_len: usize, bitrate: u32) -> u32 {
    timeout_with_margin(bitrate, PROCESSING_MARGIN_MS)
}

/// Ack timeout at `bitrate` with an explicit processing margin
pub fn timeout_with_margin(bitrate: u32, margin_ms: u32) -> u32 {
    let bitrate = u64::from(bitrate.max(1));
    let frame_bits = (MAX_PAYLOAD as u64) * 8 * 1000;
    let wire = frame_bits.div_ceil(bitrate) + 1000u64.div_ceil(bitrate);
    u32::try_from(wire)
        .unwrap_or(u32::MAX)
        .saturating_add(margin_ms)
}

/// Current emulated bitrate and the timeout derived from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkTiming {
    bitrate: u32,
    margin_ms: u32,
    timeout_ms: u32,
}

impl LinkTiming {
    pub fn new(bitrate: u32, margin_ms: u32) -> Self {
        let bitrate = if bitrate == 0 { DEFAULT_BITRATE } else { bitrate };
        Self {
            bitrate,
            margin_ms,
            timeout_ms: timeout_with_margin(bitrate, margin_ms),
        }
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Switch to `bitrate`. Returns `false` and keeps the current value
    /// when `bitrate` is zero.
    pub fn set_bitrate(&mut self, bitrate: u32) -> bool {
        if bitrate == 0 {
            return false;
        }
        self.bitrate = bitrate;
        self.timeout_ms = timeout_with_margin(bitrate, self.margin_ms);
        true
    }
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self::new(DEFAULT_BITRATE, PROCESSING_MARGIN_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout() {
        // 200 ms wire time + 1 ms bit time + 20 ms margin
        assert_eq!(adaptive_timeout(5, 9600), 221);
        assert_eq!(LinkTiming::default().timeout_ms(), 221);
    }

    #[test]
    fn test_fast_link_is_dominated_by_margin() {
        // ceil(1_920_000 / 921_600) = 3, ceil(1000 / 921_600) = 1
        assert_eq!(adaptive_timeout(240, 921_600), 24);
    }

    #[test]
    fn test_oversized_length_gets_full_frame_wait() {
        assert_eq!(adaptive_timeout(MAX_PAYLOAD + 1, 9600), 221);
        assert_eq!(adaptive_timeout(usize::MAX, 9600), adaptive_timeout(0, 9600));
    }

    #[test]
    fn test_slow_link_waits_longer() {
        assert_eq!(adaptive_timeout(0, 300), 6400 + 4 + 20);
    }

    #[test]
    fn test_timeout_non_increasing_in_bitrate() {
        let rates = [
            1u32, 50, 110, 300, 1200, 2400, 4800, 9600, 19_200, 38_400, 57_600, 115_200,
            230_400, 460_800, 921_600, 3_000_000, u32::MAX,
        ];
        for len in [0, 1, 120, MAX_PAYLOAD] {
            let mut previous = u32::MAX;
            for rate in rates {
                let timeout = adaptive_timeout(len, rate);
                assert!(timeout <= previous, "{rate} bps gave {timeout} > {previous}");
                previous = timeout;
            }
        }
    }

    #[test]
    fn test_zero_bitrate_rejected() {
        let mut timing = LinkTiming::new(115_200, PROCESSING_MARGIN_MS);
        assert!(!timing.set_bitrate(0));
        assert_eq!(timing.bitrate(), 115_200);
        assert_eq!(LinkTiming::new(0, 20).bitrate(), DEFAULT_BITRATE);
    }

    #[test]
    fn test_set_bitrate_recomputes_timeout() {
        let mut timing = LinkTiming::default();
        assert!(timing.set_bitrate(115_200));
        assert_eq!(timing.timeout_ms(), 17 + 1 + 20);
    }
}
