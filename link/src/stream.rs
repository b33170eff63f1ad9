//! Serial stream chunking.
//!
//! Bytes read from the local serial endpoint are cut into frames of at most
//! [`MAX_PAYLOAD`] bytes and sent one after another, each waiting for its ACK
//! before the next goes out. A chunk that exhausts its attempts is lost; the
//! rest of the buffer is still sent.

use core::ops::AddAssign;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io_async::Read;
use log::warn;

use crate::arq::SendError;
use crate::link::Link;
use crate::protocol::{Message, MAX_PAYLOAD};
use crate::traits::{AckTimer, Radio};

/// Outcome of forwarding a run of serial bytes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamReport {
    /// DATA frames issued
    pub chunks: u32,
    /// Frames acknowledged by the peer
    pub delivered: u32,
    /// Frames dropped after exhausting their attempts
    pub dropped: u32,
    /// Bytes carried by delivered frames
    pub bytes_delivered: usize,
}

impl AddAssign for StreamReport {
    fn add_assign(&mut self, other: Self) {
        self.chunks += other.chunks;
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.bytes_delivered += other.bytes_delivered;
    }
}

impl<M: RawMutex, R: Radio, T: AckTimer, const Q: usize> Link<M, R, T, Q> {
    /// Send `bytes` as consecutive DATA frames. An empty buffer sends nothing.
    pub async fn send_stream(&self, bytes: &[u8]) -> StreamReport {
        let mut report = StreamReport::default();
        for chunk in bytes.chunks(MAX_PAYLOAD) {
            report.chunks += 1;
            let sent = match Message::data(chunk) {
                Ok(message) => self.send(message).await,
                Err(e) => Err(SendError::from(e)),
            };
            match sent {
                Ok(_) => {
                    report.delivered += 1;
                    report.bytes_delivered += chunk.len();
                }
                Err(e) => {
                    report.dropped += 1;
                    warn!("lost {} serial bytes: {}", chunk.len(), e);
                }
            }
        }
        report
    }

    /// Pump `reader` into the link until it reports end of stream.
    ///
    /// `buf` bounds how much is read per call; any size works.
    pub async fn forward_from<Rd: Read>(
        &self,
        reader: &mut Rd,
        buf: &mut [u8],
    ) -> Result<StreamReport, Rd::Error> {
        let mut total = StreamReport::default();
        loop {
            let n = reader.read(buf).await?;
            if n == 0 {
                return Ok(total);
            }
            total += self.send_stream(&buf[..n]).await;
        }
    }
}
