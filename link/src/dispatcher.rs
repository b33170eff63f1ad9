//! # Receive Path & Dispatcher
//!
//! ```text
//!   radio callback                      dispatcher task
//!  ┌──────────────┐                    ┌─────────────────────────────┐
//!  │ on_datagram  │── foreign? drop    │ process_next                │
//!  │              │── malformed? drop  │   DATA    → dedup, deliver, │
//!  │              │── ACK → arq ◄──┐   │             ack             │
//!  │              │── else ──► queue ─►│   CONTROL → handler, ack    │
//!  └──────────────┘                │   │   CONFIG_REQUEST → echo     │
//!                                  └───│   ACK     → arq             │
//!                                      └─────────────────────────────┘
//! ```
//!
//! ACKs are matched inside [`Link::on_datagram`] so that a sender waiting in
//! the ARQ engine is released even while the dispatcher is busy writing to
//! the serial sink.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io_async::Write;
use log::{debug, info, warn};

use crate::link::Link;
use crate::peer::PeerAddress;
use crate::protocol::{AckInfo, Frame, FrameError, FrameType, Message};
use crate::traits::{AckTimer, LinkEvents, Radio};

/// Why a datagram was not accepted by [`Link::on_datagram`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiveError {
    /// Sender is not the bonded peer
    #[error("datagram from a foreign address")]
    ForeignPeer,
    /// Datagram does not decode to a frame
    #[error(transparent)]
    Malformed(#[from] FrameError),
    /// Dispatcher queue is full; the sender will retransmit
    #[error("inbound queue full")]
    QueueFull,
}

impl<M: RawMutex, R: Radio, T: AckTimer, const Q: usize> Link<M, R, T, Q> {
    /// Entry point for every datagram the radio delivers.
    ///
    /// Never blocks.
    pub fn on_datagram(&self, sender: &PeerAddress, datagram: &[u8]) -> Result<(), ReceiveError> {
        if !self.registry.accepts(sender) {
            self.arq.record(|stats| stats.foreign_dropped += 1);
            debug!("drop datagram from {}", sender);
            return Err(ReceiveError::ForeignPeer);
        }

        let frame = Frame::decode(datagram).map_err(|e| {
            self.arq.record(|stats| stats.malformed_dropped += 1);
            warn!("drop datagram ({} bytes): {}", datagram.len(), e);
            ReceiveError::Malformed(e)
        })?;

        if frame.frame_type == FrameType::Ack {
            let ack = self.ack_payload(&frame)?;
            self.arq.on_ack_received(ack);
            return Ok(());
        }

        self.inbound.try_send(frame).map_err(|_| {
            self.arq.record(|stats| stats.queue_overflows += 1);
            warn!("inbound queue full, dropping frame");
            ReceiveError::QueueFull
        })
    }

    /// Wait for the next queued frame and act on it
    pub async fn process_next<W, E>(&self, sink: &mut W, events: &mut E)
    where
        W: Write,
        E: LinkEvents,
    {
        let frame = self.inbound.receive().await;
        self.dispatch(frame, sink, events).await;
    }

    /// Dispatcher task body
    pub async fn run<W, E>(&self, sink: &mut W, events: &mut E) -> !
    where
        W: Write,
        E: LinkEvents,
    {
        loop {
            self.process_next(sink, events).await;
        }
    }

    async fn dispatch<W, E>(&self, frame: Frame, sink: &mut W, events: &mut E)
    where
        W: Write,
        E: LinkEvents,
    {
        let message = match frame.message() {
            Ok(message) => message,
            Err(e) => {
                self.arq.record(|stats| stats.malformed_dropped += 1);
                warn!("drop {:?} #{}: {}", frame.frame_type, frame.sequence, e);
                return;
            }
        };
        let ack = frame.ack_info();

        match message {
            Message::Data(payload) => {
                let fresh = self.arq.accept_data(frame.sequence);
                if self.role.acks_before_delivery() {
                    self.acknowledge(ack).await;
                }
                if fresh {
                    match sink.write_all(&payload).await {
                        Ok(()) => self.arq.record(|stats| {
                            stats.data_frames_delivered += 1;
                            stats.bytes_delivered += payload.len() as u64;
                        }),
                        Err(e) => warn!("serial write of {} bytes failed: {:?}", payload.len(), e),
                    }
                } else {
                    debug!("duplicate data #{}", frame.sequence);
                }
                if !self.role.acks_before_delivery() {
                    self.acknowledge(ack).await;
                }
            }
            Message::ConfigSettings(settings) => {
                // Mirrored configuration is fire-and-forget: never acked
                if !self.arq.set_bitrate(settings.bitrate) {
                    warn!("peer sent zero bitrate, keeping {} bps", self.arq.bitrate());
                }
                events.apply_config(settings);
            }
            Message::HwLine(line) => {
                events.set_line_state(line);
                self.acknowledge(ack).await;
            }
            Message::DeviceConn(pattern) => {
                self.acknowledge(ack).await;
                events.indicate_connection(pattern);
            }
            Message::ConfigRequest => {
                self.acknowledge(ack).await;
                if let Some(settings) = events.config_requested() {
                    info!("echo config: {} bps", settings.bitrate);
                    if let Err(e) = self.send(Message::ConfigSettings(settings)).await {
                        warn!("config echo failed: {}", e);
                    }
                }
            }
            Message::Ack(info) => {
                self.arq.on_ack_received(info);
            }
        }
    }

    async fn acknowledge(&self, ack: AckInfo) {
        // Failures are logged by the engine; the peer retransmits
        let _ = self.arq.send_ack(ack).await;
    }

    fn ack_payload(&self, frame: &Frame) -> Result<AckInfo, ReceiveError> {
        match frame.message() {
            Ok(Message::Ack(ack)) => Ok(ack),
            Ok(_) => Err(ReceiveError::Malformed(FrameError::UnknownType(frame.frame_type as u8))),
            Err(e) => {
                self.arq.record(|stats| stats.malformed_dropped += 1);
                warn!("drop ack: {}", e);
                Err(ReceiveError::Malformed(e))
            }
        }
    }
}
