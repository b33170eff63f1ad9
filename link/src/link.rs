//! # Link
//!
//! One reliable serial bridge to the bonded peer. A `Link` is shared by
//! reference between three activities:
//!
//! - the radio receive callback, which calls [`Link::on_datagram`]
//! - the dispatcher task, which runs [`Link::run`]
//! - any number of senders: the serial reader, configuration hooks and the
//!   pairing button
//!
//! Senders are serialized by the ARQ send slot, so at most one non-ACK frame
//! is unacknowledged at any time.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use log::info;

use crate::arq::{ArqEngine, Delivery, LinkError, SendError, SequenceCounters};
use crate::peer::{PeerAddress, PeerRegistry};
use crate::protocol::{ConfigSettings, DeviceConn, Frame, HwLineState, Message};
use crate::traits::{AckTimer, LinkConfig, LinkStats, Radio, Role};

/// Frames buffered between the radio callback and the dispatcher
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

pub struct Link<M: RawMutex, R: Radio, T: AckTimer, const Q: usize = DEFAULT_QUEUE_DEPTH> {
    pub(crate) registry: PeerRegistry,
    pub(crate) role: Role,
    pub(crate) arq: ArqEngine<M, R, T>,
    pub(crate) inbound: Channel<M, Frame, Q>,
}

impl<M: RawMutex, R: Radio, T: AckTimer, const Q: usize> Link<M, R, T, Q> {
    pub fn new(registry: PeerRegistry, radio: R, timer: T, config: &LinkConfig) -> Self {
        info!(
            "link up as {:?}, peer {}, {} attempts per frame",
            config.role,
            registry.peer(),
            config.max_attempts
        );
        Self {
            registry,
            role: config.role,
            arq: ArqEngine::new(registry.peer(), radio, timer, config),
            inbound: Channel::new(),
        }
    }

    pub fn peer(&self) -> PeerAddress {
        self.registry.peer()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Send one message through the ARQ engine
    pub async fn send(&self, message: Message) -> Result<Delivery, SendError> {
        self.arq.send(message).await
    }

    /// The local serial configuration changed: adopt its bitrate for the ack
    /// timeout and mirror it to the peer
    pub async fn on_local_config_changed(
        &self,
        settings: ConfigSettings,
    ) -> Result<Delivery, SendError> {
        self.arq.set_bitrate(settings.bitrate);
        self.send(Message::ConfigSettings(settings)).await
    }

    /// The local host toggled DTR / RTS
    pub async fn on_local_line_state_changed(
        &self,
        line: HwLineState,
    ) -> Result<Delivery, SendError> {
        self.send(Message::HwLine(line)).await
    }

    /// Ask the peer to show a connection indication
    pub async fn send_connection_event(&self, pattern: DeviceConn) -> Result<Delivery, SendError> {
        self.send(Message::DeviceConn(pattern)).await
    }

    /// Ask the peer to echo its serial configuration
    pub async fn request_config(&self) -> Result<Delivery, SendError> {
        self.send(Message::ConfigRequest).await
    }

    /// Start both sequence counters over, e.g. after the peer rebooted
    pub fn reset_sequence_state(&self) -> Result<(), LinkError> {
        self.arq.reset_sequence_state()
    }

    pub fn sequence_counters(&self) -> SequenceCounters {
        self.arq.counters()
    }

    pub fn bitrate(&self) -> u32 {
        self.arq.bitrate()
    }

    pub fn ack_timeout_ms(&self) -> u32 {
        self.arq.ack_timeout_ms()
    }

    pub fn stats(&self) -> LinkStats {
        self.arq.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameType, MAX_PAYLOAD};
    use crate::testing::{MockRadio, SentLog, TokioTimer, PEER};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn link(sent: &SentLog, role: Role) -> Link<NoopRawMutex, MockRadio<'_>, TokioTimer> {
        Link::new(
            PeerRegistry::with_peer(PEER),
            MockRadio::new(sent),
            TokioTimer,
            &LinkConfig::for_role(role),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_config_updates_timeout_and_is_not_acked() {
        let sent = SentLog::new();
        let link = link(&sent, Role::UsbHost);
        let settings = ConfigSettings {
            bitrate: 115_200,
            ..Default::default()
        };

        assert_eq!(link.on_local_config_changed(settings).await, Ok(Delivery::Sent));
        assert_eq!(link.bitrate(), 115_200);
        assert_eq!(link.ack_timeout_ms(), 38);

        let frame = Frame::decode(&sent.receive().await).unwrap();
        assert_eq!(frame.message(), Ok(Message::ConfigSettings(settings)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_bitrate_config_keeps_timeout() {
        let sent = SentLog::new();
        let link = link(&sent, Role::UsbHost);
        let settings = ConfigSettings {
            bitrate: 0,
            ..Default::default()
        };

        link.on_local_config_changed(settings).await.unwrap();
        assert_eq!(link.ack_timeout_ms(), 221);
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_frames_wait_for_ack() {
        let sent = SentLog::new();
        let link = link(&sent, Role::UartBridge);

        let (line, conn, request, ()) = tokio::join!(
            link.on_local_line_state_changed(HwLineState::new(true, true)),
            link.send_connection_event(DeviceConn::PAIRING),
            link.request_config(),
            async {
                let mut seen = std::vec::Vec::new();
                for _ in 0..3 {
                    let frame = Frame::decode(&sent.receive().await).unwrap();
                    assert!(link.arq.on_ack_received(frame.ack_info()));
                    seen.push(frame.frame_type);
                }
                for expected in [FrameType::ConfigHwLine, FrameType::DeviceConn, FrameType::ConfigRequest] {
                    assert!(seen.contains(&expected));
                }
            }
        );

        assert_eq!(line, Ok(Delivery::Acked { attempts: 1 }));
        assert_eq!(conn, Ok(Delivery::Acked { attempts: 1 }));
        assert_eq!(request, Ok(Delivery::Acked { attempts: 1 }));
        assert_eq!(link.sequence_counters().tx_sequence, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_data_rejected_without_sequence() {
        let sent = SentLog::new();
        let link = link(&sent, Role::UsbHost);
        let mut payload = crate::protocol::Payload::new();
        payload.resize(MAX_PAYLOAD, 0xAA).unwrap();

        // The largest payload still goes out as one frame
        let (result, ()) = tokio::join!(link.send(Message::Data(payload)), async {
            let datagram = sent.receive().await;
            assert_eq!(datagram.len(), MAX_PAYLOAD + 2);
            link.arq
                .on_ack_received(Frame::decode(&datagram).unwrap().ack_info());
        });
        assert!(result.is_ok());
        assert!(Message::data(&[0u8; MAX_PAYLOAD + 1]).is_err());
        assert_eq!(link.sequence_counters().tx_sequence, 2);
    }
}
