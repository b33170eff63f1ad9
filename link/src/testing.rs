//! Test doubles shared by the unit tests.

use std::vec::Vec;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;

use crate::peer::PeerAddress;
use crate::protocol::{ConfigSettings, Datagram, DeviceConn, HwLineState};
use crate::traits::{AckTimer, LinkEvents, Radio, RadioError};

pub const PEER: PeerAddress = PeerAddress::new([0x24, 0x6f, 0x28, 0xaa, 0xbb, 0xcc]);
pub const STRANGER: PeerAddress = PeerAddress::new([0x24, 0x6f, 0x28, 0x11, 0x22, 0x33]);

/// Datagrams handed to a [`MockRadio`], in transmit order
pub struct SentLog {
    channel: Channel<NoopRawMutex, Datagram, 32>,
}

impl SentLog {
    pub fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    pub async fn receive(&self) -> Datagram {
        self.channel.receive().await
    }

    pub fn try_receive(&self) -> Option<Datagram> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

/// Radio that records every datagram, optionally failing the first few
pub struct MockRadio<'a> {
    log: &'a SentLog,
    failures: usize,
}

impl<'a> MockRadio<'a> {
    pub fn new(log: &'a SentLog) -> Self {
        Self::failing(log, 0)
    }

    pub fn failing(log: &'a SentLog, failures: usize) -> Self {
        Self { log, failures }
    }
}

impl Radio for MockRadio<'_> {
    async fn transmit(&mut self, _peer: &PeerAddress, datagram: &[u8]) -> Result<(), RadioError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(RadioError::TransmitFailed);
        }
        let datagram = Datagram::from_slice(datagram).map_err(|_| RadioError::TransmitFailed)?;
        self.log
            .channel
            .try_send(datagram)
            .map_err(|_| RadioError::NotReady)
    }
}

pub struct TokioTimer;

impl AckTimer for TokioTimer {
    async fn wait_ms(&mut self, ms: u32) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms.into())).await;
    }
}

/// Serial sink collecting everything written to it
#[derive(Default)]
pub struct VecSink {
    pub bytes: Vec<u8>,
    pub writes: usize,
}

impl embedded_io_async::ErrorType for VecSink {
    type Error = core::convert::Infallible;
}

impl embedded_io_async::Write for VecSink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.bytes.extend_from_slice(buf);
        self.writes += 1;
        Ok(buf.len())
    }
}

/// Handler recording every callback
#[derive(Default)]
pub struct RecordingEvents {
    pub configs: Vec<ConfigSettings>,
    pub lines: Vec<HwLineState>,
    pub indications: Vec<DeviceConn>,
    pub requests: usize,
    pub reply: Option<ConfigSettings>,
}

impl LinkEvents for RecordingEvents {
    fn apply_config(&mut self, settings: ConfigSettings) {
        self.configs.push(settings);
    }

    fn set_line_state(&mut self, line: HwLineState) {
        self.lines.push(line);
    }

    fn indicate_connection(&mut self, pattern: DeviceConn) {
        self.indications.push(pattern);
    }

    fn config_requested(&mut self) -> Option<ConfigSettings> {
        self.requests += 1;
        self.reply
    }
}
