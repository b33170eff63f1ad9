//! # Frame Codec
//!
//! Wire format for datagrams exchanged between the two bridge devices.
//! Every datagram carries exactly one frame.
//!
//! ## Frame Format
//!
//! ```text
//! ┌────────┬──────────┬────────────────────────┐
//! │  Type  │ Sequence │        Payload         │
//! │ 1 byte │  1 byte  │     0..=240 bytes      │
//! └────────┴──────────┴────────────────────────┘
//! ```
//!
//! Control payloads use a fixed little-endian layout:
//!
//! | Type            | Layout                                              |
//! |-----------------|-----------------------------------------------------|
//! | CONFIG_SETTINGS | bitrate u32, data_bits u8, parity u8, stop_bits u8, hw_flow u8 |
//! | CONFIG_HW_LINE  | dtr u8, rts u8                                      |
//! | DEVICE_CONN     | on_period_ms i32, off_period_ms i32, on_count i32   |
//! | CONFIG_REQUEST  | (empty)                                             |
//! | ACK             | acknowledged type u8, acknowledged sequence u8      |

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Type and sequence bytes preceding the payload
pub const HEADER_LEN: usize = 2;

/// Largest payload carried by a single frame
pub const MAX_PAYLOAD: usize = 240;

/// Largest encoded frame
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD;

/// Frame payload storage
pub type Payload = Vec<u8, MAX_PAYLOAD>;

/// Encoded frame ready for the radio
pub type Datagram = Vec<u8, MAX_FRAME_LEN>;

/// Frame types on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FrameType {
    /// Serial stream bytes
    Data = 0,
    /// Baud rate / framing / hardware flow configuration
    ConfigSettings = 1,
    /// DTR / RTS line state
    ConfigHwLine = 2,
    /// Connection indication event
    DeviceConn = 3,
    /// Ask the peer to echo its serial configuration
    ConfigRequest = 4,
    /// Acknowledgment of another frame
    Ack = 5,
}

impl FrameType {
    /// Whether a frame of this type is acknowledged by the receiver
    pub const fn expects_ack(self) -> bool {
        !matches!(self, FrameType::Ack | FrameType::ConfigSettings)
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::ConfigSettings),
            2 => Ok(Self::ConfigHwLine),
            3 => Ok(Self::DeviceConn),
            4 => Ok(Self::ConfigRequest),
            5 => Ok(Self::Ack),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Errors during frame encoding/decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Datagram shorter than the two header bytes
    #[error("malformed frame: {0} bytes")]
    TooShort(usize),
    /// Type byte does not name a known frame type
    #[error("unknown frame type {0}")]
    UnknownType(u8),
    /// Payload exceeds [`MAX_PAYLOAD`]
    #[error("payload of {0} bytes exceeds frame capacity")]
    PayloadTooLarge(usize),
    /// Control payload shorter than its fixed layout
    #[error("{frame_type:?} payload has {len} bytes")]
    BadControlPayload { frame_type: FrameType, len: usize },
    /// Output buffer cannot hold the encoded frame
    #[error("buffer too small for frame")]
    BufferTooSmall,
}

/// Serial line configuration mirrored between the two sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigSettings {
    /// Bits per second
    pub bitrate: u32,
    /// 5, 6, 7, 8 or 16
    pub data_bits: u8,
    /// 0 = none, 1 = odd, 2 = even
    pub parity: u8,
    /// 0 = 1 bit, 1 = 1.5 bits, 2 = 2 bits
    pub stop_bits: u8,
    /// 1 when RTS/CTS hardware flow control is enabled
    pub hw_flow_status: u8,
}

impl ConfigSettings {
    /// Encoded size
    pub const SIZE: usize = 8;

    pub fn hw_flow_enabled(&self) -> bool {
        self.hw_flow_status != 0
    }

    fn write_to(&self, out: &mut Payload) -> Result<(), FrameError> {
        let mut raw = [0u8; ConfigSettings::SIZE];
        raw[0..4].copy_from_slice(&self.bitrate.to_le_bytes());
        raw[4] = self.data_bits;
        raw[5] = self.parity;
        raw[6] = self.stop_bits;
        raw[7] = self.hw_flow_status;
        extend(out, &raw)
    }

    fn read_from(payload: &[u8]) -> Result<Self, FrameError> {
        let raw = fixed::<{ ConfigSettings::SIZE }>(FrameType::ConfigSettings, payload)?;
        Ok(Self {
            bitrate: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            data_bits: raw[4],
            parity: raw[5],
            stop_bits: raw[6],
            hw_flow_status: raw[7],
        })
    }
}

impl Default for ConfigSettings {
    fn default() -> Self {
        Self {
            bitrate: crate::timing::DEFAULT_BITRATE,
            data_bits: 8,
            parity: 0,
            stop_bits: 0,
            hw_flow_status: 0,
        }
    }
}

/// Modem control lines driven by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HwLineState {
    pub dtr: u8,
    pub rts: u8,
}

impl HwLineState {
    pub const SIZE: usize = 2;

    pub const fn new(dtr: bool, rts: bool) -> Self {
        Self {
            dtr: dtr as u8,
            rts: rts as u8,
        }
    }

    fn read_from(payload: &[u8]) -> Result<Self, FrameError> {
        let raw = fixed::<{ HwLineState::SIZE }>(FrameType::ConfigHwLine, payload)?;
        Ok(Self {
            dtr: raw[0],
            rts: raw[1],
        })
    }
}

/// Connection indicator blink pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConn {
    pub on_period_ms: i32,
    pub off_period_ms: i32,
    pub on_count: i32,
}

impl DeviceConn {
    pub const SIZE: usize = 12;

    /// Sent to the peer when the user presses the pairing button
    pub const PAIRING: Self = Self::pattern(5000, 10, 1);
    /// Shown after hardware flow control is switched on
    pub const HW_FLOW_ENABLED: Self = Self::pattern(100, 100, 25);
    /// Shown after hardware flow control is switched off
    pub const HW_FLOW_DISABLED: Self = Self::pattern(500, 500, 5);

    pub const fn pattern(on_period_ms: i32, off_period_ms: i32, on_count: i32) -> Self {
        Self {
            on_period_ms,
            off_period_ms,
            on_count,
        }
    }

    /// A pattern with no positive count or on period turns the indicator off
    pub fn is_visible(&self) -> bool {
        self.on_count > 0 && self.on_period_ms > 0 && self.off_period_ms >= 0
    }

    fn write_to(&self, out: &mut Payload) -> Result<(), FrameError> {
        extend(out, &self.on_period_ms.to_le_bytes())?;
        extend(out, &self.off_period_ms.to_le_bytes())?;
        extend(out, &self.on_count.to_le_bytes())
    }

    fn read_from(payload: &[u8]) -> Result<Self, FrameError> {
        let raw = fixed::<{ DeviceConn::SIZE }>(FrameType::DeviceConn, payload)?;
        let word = |i: usize| i32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Ok(Self {
            on_period_ms: word(0),
            off_period_ms: word(4),
            on_count: word(8),
        })
    }
}

/// Identity of an acknowledged frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AckInfo {
    pub frame_type: FrameType,
    pub sequence: u8,
}

impl AckInfo {
    pub const SIZE: usize = 2;

    pub const fn new(frame_type: FrameType, sequence: u8) -> Self {
        Self {
            frame_type,
            sequence,
        }
    }

    fn read_from(payload: &[u8]) -> Result<Self, FrameError> {
        let raw = fixed::<{ AckInfo::SIZE }>(FrameType::Ack, payload)?;
        Ok(Self {
            frame_type: FrameType::try_from(raw[0])?,
            sequence: raw[1],
        })
    }
}

/// Decoded frame content, one variant per frame type
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Message {
    Data(Payload),
    ConfigSettings(ConfigSettings),
    HwLine(HwLineState),
    DeviceConn(DeviceConn),
    ConfigRequest,
    Ack(AckInfo),
}

impl Message {
    /// Build a data message, failing if `bytes` exceeds one frame
    pub fn data(bytes: &[u8]) -> Result<Self, FrameError> {
        Payload::from_slice(bytes)
            .map(Message::Data)
            .map_err(|_| FrameError::PayloadTooLarge(bytes.len()))
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Message::Data(_) => FrameType::Data,
            Message::ConfigSettings(_) => FrameType::ConfigSettings,
            Message::HwLine(_) => FrameType::ConfigHwLine,
            Message::DeviceConn(_) => FrameType::DeviceConn,
            Message::ConfigRequest => FrameType::ConfigRequest,
            Message::Ack(_) => FrameType::Ack,
        }
    }

    /// Wrap the message in a frame carrying `sequence`
    pub fn into_frame(self, sequence: u8) -> Result<Frame, FrameError> {
        let frame_type = self.frame_type();
        let mut payload = Payload::new();
        match self {
            Message::Data(bytes) => payload = bytes,
            Message::ConfigSettings(settings) => settings.write_to(&mut payload)?,
            Message::HwLine(line) => extend(&mut payload, &[line.dtr, line.rts])?,
            Message::DeviceConn(conn) => conn.write_to(&mut payload)?,
            Message::ConfigRequest => {}
            Message::Ack(ack) => extend(&mut payload, &[ack.frame_type as u8, ack.sequence])?,
        }
        Ok(Frame {
            frame_type,
            sequence,
            payload,
        })
    }
}

/// A frame as it travels over the radio
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub frame_type: FrameType,
    /// Meaningless for ACK frames, which are always sent with 0
    pub sequence: u8,
    pub payload: Payload,
}

impl Frame {
    /// ACK frame for `ack`
    pub fn ack(ack: AckInfo) -> Self {
        let mut payload = Payload::new();
        // Two bytes always fit
        let _ = payload.extend_from_slice(&[ack.frame_type as u8, ack.sequence]);
        Self {
            frame_type: FrameType::Ack,
            sequence: 0,
            payload,
        }
    }

    /// Identity this frame is acknowledged with
    pub fn ack_info(&self) -> AckInfo {
        AckInfo::new(self.frame_type, self.sequence)
    }

    /// Encoded length
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Write the frame into `buffer`, returning the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let len = self.encoded_len();
        if buffer.len() < len {
            return Err(FrameError::BufferTooSmall);
        }
        buffer[0] = self.frame_type as u8;
        buffer[1] = self.sequence;
        buffer[HEADER_LEN..len].copy_from_slice(&self.payload);
        Ok(len)
    }

    /// Encode into an owned datagram
    pub fn to_datagram(&self) -> Datagram {
        let mut out = Datagram::new();
        // Payload is bounded by MAX_PAYLOAD so the frame always fits
        let _ = out.extend_from_slice(&[self.frame_type as u8, self.sequence]);
        let _ = out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a received datagram
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::TooShort(data.len()));
        }
        let frame_type = FrameType::try_from(data[0])?;
        let body = &data[HEADER_LEN..];
        let payload =
            Payload::from_slice(body).map_err(|_| FrameError::PayloadTooLarge(body.len()))?;
        Ok(Self {
            frame_type,
            sequence: data[1],
            payload,
        })
    }

    /// Interpret the payload according to the frame type
    pub fn message(&self) -> Result<Message, FrameError> {
        let payload = self.payload.as_slice();
        Ok(match self.frame_type {
            FrameType::Data => Message::Data(self.payload.clone()),
            FrameType::ConfigSettings => Message::ConfigSettings(ConfigSettings::read_from(payload)?),
            FrameType::ConfigHwLine => Message::HwLine(HwLineState::read_from(payload)?),
            FrameType::DeviceConn => Message::DeviceConn(DeviceConn::read_from(payload)?),
            FrameType::ConfigRequest => Message::ConfigRequest,
            FrameType::Ack => Message::Ack(AckInfo::read_from(payload)?),
        })
    }
}

fn extend(out: &mut Payload, bytes: &[u8]) -> Result<(), FrameError> {
    out.extend_from_slice(bytes)
        .map_err(|_| FrameError::PayloadTooLarge(out.len() + bytes.len()))
}

/// Leading `N` bytes of a fixed-layout control payload; trailing bytes are ignored
fn fixed<const N: usize>(frame_type: FrameType, payload: &[u8]) -> Result<[u8; N], FrameError> {
    payload
        .get(..N)
        .and_then(|head| head.try_into().ok())
        .ok_or(FrameError::BadControlPayload {
            frame_type,
            len: payload.len(),
        })
}
