//! # ARQ Engine
//!
//! Stop-and-wait reliability over the radio datagram primitive.
//!
//! ## Send state machine
//!
//! ```text
//!            ┌──────────────── retry (same type + sequence) ───────────┐
//!            ▼                                                         │
//!  IDLE ──► SENT ──► AWAITING_ACK ──► ACKED                            │
//!            │            │                                            │
//!            │            └── timeout ──► RETRY ── attempts left ──────┘
//!            │                              │
//!            └── transmit failed ───────────┤
//!                                           └── none left ──► EXHAUSTED
//! ```
//!
//! - One frame is in flight at a time: callers queue on the send slot until
//!   the previous frame is acked, exhausted or needs no ack.
//! - The sequence value is drawn when the send is issued, not when it is
//!   acked, so a dropped frame still consumes one value. Retransmissions reuse
//!   the value they were issued with.
//! - ACK and CONFIG_SETTINGS frames are never waited on.
//!
//! The receive path only touches the blocking context mutex and the ack
//! signal, both of which are safe to use from the radio callback.

use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use log::{debug, info, warn};

use crate::peer::PeerAddress;
use crate::protocol::{AckInfo, Frame, FrameError, FrameType, Message};
use crate::timing::LinkTiming;
use crate::traits::{AckTimer, LinkConfig, LinkStats, Radio, RadioError};

/// `tx_sequence` after bring-up or reset
pub const TX_SEQUENCE_DEFAULT: u8 = 1;
/// `rx_last_seen` after bring-up or reset
pub const RX_SEQUENCE_DEFAULT: u8 = 0;

/// Rolling sequence state for one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequenceCounters {
    /// Value the next non-ACK frame is sent with
    pub tx_sequence: u8,
    /// Sequence of the last DATA frame taken as new
    pub rx_last_seen: u8,
}

impl SequenceCounters {
    pub const fn new() -> Self {
        Self {
            tx_sequence: TX_SEQUENCE_DEFAULT,
            rx_last_seen: RX_SEQUENCE_DEFAULT,
        }
    }

    fn next_tx(&mut self) -> u8 {
        let sequence = self.tx_sequence;
        self.tx_sequence = sequence.wrapping_add(1);
        sequence
    }

    /// A DATA frame is new iff its sequence differs from the last one seen
    fn accept_data(&mut self, sequence: u8) -> bool {
        let fresh = sequence != self.rx_last_seen;
        self.rx_last_seen = sequence;
        fresh
    }
}

impl Default for SequenceCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Successful outcome of [`ArqEngine::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Delivery {
    /// The peer acknowledged the frame after `attempts` transmissions
    Acked { attempts: u8 },
    /// The frame type is not acknowledged; it left the radio
    Sent,
}

/// Errors returned by [`ArqEngine::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// The message could not be framed
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Every attempt timed out or failed to transmit; the frame was dropped
    #[error("{frame_type:?} #{sequence} dropped after {attempts} attempts")]
    Exhausted {
        frame_type: FrameType,
        sequence: u8,
        attempts: u8,
    },
}

/// Errors from link maintenance operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// A send is in flight
    #[error("link busy: send in flight")]
    Busy,
}

/// States of one outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum SendState {
    Idle,
    Sent,
    AwaitingAck,
    Retry,
    Acked,
    Exhausted,
}

/// The single in-flight send
struct PendingSend {
    ack: AckInfo,
    retries_remaining: u8,
    attempts: u8,
}

impl PendingSend {
    /// Consume one attempt, returning the next state
    fn fail_attempt(&mut self) -> SendState {
        self.retries_remaining = self.retries_remaining.saturating_sub(1);
        if self.retries_remaining > 0 {
            SendState::Retry
        } else {
            SendState::Exhausted
        }
    }
}

/// Mutable link state shared between the send path and the receive path
struct LinkContext {
    counters: SequenceCounters,
    timing: LinkTiming,
    stats: LinkStats,
    /// Identity the receive path matches ACKs against
    awaiting: Option<AckInfo>,
}

/// Send/ack/retry engine for the link to one peer
pub struct ArqEngine<M: RawMutex, R: Radio, T: AckTimer> {
    peer: PeerAddress,
    max_attempts: u8,
    /// Held for one datagram transmission at a time
    radio: Mutex<M, R>,
    /// Held for the whole life of one non-ACK send
    slot: Mutex<M, T>,
    ack: Signal<M, AckInfo>,
    context: BlockingMutex<M, RefCell<LinkContext>>,
}

impl<M: RawMutex, R: Radio, T: AckTimer> ArqEngine<M, R, T> {
    pub fn new(peer: PeerAddress, radio: R, timer: T, config: &LinkConfig) -> Self {
        Self {
            peer,
            max_attempts: config.max_attempts.max(1),
            radio: Mutex::new(radio),
            slot: Mutex::new(timer),
            ack: Signal::new(),
            context: BlockingMutex::new(RefCell::new(LinkContext {
                counters: SequenceCounters::new(),
                timing: LinkTiming::new(config.initial_bitrate, config.processing_margin_ms),
                stats: LinkStats::default(),
                awaiting: None,
            })),
        }
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    /// Send one message, blocking until it resolves.
    ///
    /// Worst case this takes `max_attempts` ack timeouts.
    pub async fn send(&self, message: Message) -> Result<Delivery, SendError> {
        if let Message::Ack(ack) = message {
            self.send_ack(ack).await.map_err(|_| SendError::Exhausted {
                frame_type: FrameType::Ack,
                sequence: 0,
                attempts: 1,
            })?;
            return Ok(Delivery::Sent);
        }

        // Framing errors must not consume a sequence value
        let mut frame = message.into_frame(0)?;

        let mut timer = self.slot.lock().await;
        frame.sequence = self.with_context(|ctx| ctx.counters.next_tx());
        let datagram = frame.to_datagram();
        let expects_ack = frame.frame_type.expects_ack();

        let mut pending = PendingSend {
            ack: frame.ack_info(),
            retries_remaining: self.max_attempts,
            attempts: 0,
        };
        let mut state = SendState::Idle;

        loop {
            state = match state {
                SendState::Idle | SendState::Retry => {
                    if state == SendState::Retry {
                        self.with_context(|ctx| ctx.stats.retransmissions += 1);
                    }
                    self.arm(pending.ack);
                    pending.attempts += 1;
                    match self.transmit(&datagram).await {
                        Ok(()) => SendState::Sent,
                        Err(e) => {
                            warn!("send {:?} #{} failed: {}", pending.ack.frame_type, pending.ack.sequence, e);
                            pending.fail_attempt()
                        }
                    }
                }
                SendState::Sent if !expects_ack => {
                    self.disarm();
                    debug!("sent {:?} #{}", pending.ack.frame_type, pending.ack.sequence);
                    return Ok(Delivery::Sent);
                }
                SendState::Sent => SendState::AwaitingAck,
                SendState::AwaitingAck => {
                    let timeout = self.ack_timeout_ms();
                    match select(self.ack.wait(), timer.wait_ms(timeout)).await {
                        Either::First(_) => SendState::Acked,
                        Either::Second(()) => {
                            warn!(
                                "retry {:?} #{}: no ack within {} ms",
                                pending.ack.frame_type, pending.ack.sequence, timeout
                            );
                            pending.fail_attempt()
                        }
                    }
                }
                SendState::Acked => {
                    self.disarm();
                    self.with_context(|ctx| ctx.stats.frames_acked += 1);
                    debug!(
                        "{:?} #{} acked after {} attempt(s)",
                        pending.ack.frame_type, pending.ack.sequence, pending.attempts
                    );
                    return Ok(Delivery::Acked {
                        attempts: pending.attempts,
                    });
                }
                SendState::Exhausted => {
                    self.disarm();
                    self.with_context(|ctx| ctx.stats.frames_exhausted += 1);
                    warn!(
                        "{:?} #{} dropped after {} attempts",
                        pending.ack.frame_type, pending.ack.sequence, pending.attempts
                    );
                    return Err(SendError::Exhausted {
                        frame_type: pending.ack.frame_type,
                        sequence: pending.ack.sequence,
                        attempts: pending.attempts,
                    });
                }
            };
        }
    }

    /// Acknowledge a received frame. ACKs are not acked and not retried.
    pub async fn send_ack(&self, ack: AckInfo) -> Result<(), RadioError> {
        if ack.frame_type == FrameType::Ack {
            return Ok(());
        }
        let datagram = Frame::ack(ack).to_datagram();
        match self.transmit(&datagram).await {
            Ok(()) => {
                self.with_context(|ctx| ctx.stats.acks_sent += 1);
                Ok(())
            }
            Err(e) => {
                warn!("send ack error: {}", e);
                Err(e)
            }
        }
    }

    /// Release the waiting sender if `ack` names the frame in flight.
    ///
    /// Never blocks; safe to call from the radio receive callback.
    pub fn on_ack_received(&self, ack: AckInfo) -> bool {
        let matched = self.with_context(|ctx| {
            if ctx.awaiting == Some(ack) {
                true
            } else {
                ctx.stats.stray_acks += 1;
                false
            }
        });
        if matched {
            self.ack.signal(ack);
        } else {
            debug!("ignoring ack for {:?} #{}", ack.frame_type, ack.sequence);
        }
        matched
    }

    /// Record an inbound DATA sequence value, returning whether it is new
    pub fn accept_data(&self, sequence: u8) -> bool {
        self.with_context(|ctx| {
            let fresh = ctx.counters.accept_data(sequence);
            if !fresh {
                ctx.stats.duplicates_suppressed += 1;
            }
            fresh
        })
    }

    /// Return both sequence counters to their defaults.
    ///
    /// Fails with [`LinkError::Busy`] while a send is in flight.
    pub fn reset_sequence_state(&self) -> Result<(), LinkError> {
        let _slot = self.slot.try_lock().map_err(|_| LinkError::Busy)?;
        self.with_context(|ctx| ctx.counters = SequenceCounters::new());
        info!("sequence counters reset");
        Ok(())
    }

    /// Adopt a new serial bitrate for the ack timeout
    pub fn set_bitrate(&self, bitrate: u32) -> bool {
        let timeout = self.with_context(|ctx| {
            ctx.timing
                .set_bitrate(bitrate)
                .then(|| ctx.timing.timeout_ms())
        });
        match timeout {
            Some(timeout) => {
                info!("bitrate {} bps, ack timeout {} ms", bitrate, timeout);
                true
            }
            None => {
                warn!("ignoring zero bitrate");
                false
            }
        }
    }

    pub fn bitrate(&self) -> u32 {
        self.with_context(|ctx| ctx.timing.bitrate())
    }

    pub fn ack_timeout_ms(&self) -> u32 {
        self.with_context(|ctx| ctx.timing.timeout_ms())
    }

    pub fn counters(&self) -> SequenceCounters {
        self.with_context(|ctx| ctx.counters)
    }

    pub fn stats(&self) -> LinkStats {
        self.with_context(|ctx| ctx.stats)
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut LinkStats)) {
        self.with_context(|ctx| update(&mut ctx.stats));
    }

    async fn transmit(&self, datagram: &[u8]) -> Result<(), RadioError> {
        let result = self.radio.lock().await.transmit(&self.peer, datagram).await;
        self.with_context(|ctx| match result {
            Ok(()) => ctx.stats.frames_sent += 1,
            Err(_) => ctx.stats.transmit_failures += 1,
        });
        result
    }

    /// Expect `ack` and drop any signal left over from an earlier frame
    fn arm(&self, ack: AckInfo) {
        self.with_context(|ctx| ctx.awaiting = Some(ack));
        self.ack.reset();
    }

    fn disarm(&self) {
        self.with_context(|ctx| ctx.awaiting = None);
        self.ack.reset();
    }

    fn with_context<U>(&self, f: impl FnOnce(&mut LinkContext) -> U) -> U {
        self.context.lock(|cell| f(&mut *cell.borrow_mut()))
    }
}
