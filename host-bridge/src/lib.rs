//! # Host Bridge
//!
//! Runs one side of the wireless serial bridge on a desktop machine so the
//! transport can be exercised without hardware.
//!
//! ```text
//! ┌──────────── host A ─────────────┐        ┌──────────── host B ─────────────┐
//! │ stdin ─► Link (usb_host) ─► UDP │ ~~~~~► │ UDP ─► Link (uart_bridge) ─► stdout
//! │ stdout ◄─────────────────── UDP │ ◄~~~~~ │ UDP ◄──────────────────── stdin │
//! └─────────────────────────────────┘        └─────────────────────────────────┘
//! ```
//!
//! Everything runs on one current-thread runtime, so the link uses the no-op
//! raw mutex.

use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use log::{info, warn};
use serial_link::{
    AckTimer, ConfigSettings, DeviceConn, Link, LinkStats, PeerRegistry, PeerStoreError, Radio,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Duration;

pub mod config;
pub mod events;
pub mod radio;
pub mod stdio;
pub mod store;

pub use config::{HostConfig, SerialSettings};
pub use events::HostEvents;
pub use radio::{receive_loop, TokioTimer, UdpRadio};
pub use stdio::TokioIo;
pub use store::FilePeerStore;

/// Errors that end a host bridge session
#[derive(Error, Debug)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("peer address error: {0}")]
    Address(#[from] PeerStoreError),
    #[error("usage: host-bridge <config.json>")]
    Usage,
}

/// Bridge stdin/stdout to the peer until stdin closes.
///
/// Returns the link counters at the end of the session.
pub async fn run(config: HostConfig) -> Result<LinkStats, HostError> {
    info!(
        "host bridge {} (link {})",
        env!("CARGO_PKG_VERSION"),
        serial_link::VERSION
    );
    let address = config.local_address()?;

    let mut store = FilePeerStore::new(&config.peer_store);
    let bonded = config.bond_address()?;
    if let Some(peer) = bonded {
        PeerRegistry::bond(&mut store, peer)?;
    }
    let registry = PeerRegistry::load(&mut store);

    let socket = UdpSocket::bind(config.bind).await?;
    info!(
        "{} on {}, remote side at {}",
        address,
        socket.local_addr()?,
        config.remote
    );

    let link: Link<NoopRawMutex, _, _> = Link::new(
        registry,
        UdpRadio::new(&socket, address, config.remote),
        TokioTimer,
        &config.link,
    );
    let local = ConfigSettings::from(config.serial);
    let mut events = HostEvents::new(config.link.role, local);
    let mut stdin = TokioIo(tokio::io::stdin());
    let mut stdout = TokioIo(tokio::io::stdout());

    let session = async {
        start_up(&link, local, bonded.is_some()).await;

        let mut buf = [0u8; 1024];
        let report = link.forward_from(&mut stdin, &mut buf).await?;
        info!(
            "stdin closed: {} chunks, {} delivered, {} dropped",
            report.chunks, report.delivered, report.dropped
        );

        tokio::time::sleep(Duration::from_millis(config.linger_ms)).await;
        Ok::<(), HostError>(())
    };

    match select3(
        session,
        receive_loop(&socket, &link),
        link.run(&mut stdout, &mut events),
    )
    .await
    {
        Either3::First(result) => result?,
        Either3::Second(result) => result?,
        Either3::Third(never) => match never {},
    }

    Ok(link.stats())
}

/// First exchange after bring-up
async fn start_up<R: Radio, T: AckTimer>(
    link: &Link<NoopRawMutex, R, T>,
    local: ConfigSettings,
    newly_bonded: bool,
) {
    if newly_bonded {
        if let Err(e) = link.send_connection_event(DeviceConn::PAIRING).await {
            warn!("pairing announcement failed: {}", e);
        }
    }

    let result = if link.role().requests_config_on_start() {
        link.request_config().await
    } else {
        link.on_local_config_changed(local).await
    };
    if let Err(e) = result {
        warn!("initial config exchange failed: {}", e);
    }
}
