//! UDP announcement listener.
//!
//! The wire format only recognizes `key`, `address`, and
//! `modifier1` inside the body — whether an announcement requests
//! pattern mode isn't a field this protocol carries over the wire, so
//! datagrams received here are always treated as literal-key
//! announcements. Pattern-mode subscriptions are exercised through the
//! registry API directly (see the integration test in this crate).

use std::net::SocketAddr;

use subscription_core::{AnnounceRequest, LookupMode};
use tokio::net::UdpSocket;

use crate::actor::RegistryHandle;

const MAX_DATAGRAM: usize = 2048;

pub async fn listen(bind: SocketAddr, handle: RegistryHandle) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(bind).await?;
    tracing::info!(%bind, "listening for subscription announcements");

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        match subscription_wire::decode_datagram(&buf[..len]) {
            Ok((_header, announcement)) => {
                let key = announcement.key.clone();
                let address = announcement.address.clone();
                let req = AnnounceRequest {
                    key,
                    address,
                    modifier1: announcement.modifier1,
                    modifier2: 0,
                    regexp: false,
                };
                match handle.announce(req).await {
                    Ok(_) => tracing::debug!(
                        %peer,
                        key = %String::from_utf8_lossy(&announcement.key),
                        address = %String::from_utf8_lossy(&announcement.address),
                        "accepted subscription announcement"
                    ),
                    Err(err) => tracing::warn!(%peer, %err, "rejected subscription announcement"),
                }
            }
            Err(err) => tracing::warn!(%peer, %err, "malformed subscription announcement"),
        }
    }
}

/// Used by the demo dispatch loop to mirror `select`'s expected mode.
pub const DEFAULT_MODE: LookupMode = LookupMode::Literal;
