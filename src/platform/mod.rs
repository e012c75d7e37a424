//! Chat-platform transport abstraction.
//!
//! Design goal: platform-specific transports are pluggable. The lifecycle
//! controller owns boot ordering, event consumption, and shutdown; a
//! transport only needs to implement this trait.

pub mod discord;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::blacklist::PrincipalId;

/// A message received from the chat platform.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Principal that authored the message.
    pub principal: PrincipalId,
    /// Channel the message arrived in; replies go back here.
    pub channel_id: u64,
    /// Group context identifier. `None` for private one-to-one contexts.
    pub guild_id: Option<u64>,
    /// Raw message text.
    pub text: String,
}

/// Events a transport emits into the lifecycle's event queue.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// Connection established and authenticated; the platform is not yet
    /// fully synced.
    Connected,
    /// The platform finished syncing. Carries the set of principals the
    /// platform can currently resolve, used for cache reconciliation.
    Ready {
        /// Principals known to the live platform.
        active_principals: HashSet<PrincipalId>,
    },
    /// An inbound message that may be a command invocation.
    Message(InboundMessage),
    /// A fault raised outside command dispatch (event handlers, heartbeats).
    Fault {
        /// Where the fault occurred (event or subsystem name).
        source: String,
        /// Full fault detail.
        detail: String,
    },
}

/// Transport contract. New platforms only need to implement this trait.
#[async_trait]
pub trait PlatformTransport: Send + Sync {
    /// Stable transport identifier (e.g. `discord`).
    fn id(&self) -> &'static str;

    /// The daemon's own principal on this platform, when derivable before
    /// connecting. Used for mention prefixes and self-message filtering.
    fn self_principal(&self) -> Option<PrincipalId> {
        None
    }

    /// Most recent measured round-trip latency to the platform.
    fn latency(&self) -> Duration {
        Duration::ZERO
    }

    /// Connect, authenticate, and forward events until the connection ends.
    ///
    /// Returns `Ok(())` only after a requested disconnect; any other exit is
    /// an error and the caller decides whether to reconnect.
    async fn run(&self, event_tx: mpsc::Sender<PlatformEvent>) -> anyhow::Result<()>;

    /// Send a text message to the given channel.
    async fn send_message(&self, channel_id: u64, text: &str) -> anyhow::Result<()>;

    /// Announce availability once the process is ready (presence update).
    /// Best-effort.
    async fn announce_ready(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Close the platform connection and any open sessions, then release
    /// the outbound transport. Best-effort.
    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
