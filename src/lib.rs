//! warden: a readiness-gated command daemon with a persistent blacklist.
//!
//! The crate is organized around a single event loop ([`lifecycle`]) that
//! consumes platform events from one queue. Commands are contributed by
//! [`plugins`], routed by [`router`] behind a readiness gate, throttled by
//! [`cooldown`], and authorized against an in-memory [`blacklist`] cache
//! that shadows a SQLite store. Failures flow through [`faults`] for
//! classification and operator reporting.

pub mod blacklist;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod faults;
pub mod lifecycle;
pub mod logbuf;
pub mod platform;
pub mod plugins;
pub mod router;

pub use blacklist::{BlacklistCache, BlacklistStore, BlockEntry, PrincipalId};
pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use faults::{Fault, FaultPipeline};
pub use lifecycle::Lifecycle;
pub use logbuf::LogSink;
pub use platform::{InboundMessage, PlatformEvent, PlatformTransport};
pub use plugins::{Plugin, PluginLoader};
pub use router::{CommandRegistry, CommandRouter, CommandSpec, ReadinessGate};
