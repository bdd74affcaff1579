//! Player forwarding engine for a Minecraft-protocol proxy.
//!
//! A backend game server behind a proxy only ever sees connections
//! originating from the proxy itself. Without extra information it cannot
//! tell players apart, so per-player bans, permissions and IP-based logic
//! all break. This crate implements the mechanism that hands verified
//! player identity and network-origin information (name, UUID, real IP,
//! profile properties) from the proxy to the backend.
//!
//! # Forwarding variants
//! Five interoperable schemes are supported, selected once from
//! configuration:
//!
//! * `none` — pass-through; nothing is attached.
//! * `meexprox` — the client's real address is prepended to the handshake.
//!   Unsigned; requires a private proxy-to-backend transport.
//! * `velocity` (velocity-modern) — a login-phase plugin message carrying
//!   the identity payload, signed with HMAC-SHA256 over a shared secret
//!   and bounded by a replay freshness window.
//! * `bungeecord` with a secret — the BungeeCord IP-forward plugin
//!   message followed by an HMAC-SHA256 signature.
//! * `bungeecord` without a secret (BungeeGuard) — the same message,
//!   unsigned; the deployment must firewall direct backend access.
//!
//! # Integration
//! The surrounding proxy hands the engine a raw handshake byte stream and
//! session context; the engine hands back either a rewritten handshake /
//! plugin message to forward, or a rejection. On the backend side the
//! mirrored extraction path governs admission. See
//! [`dispatcher::ForwardingDispatcher`] for the two entry points.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod signature;
pub mod strategy;

pub use config::{ForwardingConfig, ForwardingKind};
pub use dispatcher::{Extracted, ForwardingDispatcher, ForwardingSession, LoginExchange};
pub use error::ForwardingError;
pub use identity::{ForwardingPayload, IdentityRecord, ProfileProperty};
pub use signature::ForwardingSecret;
pub use strategy::{ForwardingStrategy, PluginMessage};
