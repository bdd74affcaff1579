//! Process-wide forwarding configuration.
//!
//! The surrounding proxy owns the configuration file; this module consumes
//! the deserialized `forwarding` section and resolves it into a concrete
//! [`ForwardingStrategy`] exactly once, at startup. The strategy is never
//! re-evaluated per connection.

use crate::{
    error::ForwardingError, signature::ForwardingSecret, strategy::ForwardingStrategy,
};
use serde::Deserialize;
use std::time::Duration;

/// Default replay freshness window for velocity-modern payloads.
const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 10;

fn default_freshness_window_secs() -> u64 {
    DEFAULT_FRESHNESS_WINDOW_SECS
}

/// The configured forwarding scheme family.
///
/// `bungeecord` covers two sub-variants: with a secret it selects the
/// signed BungeeCord scheme, without one it selects BungeeGuard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ForwardingKind {
    None,
    Meexprox,
    Velocity,
    Bungeecord,
}

/// The `forwarding` section of the proxy configuration. Loaded once at
/// startup and read-only thereafter; no locking is needed to read it.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardingConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: ForwardingKind,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,
}

impl ForwardingConfig {
    /// Configuration for a disabled engine; forwards nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            kind: ForwardingKind::None,
            secret: None,
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
        }
    }

    /// Resolves the configuration into the strategy used for every
    /// connection.
    ///
    /// Fails with [`ForwardingError::MissingSecret`] when a secret-bearing
    /// variant is enabled without a non-empty secret. This is a startup
    /// error: the engine refuses to run rather than silently downgrading
    /// the trust model.
    pub fn resolve(&self) -> Result<ForwardingStrategy, ForwardingError> {
        if !self.enabled {
            return Ok(ForwardingStrategy::None);
        }

        let secret = self
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(ForwardingSecret::from);

        let strategy = match self.kind {
            ForwardingKind::None => ForwardingStrategy::None,
            ForwardingKind::Meexprox => ForwardingStrategy::Meexprox,
            ForwardingKind::Velocity => ForwardingStrategy::VelocityModern {
                secret: secret.ok_or(ForwardingError::MissingSecret("velocity"))?,
                freshness_window: Duration::from_secs(self.freshness_window_secs),
            },
            ForwardingKind::Bungeecord => match secret {
                Some(secret) => ForwardingStrategy::BungeecordSecret { secret },
                None => ForwardingStrategy::Bungeeguard,
            },
        };
        Ok(strategy)
    }
}
