//! The five interoperable forwarding schemes.
//!
//! The variant set is closed and each variant has a distinct wire format,
//! so the selector is a plain sum type. It is resolved once from
//! configuration (see [`crate::config::ForwardingConfig::resolve`]) and
//! dispatched per connection; it is never re-evaluated.
//!
//! Two of the variants attach data at handshake time (`None`, `Meexprox`)
//! and three carry a login-phase plugin message (`VelocityModern`,
//! `BungeecordSecret`, `Bungeeguard`).

use crate::{
    error::ForwardingError,
    identity::{ForwardingPayload, IdentityRecord, ProfileProperty},
    protocol::{
        handshake::{AddressOverride, HandshakeIntent},
        DecodeError, Decoder, Encoder, MAX_FORWARDED_STRING_LEN, MAX_SERVER_ADDRESS_LEN,
    },
    signature::{self, ForwardingSecret, SIGNATURE_LEN},
};
use bytes::Bytes;
use std::{net::IpAddr, time::Duration};
use uuid::Uuid;

/// Channel of the velocity-modern login plugin exchange.
pub const VELOCITY_CHANNEL: &str = "velocity:player_info";
/// Channel of the BungeeCord-family plugin messages.
pub const BUNGEE_CHANNEL: &str = "bungeecord:main";
/// Subchannel identifying an IP-forward message.
const BUNGEE_SUBCHANNEL_IP: &str = "IP";

/// An application-defined, channel-tagged packet carrying out-of-band
/// data over the existing connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMessage {
    pub channel: String,
    pub data: Bytes,
}

/// The forwarding scheme in effect for the process lifetime.
#[derive(Debug, Clone, strum::AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ForwardingStrategy {
    /// Pass-through; no identity or address information is attached.
    None,
    /// Prepends the client's real address to the handshake.
    ///
    /// No signature is involved: this variant trusts the transport layer
    /// (the proxy reaches the backend over a private or authenticated
    /// channel). It provides no protection against a direct, non-proxied
    /// connection unless the backend independently firewalls direct
    /// access.
    Meexprox,
    /// Login-phase plugin message, HMAC-SHA256 signed, with a replay
    /// freshness window.
    VelocityModern {
        secret: ForwardingSecret,
        freshness_window: Duration,
    },
    /// BungeeCord IP-forward plugin message followed by an HMAC-SHA256
    /// signature over the preceding message bytes.
    BungeecordSecret { secret: ForwardingSecret },
    /// Identical wire layout to [`Self::BungeecordSecret`] minus the
    /// signature. No cryptographic check is performed on extraction; the
    /// deployment must guarantee the backend is unreachable except from
    /// the proxy. This is a deliberately weaker trust model, not a bug.
    Bungeeguard,
}

impl ForwardingStrategy {
    /// The plugin-message channel this variant uses during login, or
    /// `None` for the handshake-time variants.
    pub fn login_channel(&self) -> Option<&'static str> {
        match self {
            Self::None | Self::Meexprox => None,
            Self::VelocityModern { .. } => Some(VELOCITY_CHANNEL),
            Self::BungeecordSecret { .. } | Self::Bungeeguard => Some(BUNGEE_CHANNEL),
        }
    }

    /// Proxy side: encodes the handshake to be sent to the backend,
    /// attaching the real-address override where the variant calls
    /// for it.
    pub fn apply_handshake(&self, intent: &HandshakeIntent, client_addr: IpAddr) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        if let Self::Meexprox = self {
            AddressOverride::new(client_addr).encode(&mut encoder);
        }
        intent.encode(&mut encoder);
        buf
    }

    /// Backend side: decodes a handshake produced by [`Self::apply_handshake`],
    /// returning the intent together with the address the backend must
    /// treat as the peer address for all subsequent authorization logic.
    pub fn extract_handshake(
        &self,
        bytes: &[u8],
        observed_peer: IpAddr,
    ) -> Result<(HandshakeIntent, IpAddr), DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let effective_addr = if let Self::Meexprox = self {
            AddressOverride::decode(&mut decoder)?.address()
        } else {
            observed_peer
        };
        let intent = HandshakeIntent::decode(&mut decoder)?;
        Ok((intent, effective_addr))
    }

    /// Proxy side: builds the login-phase plugin message carrying the
    /// authenticated identity, or `None` for variants that forward at
    /// handshake time only.
    pub fn login_message(
        &self,
        payload: &ForwardingPayload,
    ) -> Result<Option<PluginMessage>, ForwardingError> {
        match self {
            Self::None | Self::Meexprox => Ok(None),
            Self::VelocityModern { secret, .. } => {
                let mut body = Vec::new();
                payload.encode(&mut Encoder::new(&mut body));
                let sig = signature::sign(secret, &body);

                let mut data = Vec::with_capacity(SIGNATURE_LEN + body.len());
                data.extend_from_slice(&sig);
                data.extend_from_slice(&body);
                Ok(Some(PluginMessage {
                    channel: VELOCITY_CHANNEL.to_owned(),
                    data: data.into(),
                }))
            }
            Self::BungeecordSecret { secret } => {
                let mut data = encode_bungee_fields(payload)?;
                let sig = signature::sign(secret, &data);
                data.extend_from_slice(&sig);
                Ok(Some(PluginMessage {
                    channel: BUNGEE_CHANNEL.to_owned(),
                    data: data.into(),
                }))
            }
            Self::Bungeeguard => {
                let data = encode_bungee_fields(payload)?;
                Ok(Some(PluginMessage {
                    channel: BUNGEE_CHANNEL.to_owned(),
                    data: data.into(),
                }))
            }
        }
    }

    /// Backend side: extracts and verifies the identity carried by a
    /// login-phase plugin message.
    ///
    /// `now_ms` is the backend's current wall-clock time, used for the
    /// velocity-modern replay freshness check.
    pub fn extract_login(&self, data: &[u8], now_ms: i64) -> Result<IdentityRecord, ForwardingError> {
        match self {
            // Handshake-time variants carry no login message; receiving
            // one means the peer is speaking the wrong scheme.
            Self::None | Self::Meexprox => {
                Err(ForwardingError::UnexpectedChannel(self.as_ref().to_owned()))
            }
            Self::VelocityModern {
                secret,
                freshness_window,
            } => extract_velocity(secret, *freshness_window, data, now_ms),
            Self::BungeecordSecret { secret } => extract_bungee(Some(secret), data),
            Self::Bungeeguard => extract_bungee(None, data),
        }
    }
}

/// `[subchannel "IP"][address][uuid][properties as JSON text]`, each field
/// a varint-length-prefixed string.
fn encode_bungee_fields(payload: &ForwardingPayload) -> Result<Vec<u8>, ForwardingError> {
    let properties = serde_json::to_string(&payload.properties)?;
    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf);
    encoder.write_string(BUNGEE_SUBCHANNEL_IP);
    encoder.write_string(&payload.address.to_string());
    encoder.write_string(&payload.uuid.hyphenated().to_string());
    encoder.write_string(&properties);
    Ok(buf)
}

fn extract_velocity(
    secret: &ForwardingSecret,
    freshness_window: Duration,
    data: &[u8],
    now_ms: i64,
) -> Result<IdentityRecord, ForwardingError> {
    if data.len() < SIGNATURE_LEN {
        return Err(DecodeError::UnexpectedEof(SIGNATURE_LEN - data.len()).into());
    }
    let (sig, body) = data.split_at(SIGNATURE_LEN);

    // The signature gates everything: no field is trusted before this
    // comparison, and the comparison is constant-time.
    if !signature::verify(secret, body, sig) {
        return Err(ForwardingError::SignatureMismatch);
    }

    let payload = ForwardingPayload::decode(&mut Decoder::new(body))?;

    // Signed bytes must be the canonical serialization of the payload;
    // a non-canonical encoding is treated the same as a bad signature.
    let mut canonical = Vec::new();
    payload.encode(&mut Encoder::new(&mut canonical));
    if canonical != body {
        return Err(ForwardingError::SignatureMismatch);
    }

    let window_ms = freshness_window.as_millis() as i64;
    let age_ms = now_ms - payload.timestamp_ms;
    if age_ms.abs() > window_ms {
        return Err(ForwardingError::StalePayload { age_ms, window_ms });
    }

    Ok(payload.into())
}

fn extract_bungee(
    secret: Option<&ForwardingSecret>,
    data: &[u8],
) -> Result<IdentityRecord, ForwardingError> {
    let mut decoder = Decoder::new(data);

    let subchannel = decoder.read_string(MAX_SERVER_ADDRESS_LEN)?;
    if subchannel != BUNGEE_SUBCHANNEL_IP {
        return Err(ForwardingError::UnexpectedChannel(subchannel.to_owned()));
    }

    let address = decoder
        .read_string(MAX_FORWARDED_STRING_LEN)?
        .parse::<IpAddr>()
        .map_err(|_| DecodeError::MalformedAddress)?;
    let uuid = Uuid::parse_str(decoder.read_string(MAX_FORWARDED_STRING_LEN)?)
        .map_err(|_| ForwardingError::MalformedUuid)?;
    let properties: Vec<ProfileProperty> =
        serde_json::from_str(decoder.read_string(MAX_FORWARDED_STRING_LEN)?)?;

    if let Some(secret) = secret {
        match decoder.remaining() {
            SIGNATURE_LEN => {
                let signed_len = data.len() - SIGNATURE_LEN;
                let sig = decoder.consume::<SIGNATURE_LEN>()?;
                if !signature::verify(secret, &data[..signed_len], &sig) {
                    return Err(ForwardingError::SignatureMismatch);
                }
            }
            // A well-formed message without a trailing signature is not
            // acceptable when a secret is configured.
            remaining if remaining < SIGNATURE_LEN => {
                return Err(ForwardingError::SignatureMismatch);
            }
            _ => return Err(ForwardingError::SignatureMismatch),
        }
    }

    Ok(IdentityRecord {
        name: None,
        uuid: Some(uuid),
        address,
        properties,
    })
}
