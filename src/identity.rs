//! The identity record carried from proxy to backend: who the player is,
//! where they really connected from, and the profile properties vouched
//! for by the upstream auth provider.

use crate::protocol::{DecodeError, Decoder, Encoder, MAX_FORWARDED_STRING_LEN};
use serde::{Deserialize, Serialize};
use std::{
    net::IpAddr,
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use uuid::Uuid;

/// A single profile property (e.g. the skin blob). The value and signature
/// come from the upstream auth provider and are passed through unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ProfileProperty {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let name = decoder.read_string(MAX_FORWARDED_STRING_LEN)?.to_owned();
        let value = decoder.read_string(MAX_FORWARDED_STRING_LEN)?.to_owned();
        let signature = if decoder.read_bool()? {
            Some(decoder.read_string(MAX_FORWARDED_STRING_LEN)?.to_owned())
        } else {
            None
        };
        Ok(Self {
            name,
            value,
            signature,
        })
    }

    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(&self.name);
        encoder.write_string(&self.value);
        encoder.write_bool(self.signature.is_some());
        if let Some(signature) = &self.signature {
            encoder.write_string(signature);
        }
    }
}

/// Version tag of the serialized payload layout.
const PAYLOAD_VERSION: i32 = 1;

/// The identity record built by the proxy once per successful
/// authentication and consumed exactly once by the backend at
/// connection-acceptance time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingPayload {
    pub name: String,
    pub uuid: Uuid,
    /// The client's real address as observed by the proxy.
    pub address: IpAddr,
    pub properties: Vec<ProfileProperty>,
    /// Milliseconds since the Unix epoch; input to the replay
    /// freshness window.
    pub timestamp_ms: i64,
}

impl ForwardingPayload {
    /// Serializes the payload to the signed wire layout:
    /// `[version][timestamp][address][uuid][name][properties]`.
    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(PAYLOAD_VERSION);
        encoder.write_i64(self.timestamp_ms);
        encoder.write_string(&self.address.to_string());
        encoder.write_u128(self.uuid.as_u128());
        encoder.write_string(&self.name);
        encoder.write_var_int(self.properties.len().try_into().unwrap_or(i32::MAX));
        for property in &self.properties {
            property.encode(encoder);
        }
    }

    /// Exact inverse of [`Self::encode`].
    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        // Currently only layout version 1 exists; tolerate nothing else.
        let version = decoder.read_var_int()?;
        if version != PAYLOAD_VERSION {
            return Err(DecodeError::UnsupportedPayloadVersion(version));
        }
        let timestamp_ms = decoder.read_i64()?;
        let address = decoder
            .read_string(MAX_FORWARDED_STRING_LEN)?
            .parse::<IpAddr>()
            .map_err(|_| DecodeError::MalformedAddress)?;
        let uuid = Uuid::from_u128(decoder.read_u128()?);
        let name = decoder.read_string(MAX_FORWARDED_STRING_LEN)?.to_owned();
        let count = usize::try_from(decoder.read_var_int()?)?;
        let mut properties = Vec::new();
        for _ in 0..count {
            properties.push(ProfileProperty::decode(decoder)?);
        }
        Ok(Self {
            name,
            uuid,
            address,
            properties,
            timestamp_ms,
        })
    }
}

/// What a backend learns about a connection after extraction succeeds.
///
/// Handshake-time variants (pass-through, meexprox) cannot know the player
/// name or UUID yet, so those fields are optional; the address is always
/// the one the backend must use for bans, permissions and IP logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub name: Option<String>,
    pub uuid: Option<Uuid>,
    pub address: IpAddr,
    pub properties: Vec<ProfileProperty>,
}

impl From<ForwardingPayload> for IdentityRecord {
    fn from(payload: ForwardingPayload) -> Self {
        Self {
            name: Some(payload.name),
            uuid: Some(payload.uuid),
            address: payload.address,
            properties: payload.properties,
        }
    }
}

/// Source of payload timestamps. Clamps against the last value handed out
/// so the sequence is non-decreasing even if the system clock steps
/// backwards.
#[derive(Debug, Default)]
pub struct MonotonicTimestamp {
    last_ms: AtomicI64,
}

impl MonotonicTimestamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds since the Unix epoch, never less than a previously
    /// returned value.
    pub fn now_ms(&self) -> i64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let previous = self.last_ms.fetch_max(wall, Ordering::Relaxed);
        previous.max(wall)
    }
}
