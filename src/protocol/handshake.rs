//! Structured representation of the handshake (intention) packet: the first
//! packet of every Minecraft-protocol connection, declaring the protocol
//! version, the target address/port and the desired next state.

use crate::protocol::{DecodeError, Decoder, Encoder, MAX_SERVER_ADDRESS_LEN};
use std::net::IpAddr;

/// The state the client wishes to transition to after the handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum::AsRefStr)]
pub enum NextState {
    Status,
    Login,
    Transfer,
}

impl NextState {
    fn from_discriminant(x: i32) -> Result<Self, DecodeError> {
        match x {
            1 => Ok(NextState::Status),
            2 => Ok(NextState::Login),
            3 => Ok(NextState::Transfer),
            other => Err(DecodeError::UnknownNextState(other)),
        }
    }

    fn discriminant(self) -> i32 {
        match self {
            NextState::Status => 1,
            NextState::Login => 2,
            NextState::Transfer => 3,
        }
    }
}

/// A parsed handshake packet. Immutable once constructed; built once per
/// connection attempt and discarded after forwarding or rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeIntent {
    protocol_version: i32,
    server_address: String,
    server_port: u16,
    next_state: NextState,
}

impl HandshakeIntent {
    /// Creates a handshake intent, validating that the server address fits
    /// within the protocol's 255-byte bound.
    pub fn new(
        protocol_version: i32,
        server_address: impl Into<String>,
        server_port: u16,
        next_state: NextState,
    ) -> Result<Self, DecodeError> {
        let server_address = server_address.into();
        if server_address.len() > MAX_SERVER_ADDRESS_LEN {
            return Err(DecodeError::StringTooLong {
                length: server_address.len(),
                max: MAX_SERVER_ADDRESS_LEN,
            });
        }
        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn next_state(&self) -> NextState {
        self.next_state
    }

    /// Decodes the handshake fields. An out-of-range next-state value
    /// fails with [`DecodeError::UnknownNextState`].
    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let protocol_version = decoder.read_var_int()?;
        let server_address = decoder.read_string(MAX_SERVER_ADDRESS_LEN)?.to_owned();
        let server_port = decoder.read_u16()?;
        let next_state = NextState::from_discriminant(decoder.read_var_int()?)?;
        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }

    /// Encodes the handshake fields. Exact inverse of [`Self::decode`]:
    /// the round trip is byte-identical for any valid intent.
    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.protocol_version);
        encoder.write_string(&self.server_address);
        encoder.write_u16(self.server_port);
        encoder.write_var_int(self.next_state.discriminant());
    }

    /// Rewrites the intent to target a different backend address, keeping
    /// version and next-state. Used when routing through forced hosts.
    pub fn retarget(
        &self,
        server_address: impl Into<String>,
        server_port: u16,
    ) -> Result<Self, DecodeError> {
        Self::new(
            self.protocol_version,
            server_address,
            server_port,
            self.next_state,
        )
    }
}

/// The real-address override prepended to the handshake by the meexprox
/// forwarding variant: an address-family flag followed by exactly 4 or 16
/// raw octets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressOverride {
    address: IpAddr,
}

impl AddressOverride {
    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }

    /// Builds an override from a declared family flag and raw octets.
    ///
    /// The octet count must exactly match the declared family; a mismatch
    /// is [`DecodeError::AddressFamilyMismatch`], never a silent truncation
    /// or padding.
    pub fn from_parts(is_ipv6: bool, octets: &[u8]) -> Result<Self, DecodeError> {
        let expected = if is_ipv6 { 16 } else { 4 };
        if octets.len() != expected {
            return Err(DecodeError::AddressFamilyMismatch {
                expected,
                actual: octets.len(),
            });
        }
        let address = if is_ipv6 {
            IpAddr::from(<[u8; 16]>::try_from(octets).unwrap())
        } else {
            IpAddr::from(<[u8; 4]>::try_from(octets).unwrap())
        };
        Ok(Self { address })
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        decoder.read_ip_addr().map(Self::new)
    }

    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_ip_addr(self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent() -> HandshakeIntent {
        HandshakeIntent::new(765, "play.example.org", 25565, NextState::Login).unwrap()
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let intent = intent();
        let mut buf = Vec::new();
        intent.encode(&mut Encoder::new(&mut buf));

        let decoded = HandshakeIntent::decode(&mut Decoder::new(&buf)).unwrap();
        assert_eq!(decoded, intent);

        let mut buf2 = Vec::new();
        decoded.encode(&mut Encoder::new(&mut buf2));
        assert_eq!(buf, buf2);
    }

    #[test]
    fn round_trip_all_next_states() {
        for state in [NextState::Status, NextState::Login, NextState::Transfer] {
            let intent = HandshakeIntent::new(765, "host", 1, state).unwrap();
            let mut buf = Vec::new();
            intent.encode(&mut Encoder::new(&mut buf));
            let decoded = HandshakeIntent::decode(&mut Decoder::new(&buf)).unwrap();
            assert_eq!(decoded.next_state(), state);
        }
    }

    #[test]
    fn unknown_next_state_rejected() {
        let intent = intent();
        let mut buf = Vec::new();
        intent.encode(&mut Encoder::new(&mut buf));
        *buf.last_mut().unwrap() = 9;

        assert!(matches!(
            HandshakeIntent::decode(&mut Decoder::new(&buf)),
            Err(DecodeError::UnknownNextState(9))
        ));
    }

    #[test]
    fn truncated_handshake_is_eof() {
        let intent = intent();
        let mut buf = Vec::new();
        intent.encode(&mut Encoder::new(&mut buf));

        for len in 0..buf.len() - 1 {
            let err = HandshakeIntent::decode(&mut Decoder::new(&buf[..len])).unwrap_err();
            assert!(
                matches!(err, DecodeError::UnexpectedEof(_)),
                "truncation to {len} bytes gave {err:?}"
            );
        }
    }

    #[test]
    fn oversized_address_rejected_at_construction() {
        let address = "a".repeat(256);
        assert!(matches!(
            HandshakeIntent::new(765, address, 25565, NextState::Login),
            Err(DecodeError::StringTooLong { .. })
        ));
    }

    #[test]
    fn override_family_mismatch() {
        assert!(matches!(
            AddressOverride::from_parts(false, &[0u8; 16]),
            Err(DecodeError::AddressFamilyMismatch {
                expected: 4,
                actual: 16
            })
        ));
        assert!(matches!(
            AddressOverride::from_parts(true, &[0u8; 4]),
            Err(DecodeError::AddressFamilyMismatch {
                expected: 16,
                actual: 4
            })
        ));
    }

    #[test]
    fn override_round_trips_both_families() {
        for addr in ["203.0.113.5", "2001:db8::2:1"] {
            let addr: IpAddr = addr.parse().unwrap();
            let over = AddressOverride::new(addr);
            let mut buf = Vec::new();
            over.encode(&mut Encoder::new(&mut buf));
            let decoded = AddressOverride::decode(&mut Decoder::new(&buf)).unwrap();
            assert_eq!(decoded.address(), addr);
        }
    }
}
