//! Wire primitives shared by every forwarding variant, plus the handshake
//! model they all operate on.

mod decoder;
mod encoder;
pub mod handshake;

pub use decoder::{DecodeError, Decoder};
pub use encoder::Encoder;

/// Maximum byte length of the server address field in a handshake.
pub const MAX_SERVER_ADDRESS_LEN: usize = 255;

/// Limit on any single forwarded string to avoid out-of-memory DOS
/// from a forged length prefix.
pub const MAX_FORWARDED_STRING_LEN: usize = 32767;
