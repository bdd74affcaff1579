use std::{convert::Infallible, net::IpAddr, num::TryFromIntError, str::Utf8Error};

/// An error while decoding forwarded data.
///
/// Every variant indicates either a protocol mismatch or a hostile/corrupt
/// peer; none of them is retriable without a fresh handshake.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("need at least {0} more bytes")]
    UnexpectedEof(usize),
    #[error("invalid boolean pattern {0} - expected either 0 or 1")]
    InvalidBool(u8),
    #[error("varint uses more than 5 byte groups")]
    MalformedVarInt,
    #[error("string length {length} exceeds maximum of {max} bytes")]
    StringTooLong { length: usize, max: usize },
    #[error("unknown next-state discriminant {0}")]
    UnknownNextState(i32),
    #[error("address family declares {expected} octets but {actual} were supplied")]
    AddressFamilyMismatch { expected: usize, actual: usize },
    #[error("unsupported forwarding payload version {0}")]
    UnsupportedPayloadVersion(i32),
    #[error("malformed textual address")]
    MalformedAddress,
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    #[error(transparent)]
    IntConversion(#[from] TryFromIntError),
    /// Special variant for integer conversions to work. Cannot occur.
    #[error(transparent)]
    Infallible(#[from] Infallible),
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// A raw decoder for a Minecraft bitstream.
///
/// All reads are bounds-checked against the remaining buffer before any
/// interpretation; no read advances past the end of the slice.
#[derive(Debug)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder from the buffer it will read from.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Gets the remaining buffer.
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buffer.len()
    }

    /// Returns if there is no data left in the buffer.
    pub fn is_finished(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes `n` bytes from the buffer, returning them as a slice.
    pub fn consume_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if n <= self.buffer.len() {
            let (data, buffer) = self.buffer.split_at(n);
            self.buffer = buffer;
            Ok(data)
        } else {
            Err(DecodeError::UnexpectedEof(n - self.buffer.len()))
        }
    }

    /// Consumes `N` bytes into an array.
    pub fn consume<const N: usize>(&mut self) -> Result<[u8; N]> {
        let data = self.consume_slice(N)?;
        Ok(<[u8; N]>::try_from(data).unwrap())
    }

    /// Reads an unsigned byte from the stream.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.consume::<1>().map(|[x]| x)
    }

    /// Reads an unsigned short from the stream (big-endian).
    pub fn read_u16(&mut self) -> Result<u16> {
        self.consume().map(u16::from_be_bytes)
    }

    /// Reads a signed long from the stream.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.consume().map(i64::from_be_bytes)
    }

    /// Reads an unsigned 128-bit value (e.g. a UUID) from the stream.
    pub fn read_u128(&mut self) -> Result<u128> {
        self.consume().map(u128::from_be_bytes)
    }

    /// Reads a boolean from the stream.
    pub fn read_bool(&mut self) -> Result<bool> {
        let x = self.read_u8()?;
        match x {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidBool(x)),
        }
    }

    /// Reads a VarInt from the stream.
    ///
    /// Fails with [`DecodeError::MalformedVarInt`] if more than 5 byte
    /// groups are consumed without a terminating group, guarding against
    /// unbounded reads from hostile input.
    pub fn read_var_int(&mut self) -> Result<i32> {
        let mut num_read = 0;
        let mut result = 0;

        loop {
            let read = self.read_u8()?;
            let value = i32::from(read & 0b0111_1111);
            result |= value.overflowing_shl(7 * num_read).0;

            num_read += 1;

            if num_read > 5 {
                return Err(DecodeError::MalformedVarInt);
            }
            if read & 0b1000_0000 == 0 {
                break;
            }
        }
        Ok(result)
    }

    /// Reads a length-bounded string from the stream.
    ///
    /// The declared byte length is validated against `max` before any
    /// payload bytes are consumed, so a forged length prefix cannot cause
    /// a large allocation.
    pub fn read_string(&mut self, max: usize) -> Result<&'a str> {
        let length = usize::try_from(self.read_var_int()?)?;

        if length > max {
            return Err(DecodeError::StringTooLong { length, max });
        }

        let bytes = std::str::from_utf8(self.consume_slice(length)?)?;
        Ok(bytes)
    }

    /// Reads an IP address in the override wire form:
    /// a family flag followed by 4 or 16 raw octets.
    pub fn read_ip_addr(&mut self) -> Result<IpAddr> {
        let is_ipv6 = self.read_bool()?;
        if is_ipv6 {
            self.consume::<16>().map(IpAddr::from)
        } else {
            self.consume::<4>().map(IpAddr::from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_int_single_byte() {
        let mut decoder = Decoder::new(&[0x07]);
        assert_eq!(decoder.read_var_int().unwrap(), 7);
        assert!(decoder.is_finished());
    }

    #[test]
    fn var_int_multi_byte() {
        // 300 = 0b10101100 0b00000010
        let mut decoder = Decoder::new(&[0xAC, 0x02]);
        assert_eq!(decoder.read_var_int().unwrap(), 300);
    }

    #[test]
    fn var_int_negative() {
        let mut decoder = Decoder::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(decoder.read_var_int().unwrap(), -1);
    }

    #[test]
    fn var_int_too_many_groups() {
        let mut decoder = Decoder::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(
            decoder.read_var_int(),
            Err(DecodeError::MalformedVarInt)
        ));
    }

    #[test]
    fn string_over_declared_max() {
        // Declared length 300 with max 255: must fail before consuming
        // any payload bytes.
        let mut decoder = Decoder::new(&[0xAC, 0x02, b'a', b'b']);
        assert!(matches!(
            decoder.read_string(255),
            Err(DecodeError::StringTooLong {
                length: 300,
                max: 255
            })
        ));
        assert_eq!(decoder.remaining(), 2);
    }

    #[test]
    fn short_buffer_is_eof() {
        let mut decoder = Decoder::new(&[0x00]);
        assert!(matches!(
            decoder.read_u16(),
            Err(DecodeError::UnexpectedEof(1))
        ));
    }

    #[test]
    fn bool_rejects_junk() {
        let mut decoder = Decoder::new(&[0x02]);
        assert!(matches!(
            decoder.read_bool(),
            Err(DecodeError::InvalidBool(2))
        ));
    }
}
