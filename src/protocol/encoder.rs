use std::net::IpAddr;

/// A raw encoder for a Minecraft bitstream.
#[derive(Debug)]
pub struct Encoder<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder that will append to the provided
    /// byte buffer.
    ///
    /// Any existing contents of `buffer` are left untouched.
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self { buffer }
    }

    /// Writes an unsigned byte to the stream.
    pub fn write_u8(&mut self, x: u8) {
        self.buffer.push(x);
    }

    /// Writes an unsigned short to the stream (big-endian).
    pub fn write_u16(&mut self, x: u16) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes a signed long to the stream.
    pub fn write_i64(&mut self, x: i64) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes an unsigned 128-bit value (e.g. a UUID) to the stream.
    pub fn write_u128(&mut self, x: u128) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes a boolean to the stream.
    pub fn write_bool(&mut self, x: bool) {
        self.write_u8(if x { 0x01 } else { 0x00 });
    }

    /// Writes a series of bytes to the stream. Does not write
    /// any sort of length prefix.
    pub fn write_slice(&mut self, slice: &[u8]) {
        self.buffer.extend_from_slice(slice);
    }

    /// Writes a VarInt to the stream. Returns the number of bytes written.
    pub fn write_var_int(&mut self, x: i32) -> usize {
        let mut x = x as u32;
        let mut bytes_written = 0;
        loop {
            let mut temp = (x & 0b0111_1111) as u8;
            x >>= 7;
            if x != 0 {
                temp |= 0b1000_0000;
            }

            self.buffer.push(temp);
            bytes_written += 1;

            if x == 0 {
                break bytes_written;
            }
        }
    }

    /// Writes a varint-prefixed string to the stream.
    pub fn write_string(&mut self, x: &str) {
        self.write_var_int(x.len().try_into().unwrap_or(i32::MAX));
        self.buffer.extend_from_slice(x.as_bytes());
    }

    /// Writes an IP address in the override wire form:
    /// a family flag followed by the raw octets.
    pub fn write_ip_addr(&mut self, addr: IpAddr) {
        match addr {
            IpAddr::V4(v4) => {
                self.write_bool(false);
                self.write_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                self.write_bool(true);
                self.write_slice(&v6.octets());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Decoder;

    #[test]
    fn var_int_round_trip() {
        for x in [0, 1, 127, 128, 300, 25565, i32::MAX, -1, i32::MIN] {
            let mut buf = Vec::new();
            Encoder::new(&mut buf).write_var_int(x);
            assert_eq!(Decoder::new(&buf).read_var_int().unwrap(), x);
        }
    }

    #[test]
    fn string_round_trip() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_string("mc.example.org");
        assert_eq!(
            Decoder::new(&buf).read_string(255).unwrap(),
            "mc.example.org"
        );
    }

    #[test]
    fn ip_addr_round_trip() {
        for addr in ["203.0.113.5", "2001:db8::1"] {
            let addr: std::net::IpAddr = addr.parse().unwrap();
            let mut buf = Vec::new();
            Encoder::new(&mut buf).write_ip_addr(addr);
            assert_eq!(Decoder::new(&buf).read_ip_addr().unwrap(), addr);
        }
    }
}
