//! Keyed-hash signing and constant-time verification for the
//! secret-bearing forwarding variants.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of an HMAC-SHA256 signature.
pub const SIGNATURE_LEN: usize = 32;

/// The shared secret, held as an opaque byte sequence for the process
/// lifetime. The `Debug` impl redacts the content so the secret cannot
/// leak through logs or error messages.
#[derive(Clone)]
pub struct ForwardingSecret(Vec<u8>);

impl ForwardingSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.0).expect("hmac accepts any key length")
    }
}

impl std::fmt::Debug for ForwardingSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ForwardingSecret(..)")
    }
}

impl From<&str> for ForwardingSecret {
    fn from(secret: &str) -> Self {
        Self::new(secret.as_bytes().to_vec())
    }
}

/// Computes the HMAC-SHA256 signature of `message` under `secret`.
pub fn sign(secret: &ForwardingSecret, message: &[u8]) -> [u8; SIGNATURE_LEN] {
    let mut mac = secret.mac();
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Verifies `signature` against a freshly computed signature of `message`.
///
/// The comparison runs in constant time regardless of where a mismatch
/// occurs, so an attacker probing the backend learns nothing about
/// partial matches.
pub fn verify(secret: &ForwardingSecret, message: &[u8], signature: &[u8]) -> bool {
    let mut mac = secret.mac();
    mac.update(message);
    mac.verify_slice(signature).is_ok()
}
