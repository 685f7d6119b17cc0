use siphasher::sip::SipHasher13;

pub const KEY_SIZE: usize = 8;

/// Digest of the application key carried by every connect request. Peers built with different
/// keys refuse each other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectKey {
    digest: [u8; KEY_SIZE],
}

impl ConnectKey {
    pub fn new(key: &str) -> Self {
        use core::hash::Hasher;

        let mut hasher = SipHasher13::new_with_key(&[0u8; 16]);
        hasher.write(key.as_bytes());

        Self {
            digest: hasher.finish().to_le_bytes(),
        }
    }

    pub fn digest(&self) -> &[u8; KEY_SIZE] {
        &self.digest
    }

    /// Checks the digest that follows the command header of a connect request.
    pub fn validate(&self, digest: &[u8]) -> bool {
        digest == &self.digest[..]
    }
}
