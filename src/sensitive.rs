//! Wrapper for secret byte buffers that are automatically zeroized on drop.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A variable-length secret value (root keys, derived keys) that is
/// overwritten with zeros when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBytes")
            .field("len", &self.0.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_bytes() {
        let v = SecretBytes::new(vec![1, 2, 3]);
        assert_eq!(v.len(), 3);
        assert!(!v.is_empty());
        assert_eq!(v.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_debug_is_redacted() {
        let v = SecretBytes::new(vec![0xAA; 32]);
        let s = format!("{:?}", v);
        assert!(!s.contains("170"));
        assert!(s.contains("REDACTED"));
    }
}
