//! The dvx wire envelope: `version.typePrefix.data`.
//!
//! Every protocol output is wrapped into this three-field string so that
//! ciphertexts, signatures, MAC tags and TOTP selector ids stay bound to
//! the primitive suite that produced them. Unknown versions and type
//! prefixes are refused at decode time, which is what allows a future
//! suite to be added without ambiguity.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{DvxError, Result};

/// Version tag of the current primitive suite. It is the lower-cased name
/// of the suite implementation.
pub const VERSION: &str = "dv1";

/// Versions this codec accepts on decode. Decrypt/verify paths dispatch on
/// the decoded version, so older suites stay readable after an upgrade.
const KNOWN_VERSIONS: &[&str] = &[VERSION];

/// The kind of payload carried inside an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypePrefix {
    /// Encrypted content.
    Encrypted,
    /// A signature.
    Signed,
    /// A MAC tag.
    Tagged,
    /// A TOTP selector id.
    Totp,
}

impl TypePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypePrefix::Encrypted => "enc",
            TypePrefix::Signed => "sig",
            TypePrefix::Tagged => "tag",
            TypePrefix::Totp => "totp",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "enc" => Some(TypePrefix::Encrypted),
            "sig" => Some(TypePrefix::Signed),
            "tag" => Some(TypePrefix::Tagged),
            "totp" => Some(TypePrefix::Totp),
            _ => None,
        }
    }
}

impl std::fmt::Display for TypePrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a type prefix and its associated data under the current version.
pub fn encode(type_prefix: TypePrefix, data: &[u8]) -> String {
    format!(
        "{}.{}.{}",
        VERSION,
        type_prefix,
        URL_SAFE_NO_PAD.encode(data)
    )
}

/// Decode an envelope string into its version, type prefix and data.
pub fn decode(s: &str) -> Result<(String, TypePrefix, Vec<u8>)> {
    let parts: Vec<&str> = s.splitn(3, '.').collect();
    if parts.len() != 3 {
        return Err(DvxError::Format("3 parts expected".into()));
    }

    let version = parts[0];
    if !KNOWN_VERSIONS.contains(&version) {
        return Err(DvxError::Format(format!("unknown version: {:?}", version)));
    }

    let type_prefix = TypePrefix::parse(parts[1])
        .ok_or_else(|| DvxError::Format(format!("unknown typePrefix: {:?}", parts[1])))?;

    let data = URL_SAFE_NO_PAD
        .decode(parts[2])
        .map_err(|e| DvxError::Format(format!("data not raw base64url: {}", e)))?;

    Ok((version.to_string(), type_prefix, data))
}

/// Like [`decode`], but additionally verifies that the decoded type prefix
/// matches `expected`. On a match the prefix is dropped from the result.
pub fn decode_expect(s: &str, expected: TypePrefix) -> Result<(String, Vec<u8>)> {
    let (version, type_prefix, data) = decode(s)?;
    if type_prefix != expected {
        return Err(DvxError::Format("incorrect typePrefix".into()));
    }
    Ok((version, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_prefixes() {
        for prefix in [
            TypePrefix::Encrypted,
            TypePrefix::Signed,
            TypePrefix::Tagged,
            TypePrefix::Totp,
        ] {
            let encoded = encode(prefix, b"payload");
            let (version, decoded_prefix, data) = decode(&encoded).unwrap();
            assert_eq!(version, VERSION);
            assert_eq!(decoded_prefix, prefix);
            assert_eq!(data, b"payload");
        }
    }

    #[test]
    fn test_encode_shape() {
        assert_eq!(encode(TypePrefix::Encrypted, b""), "dv1.enc.");
        assert_eq!(encode(TypePrefix::Totp, b"totp"), "dv1.totp.dG90cA");
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        assert!(decode("dv2.enc.AAAA").is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_prefix() {
        assert!(decode("dv1.xxx.AAAA").is_err());
    }

    #[test]
    fn test_decode_rejects_missing_parts() {
        assert!(decode("dv1.enc").is_err());
        assert!(decode("dv1").is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(decode("dv1.enc.!!!").is_err());
    }

    #[test]
    fn test_decode_expect() {
        let encoded = encode(TypePrefix::Tagged, b"tag-data");
        let (version, data) = decode_expect(&encoded, TypePrefix::Tagged).unwrap();
        assert_eq!(version, "dv1");
        assert_eq!(data, b"tag-data");

        assert!(decode_expect(&encoded, TypePrefix::Encrypted).is_err());
    }
}
