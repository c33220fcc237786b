//! RFC 6238 TOTP generation and verification, plus parsing/formatting of
//! Google Authenticator key-uris
//! (https://github.com/google/google-authenticator/wiki/Key-Uri-Format).

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use url::Url;

use crate::error::{DvxError, Result};

const URI_SCHEME: &str = "otpauth";
const URI_HOST: &str = "totp";

/// Path-segment escaping. Unreserved characters and the reserved set a
/// segment may carry literally (`$ & + : = @`) stay as-is; `/ ; , ?` and
/// everything else is percent-encoded. This matches the escaping the
/// key-uri wiki format expects for issuer and account name.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b':')
    .remove(b'=')
    .remove(b'@');

fn path_escape(s: &str) -> String {
    utf8_percent_encode(s, PATH_SEGMENT).to_string()
}

fn path_unescape(s: &str) -> Result<String> {
    Ok(percent_decode_str(s)
        .decode_utf8()
        .map_err(|e| DvxError::Format(format!("totp: invalid percent-encoding: {}", e)))?
        .into_owned())
}

/// Hash algorithm of a TOTP credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha1 => "SHA1",
            Algorithm::Sha256 => "SHA256",
            Algorithm::Sha512 => "SHA512",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "SHA1" => Some(Algorithm::Sha1),
            "SHA256" => Some(Algorithm::Sha256),
            "SHA512" => Some(Algorithm::Sha512),
            _ => None,
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A TOTP credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Totp {
    pub secret: Vec<u8>,
    pub algorithm: Algorithm,
    pub digits: u32,
    pub period: u64,
    pub issuer: String,
    pub account_name: String,
}

impl Totp {
    /// Parse a key-uri of the form
    /// `otpauth://totp/<issuer>:<account>?secret=...&issuer=...&...`.
    pub fn parse_from_uri(uri: &str) -> Result<Totp> {
        let u = Url::parse(uri)
            .map_err(|e| DvxError::Format(format!("totp: failed to parse uri: {}", e)))?;

        if u.scheme() != URI_SCHEME {
            return Err(DvxError::Format(format!(
                "totp: uri scheme must be {:?} and not {:?}",
                URI_SCHEME,
                u.scheme()
            )));
        }
        if u.host_str() != Some(URI_HOST) {
            return Err(DvxError::Format(format!(
                "totp: uri host must be {:?}",
                URI_HOST
            )));
        }

        let mut t = Totp {
            secret: Vec::new(),
            algorithm: Algorithm::Sha1, // default
            digits: 6,                  // default
            period: 30,                 // default
            issuer: String::new(),
            account_name: String::new(),
        };

        let path = path_unescape(u.path())?;
        let label = path.strip_prefix('/').unwrap_or(&path);

        if !label.contains(':') {
            t.account_name = label.to_string();
        } else {
            let parts: Vec<&str> = label.split(':').collect();
            if parts.len() != 2 {
                return Err(DvxError::Format(format!(
                    "totp: expected 2 label split parts. Got {}",
                    parts.len()
                )));
            }
            t.issuer = parts[0].to_string();
            t.account_name = parts[1].to_string();
        }

        let pairs: Vec<(String, String)> = u
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        for (key, value) in &pairs {
            if pairs.iter().filter(|(k, _)| k == key).count() > 1 {
                return Err(DvxError::Format(format!(
                    "totp: uri query key {:?} cannot be provided multiple times",
                    key
                )));
            }

            match key.as_str() {
                "secret" => {
                    t.secret = base32::decode(base32::Alphabet::RFC4648 { padding: false }, value)
                        .ok_or_else(|| {
                            DvxError::Format(
                                "totp: unable to decode secret base32 with no padding".into(),
                            )
                        })?;
                }
                "issuer" => {
                    // Generic URL parsers query-unescape, but the key-uri
                    // format wants path-unescape for this value. Re-read it
                    // from the raw query.
                    let raw_query = u.query().unwrap_or("");
                    if let Some(start) = raw_query.find("issuer=") {
                        let mut raw = &raw_query[start + "issuer=".len()..];
                        if let Some(amp) = raw.find('&') {
                            raw = &raw[..amp];
                        }

                        let issuer = path_unescape(raw)?;
                        if issuer != t.issuer {
                            return Err(DvxError::Format(format!(
                                "totp: issuer query value {:?} must not differ from value specified in label {:?}",
                                issuer, t.issuer
                            )));
                        }
                    }
                }
                "algorithm" => {
                    t.algorithm = Algorithm::parse(value)
                        .ok_or_else(|| DvxError::Format("totp: invalid algorithm selected".into()))?;
                }
                "digits" => {
                    t.digits = value.parse().map_err(|e| {
                        DvxError::Format(format!(
                            "totp: unable to convert {:?} to digits integer: {}",
                            value, e
                        ))
                    })?;
                }
                "period" => {
                    t.period = value.parse().map_err(|e| {
                        DvxError::Format(format!(
                            "totp: unable to convert {:?} to period integer: {}",
                            value, e
                        ))
                    })?;
                }
                _ => {
                    return Err(DvxError::Format(format!(
                        "totp: uri has unknown query key {:?}",
                        key
                    )));
                }
            }
        }

        if t.secret.is_empty() {
            return Err(DvxError::Format(
                "totp: secret is required and cannot be omitted".into(),
            ));
        }

        Ok(t)
    }

    /// Format as a key-uri. Query parameters are emitted in the canonical
    /// order `secret, issuer, algorithm, digits, period`.
    pub fn uri(&self) -> String {
        let issuer = path_escape(&self.issuer);

        let mut out = String::new();
        out.push_str(URI_SCHEME);
        out.push_str("://");
        out.push_str(URI_HOST);
        out.push('/');
        out.push_str(&issuer);
        out.push(':');
        out.push_str(&path_escape(&self.account_name));
        out.push_str("?secret=");
        out.push_str(&base32::encode(
            base32::Alphabet::RFC4648 { padding: false },
            &self.secret,
        ));
        out.push_str("&issuer=");
        out.push_str(&issuer);
        out.push_str("&algorithm=");
        out.push_str(self.algorithm.as_str());
        out.push_str("&digits=");
        out.push_str(&self.digits.to_string());
        out.push_str("&period=");
        out.push_str(&self.period.to_string());

        out
    }

    /// Generate the code for the current time window.
    pub fn generate(&self) -> Result<String> {
        if self.secret.is_empty() {
            return Err(DvxError::Config("totp: secret is empty".into()));
        }
        if self.period != 30 {
            return Err(DvxError::Config("totp: invalid period selection".into()));
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DvxError::Crypto(format!("totp: system clock error: {}", e)))?;
        let counter = now.as_secs() / self.period;

        generate_otp(&self.secret, self.algorithm, self.digits, counter)
    }

    /// Verify a candidate code against the current time window in constant
    /// time.
    pub fn verify(&self, code: &str) -> Result<bool> {
        let expected = match self.generate() {
            Ok(c) => c,
            Err(_) => return Ok(false),
        };

        Ok(bool::from(expected.as_bytes().ct_eq(code.as_bytes())))
    }
}

/// RFC 4226 dynamic truncation over an HMAC of the big-endian counter.
fn generate_otp(secret: &[u8], algorithm: Algorithm, digits: u32, counter: u64) -> Result<String> {
    if digits != 6 && digits != 8 {
        return Err(DvxError::Config("totp: invalid digits selection".into()));
    }

    let counter_bytes = counter.to_be_bytes();
    let h = match algorithm {
        Algorithm::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret)
                .map_err(|e| DvxError::Crypto(format!("totp: hmac construction: {}", e)))?;
            mac.update(&counter_bytes);
            mac.finalize().into_bytes().to_vec()
        }
        Algorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                .map_err(|e| DvxError::Crypto(format!("totp: hmac construction: {}", e)))?;
            mac.update(&counter_bytes);
            mac.finalize().into_bytes().to_vec()
        }
        Algorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(secret)
                .map_err(|e| DvxError::Crypto(format!("totp: hmac construction: {}", e)))?;
            mac.update(&counter_bytes);
            mac.finalize().into_bytes().to_vec()
        }
    };

    let offset = (h[h.len() - 1] & 0x0F) as usize;
    let mut chunk = [0u8; 4];
    chunk.copy_from_slice(&h[offset..offset + 4]);
    chunk[0] &= 0x7F;
    let decimal = u32::from_be_bytes(chunk);

    let otp = decimal % 10u32.pow(digits);
    Ok(format!("{:0width$}", otp, width = digits as usize))
}
