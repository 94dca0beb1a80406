//! TOTP (RFC 6238) code generation and `otpauth://` URI handling.
//!
//! Stateless: consumes an already-decrypted base32 secret and the current
//! time. Safe to call concurrently, no shared mutable state.

use self::OtpError::*;
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::str::FromStr;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Validation and parsing errors. Raised synchronously; callers must
/// validate parameters before attempting generation.
#[derive(Error, Debug)]
pub enum OtpError {
    #[error("Invalid base32 secret: {0}")]
    InvalidSecret(String),

    #[error("TOTP period must be greater than zero")]
    InvalidPeriod,

    #[error("TOTP digits must be between 6 and 8, got {0}")]
    InvalidDigits(u8),

    #[error("Unsupported TOTP algorithm '{0}'. Use sha1, sha256, or sha512")]
    UnsupportedAlgorithm(String),

    #[error("Invalid otpauth URI: {0}")]
    InvalidUri(String),
}

/// Result type for OTP operations
pub type Result<T> = std::result::Result<T, OtpError>;

/// Supported TOTP HMAC algorithms.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TotpAlgorithm {
    #[default]
    #[serde(rename = "sha1")]
    Sha1,
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    Sha512,
}

impl TotpAlgorithm {
    /// Canonical uppercase form used in otpauth URIs.
    pub fn as_uri_value(self) -> &'static str {
        match self {
            TotpAlgorithm::Sha1 => "SHA1",
            TotpAlgorithm::Sha256 => "SHA256",
            TotpAlgorithm::Sha512 => "SHA512",
        }
    }
}

impl std::fmt::Display for TotpAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TotpAlgorithm::Sha1 => write!(f, "sha1"),
            TotpAlgorithm::Sha256 => write!(f, "sha256"),
            TotpAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for TotpAlgorithm {
    type Err = OtpError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(TotpAlgorithm::Sha1),
            "sha256" => Ok(TotpAlgorithm::Sha256),
            "sha512" => Ok(TotpAlgorithm::Sha512),
            other => Err(UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Validated TOTP generation parameters. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OtpParameters {
    secret_base32: String,
    algorithm: TotpAlgorithm,
    digits: u8,
    period: u32,
}

impl OtpParameters {
    /// Validate and freeze a parameter set.
    pub fn new(
        secret_base32: &str,
        algorithm: TotpAlgorithm,
        digits: u8,
        period: u32,
    ) -> Result<Self> {
        if !(6..=8).contains(&digits) {
            return Err(InvalidDigits(digits));
        }
        if period == 0 {
            return Err(InvalidPeriod);
        }
        // Reject bad secrets up front rather than at generation time
        decode_secret(secret_base32)?;
        Ok(Self {
            secret_base32: normalize_secret(secret_base32),
            algorithm,
            digits,
            period,
        })
    }

    pub fn secret_base32(&self) -> &str {
        &self.secret_base32
    }

    pub fn algorithm(&self) -> TotpAlgorithm {
        self.algorithm
    }

    pub fn digits(&self) -> u8 {
        self.digits
    }

    pub fn period(&self) -> u32 {
        self.period
    }
}

/// A generated code together with its remaining validity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotpCode {
    pub code: String,
    pub seconds_remaining: u32,
}

/// Parameters plus provisioning metadata parsed from an `otpauth://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOtpUri {
    pub params: OtpParameters,
    pub issuer: Option<String>,
    pub account: Option<String>,
}

/// Decode a base32 secret.
///
/// Strict RFC 4648 alphabet, case-insensitive, trailing `=` padding
/// stripped. Any other character is an [`OtpError::InvalidSecret`].
pub fn decode_secret(secret_base32: &str) -> Result<Vec<u8>> {
    let normalized = normalize_secret(secret_base32);
    if normalized.is_empty() {
        return Err(InvalidSecret("secret cannot be empty".to_string()));
    }

    let decoded = BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| InvalidSecret("not valid base32".to_string()))?;

    if decoded.is_empty() {
        return Err(InvalidSecret("secret decodes to empty bytes".to_string()));
    }
    Ok(decoded)
}

fn normalize_secret(secret_base32: &str) -> String {
    secret_base32
        .trim_end_matches('=')
        .to_ascii_uppercase()
}

/// Generate the TOTP code for the given Unix timestamp.
///
/// RFC 6238: counter = floor(t / period), HMAC over the 8-byte big-endian
/// counter, RFC 4226 dynamic truncation, mod 10^digits, zero-padded.
pub fn generate_code(params: &OtpParameters, at_time: i64) -> Result<String> {
    let secret = decode_secret(&params.secret_base32)?;
    let counter = (at_time.max(0) as u64) / params.period as u64;
    let counter_bytes = counter.to_be_bytes();

    let digest = match params.algorithm {
        TotpAlgorithm::Sha1 => {
            let mut mac = HmacSha1::new_from_slice(&secret)
                .map_err(|_| InvalidSecret("unusable HMAC key".to_string()))?;
            mac.update(&counter_bytes);
            mac.finalize().into_bytes().to_vec()
        }
        TotpAlgorithm::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(&secret)
                .map_err(|_| InvalidSecret("unusable HMAC key".to_string()))?;
            mac.update(&counter_bytes);
            mac.finalize().into_bytes().to_vec()
        }
        TotpAlgorithm::Sha512 => {
            let mut mac = HmacSha512::new_from_slice(&secret)
                .map_err(|_| InvalidSecret("unusable HMAC key".to_string()))?;
            mac.update(&counter_bytes);
            mac.finalize().into_bytes().to_vec()
        }
    };

    // Dynamic truncation: low nibble of the last byte selects a 4-byte
    // window, whose top bit is masked off to form a 31-bit integer.
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    let modulo = 10u32.pow(params.digits as u32);
    let code = binary % modulo;
    Ok(format!("{:0width$}", code, width = params.digits as usize))
}

/// Seconds until the current code rotates: `period - (now mod period)`.
/// At a window boundary the fresh window's full period is returned.
pub fn seconds_remaining(period: u32, now: i64) -> u32 {
    if period == 0 {
        return 0;
    }
    let elapsed = now.rem_euclid(period as i64) as u32;
    period - elapsed
}

/// Current code and its remaining validity.
pub fn current_code(params: &OtpParameters, now: i64) -> Result<TotpCode> {
    Ok(TotpCode {
        code: generate_code(params, now)?,
        seconds_remaining: seconds_remaining(params.period, now),
    })
}

/// Parse a standard `otpauth://totp/...` provisioning URI.
///
/// The label splits into issuer/account on the first colon; `algorithm`,
/// `digits`, and `period` default to SHA1/6/30 when absent.
pub fn parse_otpauth_uri(uri: &str) -> Result<ParsedOtpUri> {
    let trimmed = uri.trim();
    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| InvalidUri("must start with otpauth://".to_string()))?;
    if !scheme.eq_ignore_ascii_case("otpauth") {
        return Err(InvalidUri("must start with otpauth://".to_string()));
    }

    let (kind, remainder) = rest
        .split_once('/')
        .ok_or_else(|| InvalidUri("missing label".to_string()))?;
    if !kind.eq_ignore_ascii_case("totp") {
        return Err(InvalidUri("only totp URIs are supported".to_string()));
    }

    let (label_raw, query_raw) = match remainder.split_once('?') {
        Some((label, query)) => (label, query),
        None => (remainder, ""),
    };

    let label = percent_decode(label_raw)?;
    let mut issuer_from_label = None;
    let mut account = None;
    if let Some((issuer, acct)) = label.split_once(':') {
        let issuer = issuer.trim();
        let acct = acct.trim();
        if !issuer.is_empty() {
            issuer_from_label = Some(issuer.to_string());
        }
        if !acct.is_empty() {
            account = Some(acct.to_string());
        }
    } else {
        let acct = label.trim();
        if !acct.is_empty() {
            account = Some(acct.to_string());
        }
    }

    let mut secret_base32 = None;
    let mut issuer_from_query = None;
    let mut algorithm = TotpAlgorithm::Sha1;
    let mut digits: u8 = 6;
    let mut period: u32 = 30;

    for pair in query_raw.split('&').filter(|part| !part.is_empty()) {
        let (key_raw, value_raw) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(key_raw)?.to_ascii_lowercase();
        let value = percent_decode(value_raw)?;

        match key.as_str() {
            "secret" => {
                if !value.trim().is_empty() {
                    secret_base32 = Some(value);
                }
            }
            "issuer" => {
                if !value.trim().is_empty() {
                    issuer_from_query = Some(value);
                }
            }
            "algorithm" => {
                if !value.trim().is_empty() {
                    algorithm = value.parse::<TotpAlgorithm>()?;
                }
            }
            "digits" => {
                if !value.trim().is_empty() {
                    digits = value
                        .parse::<u8>()
                        .map_err(|_| InvalidUri("digits must be numeric".to_string()))?;
                }
            }
            "period" => {
                if !value.trim().is_empty() {
                    period = value
                        .parse::<u32>()
                        .map_err(|_| InvalidUri("period must be numeric".to_string()))?;
                }
            }
            _ => {}
        }
    }

    let secret = secret_base32
        .ok_or_else(|| InvalidUri("missing secret parameter".to_string()))?;

    if let (Some(label_issuer), Some(query_issuer)) = (&issuer_from_label, &issuer_from_query) {
        if !label_issuer.eq_ignore_ascii_case(query_issuer) {
            return Err(InvalidUri(
                "issuer in label does not match issuer query parameter".to_string(),
            ));
        }
    }

    Ok(ParsedOtpUri {
        params: OtpParameters::new(&secret, algorithm, digits, period)?,
        issuer: issuer_from_query.or(issuer_from_label),
        account,
    })
}

/// Build a provisioning URI from validated parameters, the inverse of
/// [`parse_otpauth_uri`].
pub fn build_otpauth_uri(
    params: &OtpParameters,
    issuer: Option<&str>,
    account: Option<&str>,
) -> String {
    let label = match (issuer, account) {
        (Some(i), Some(a)) => format!("{}:{}", percent_encode(i), percent_encode(a)),
        (Some(i), None) => percent_encode(i),
        (None, Some(a)) => percent_encode(a),
        (None, None) => String::new(),
    };

    let mut uri = format!(
        "otpauth://totp/{}?secret={}&algorithm={}&digits={}&period={}",
        label,
        params.secret_base32,
        params.algorithm.as_uri_value(),
        params.digits,
        params.period,
    );
    if let Some(i) = issuer {
        uri.push_str("&issuer=");
        uri.push_str(&percent_encode(i));
    }
    uri
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn percent_decode(input: &str) -> Result<String> {
    fn from_hex(byte: u8) -> Option<u8> {
        match byte {
            b'0'..=b'9' => Some(byte - b'0'),
            b'a'..=b'f' => Some(byte - b'a' + 10),
            b'A'..=b'F' => Some(byte - b'A' + 10),
            _ => None,
        }
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len() {
                    return Err(InvalidUri("invalid percent encoding".to_string()));
                }
                let hi = from_hex(bytes[i + 1])
                    .ok_or_else(|| InvalidUri("invalid percent encoding".to_string()))?;
                let lo = from_hex(bytes[i + 2])
                    .ok_or_else(|| InvalidUri("invalid percent encoding".to_string()))?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| InvalidUri("invalid UTF-8".to_string()))
}
