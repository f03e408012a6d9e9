use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Replays older than this are rejected under the timestamped scheme.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// How a supplier signs its callbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    /// `HMAC(secret, body)` as hex, optionally prefixed with `sha256=`.
    #[default]
    Hex,
    /// `t=<unix>,v1=<hex>` over `"{t}.{body}"`.
    Timestamped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing signature header")]
    Missing,
    #[error("Malformed signature header")]
    Malformed,
    #[error("Signature mismatch")]
    Mismatch,
    #[error("Signature timestamp outside tolerance")]
    Expired,
    #[error("Invalid signing secret")]
    InvalidKey,
}

pub fn verify_signature(
    scheme: SignatureScheme,
    secret: &str,
    header: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(SignatureError::Missing)?;

    match scheme {
        SignatureScheme::Hex => {
            let signature = header.strip_prefix("sha256=").unwrap_or(header);
            verify_mac(secret, &[body], signature)
        }
        SignatureScheme::Timestamped => {
            let mut timestamp = "";
            let mut signature = "";
            for part in header.split(',') {
                let part = part.trim();
                if let Some(t) = part.strip_prefix("t=") {
                    timestamp = t;
                } else if let Some(v) = part.strip_prefix("v1=") {
                    signature = v;
                }
            }
            if timestamp.is_empty() || signature.is_empty() {
                return Err(SignatureError::Malformed);
            }

            verify_mac(secret, &[timestamp.as_bytes(), b".", body], signature)?;

            let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
            if (now.timestamp() - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
                return Err(SignatureError::Expired);
            }
            Ok(())
        }
    }
}

fn verify_mac(secret: &str, parts: &[&[u8]], signature_hex: &str) -> Result<(), SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    for part in parts {
        mac.update(part);
    }
    let expected = hex::decode(signature_hex).map_err(|_| SignatureError::Malformed)?;
    // Constant-time comparison.
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Hex HMAC of `body`, as a supplier would send it.
pub fn sign_hex(secret: &str, body: &[u8]) -> String {
    sign(secret, &[body])
}

/// `t=..,v1=..` header for `body` at `timestamp`.
pub fn sign_timestamped(secret: &str, body: &[u8], timestamp: i64) -> String {
    let t = timestamp.to_string();
    format!("t={t},v1={}", sign(secret, &[t.as_bytes(), b".", body]))
}

fn sign(secret: &str, parts: &[&[u8]]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    for part in parts {
        mac.update(part);
    }
    hex::encode(mac.finalize().into_bytes())
}
