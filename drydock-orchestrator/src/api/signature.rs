//! Push signature verification
//!
//! Git hosts sign the raw request body with HMAC-SHA256 over a shared secret
//! and send it as `sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,
    #[error("signature is not of the form sha256=<hex>")]
    Malformed,
    #[error("signature does not match the body")]
    Mismatch,
}

/// Checks `signature` against the body and secret
pub fn verify(signature: Option<&str>, secret: &str, body: &[u8]) -> Result<(), SignatureError> {
    let signature = signature.ok_or(SignatureError::Missing)?;
    let hex_part = signature
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Malformed)?;
    let provided = hex::decode(hex_part).map_err(|_| SignatureError::Malformed)?;

    // HMAC accepts keys of any length.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
