//! SharedKeyLite signing for the Table service.
//!
//! String-to-sign is `{x-ms-date}\n/{account}{url-path}`; the signature is
//! the base64 HMAC-SHA256 of it under the decoded account key.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Result, TableStorageError};

type HmacSha256 = Hmac<Sha256>;

/// Formats a timestamp the way `x-ms-date` expects (RFC 1123, GMT).
pub(crate) fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Builds the `Authorization` header value for a request to `path`.
pub(crate) fn shared_key_lite(account: &str, key: &[u8], date: &str, path: &str) -> Result<String> {
    let string_to_sign = format!("{date}\n/{account}{path}");
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| TableStorageError::configuration(format!("unusable account key: {err}")))?;
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());
    Ok(format!("SharedKeyLite {account}:{signature}"))
}
