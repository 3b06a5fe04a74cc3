//! OAuth 1.0a request signing for the write API.
//!
//! Only query parameters take part in the signature. JSON bodies are never
//! signed, so callers must not pass body fields here.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::Credentials;

type HmacSha1 = Hmac<Sha1>;

pub struct RequestSigner {
    credentials: Credentials,
}

impl RequestSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Build the `Authorization` header value with a fresh nonce and the
    /// current time.
    pub fn sign(&self, method: &str, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        self.sign_with(method, url, query, &nonce, timestamp)
    }

    pub fn sign_with(
        &self,
        method: &str,
        url: &str,
        query: &[(&str, &str)],
        nonce: &str,
        timestamp: u64,
    ) -> Result<String> {
        let timestamp = timestamp.to_string();
        let mut oauth_params: Vec<(&str, &str)> = vec![
            ("oauth_consumer_key", self.credentials.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_token", self.credentials.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let base_string = signature_base_string(method, url, query, &oauth_params);
        let signing_key = format!(
            "{}&{}",
            percent_encode(&self.credentials.consumer_secret),
            percent_encode(&self.credentials.access_secret)
        );

        let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes())
            .map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
        mac.update(base_string.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        oauth_params.push(("oauth_signature", signature.as_str()));
        oauth_params.sort_by(|a, b| a.0.cmp(b.0));

        let header = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("OAuth {}", header))
    }
}

/// `METHOD&encode(base_url)&encode(sorted params)`.
fn signature_base_string(
    method: &str,
    url: &str,
    query: &[(&str, &str)],
    oauth_params: &[(&str, &str)],
) -> String {
    let mut encoded: Vec<(String, String)> = query
        .iter()
        .chain(oauth_params.iter())
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let base_url = url.split('?').next().unwrap_or(url);
    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(base_url),
        percent_encode(&param_string)
    )
}

/// Percent-encode per RFC 3986: only unreserved characters pass through.
pub fn percent_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
