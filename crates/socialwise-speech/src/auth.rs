//! Per-connection request signing for the speech WebSocket endpoints.
//!
//! Each connection attempt gets a freshly signed URL: the RFC 1123 date is
//! part of the HMAC-SHA256 input and the service rejects stale dates, so a
//! [`SignedEndpoint`] is consumed by the single attempt it authorizes.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use socialwise_core::config::SpeechConfig;

use crate::error::{Result, SpeechError};

const ALGORITHM: &str = "hmac-sha256";
const SIGNED_HEADERS: &str = "host date request-line";

/// Service credentials. Loaded once at startup and shared read-only.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    app_id: String,
    api_key: String,
    api_secret: String,
}

impl Credential {
    /// Build a credential, failing fast when any field is empty.
    pub fn new(
        app_id: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Result<Self> {
        let credential = Self {
            app_id: app_id.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        };
        credential.validate()?;
        Ok(credential)
    }

    /// Resolve all three fields from config (direct value, env reference, `IFLYTEK_*` fallback).
    pub fn from_config(config: &SpeechConfig) -> Result<Self> {
        let missing = |field: &str| {
            SpeechError::Configuration(format!("speech {field} is not configured"))
        };
        Self::new(
            config.resolve_app_id().ok_or_else(|| missing("app_id"))?,
            config.resolve_api_key().ok_or_else(|| missing("api_key"))?,
            config.resolve_api_secret().ok_or_else(|| missing("api_secret"))?,
        )
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("app_id", &self.app_id),
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
        ] {
            if value.trim().is_empty() {
                return Err(SpeechError::Configuration(format!(
                    "credential field '{name}' is empty"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("app_id", &self.app_id)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// A signed URL for exactly one connection attempt.
///
/// Deliberately not `Clone`: [`SignedEndpoint::into_url`] consumes it.
#[derive(Debug)]
pub struct SignedEndpoint {
    base_url: Url,
    host: String,
    date: String,
    signature: String,
    authorization: String,
}

impl SignedEndpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// RFC 1123 date that was signed.
    pub fn date(&self) -> &str {
        &self.date
    }

    /// Base64 HMAC-SHA256 digest of the canonical signing string.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Base64 authorization value sent as the `authorization` query parameter.
    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    /// Final connection URL with `authorization`, `date` and `host` appended.
    pub fn into_url(self) -> String {
        let mut url = self.base_url;
        url.query_pairs_mut()
            .append_pair("authorization", &self.authorization)
            .append_pair("date", &self.date)
            .append_pair("host", &self.host);
        url.into()
    }
}

/// Signs connection attempts against one endpoint URL.
///
/// Host and path in the signing string are taken from the endpoint URL itself,
/// so the signed request line always matches the request that is made.
#[derive(Debug, Clone)]
pub struct AuthSigner {
    base_url: Url,
    host: String,
    path: String,
}

impl AuthSigner {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut url = Url::parse(base_url)
            .map_err(|e| SpeechError::Configuration(format!("invalid endpoint URL {base_url}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SpeechError::Configuration(format!(
                "endpoint URL must use ws:// or wss://: {base_url}"
            )));
        }
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SpeechError::Configuration(format!(
                    "endpoint URL has no host: {base_url}"
                )));
            }
        };
        let path = url.path().to_string();
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self {
            base_url: url,
            host,
            path,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sign a `GET` upgrade request at `now`.
    pub fn sign(&self, credential: &Credential, now: DateTime<Utc>) -> Result<SignedEndpoint> {
        sign(&self.base_url, &self.host, &self.path, "GET", credential, now)
    }
}

/// Compute the signed endpoint for one connection attempt.
pub fn sign(
    base_url: &Url,
    host: &str,
    path: &str,
    verb: &str,
    credential: &Credential,
    now: DateTime<Utc>,
) -> Result<SignedEndpoint> {
    credential.validate()?;

    let date = rfc1123(now);
    let canonical = canonical_string(host, &date, verb, path);
    let signature = signature_digest(&credential.api_secret, &canonical)?;

    let authorization_origin = format!(
        r#"api_key="{}", algorithm="{ALGORITHM}", headers="{SIGNED_HEADERS}", signature="{signature}""#,
        credential.api_key
    );
    let authorization = BASE64.encode(authorization_origin.as_bytes());

    Ok(SignedEndpoint {
        base_url: base_url.clone(),
        host: host.to_string(),
        date,
        signature,
        authorization,
    })
}

/// Format a timestamp as an RFC 1123 HTTP date, e.g. `Tue, 02 Jan 2024 03:04:05 GMT`.
pub fn rfc1123(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn canonical_string(host: &str, date: &str, verb: &str, path: &str) -> String {
    format!("host: {host}\ndate: {date}\n{verb} {path} HTTP/1.1")
}

fn signature_digest(secret: &str, canonical: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| SpeechError::Configuration(format!("unusable api_secret: {e}")))?;
    mac.update(canonical.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}
