//! Service-account access tokens for the calendar API.
//!
//! A JWT signed with the service account's RSA key is exchanged for a
//! bearer token at the account's token endpoint. When a subject is set the
//! token acts on behalf of that user (domain-wide delegation).

use crate::error::{CalendarError, CalendarResult};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

/// Scope required to manage calendars and their entries.
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Fields of a service account key file used for signing.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// Load a key file (the JSON downloaded from the cloud console).
    pub fn from_file(path: &Path) -> CalendarResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Source of bearer tokens for API calls.
pub enum TokenSource {
    /// Fixed token (tests, tokens minted elsewhere).
    Static(String),
    /// Service account with optional impersonation.
    ServiceAccount(ServiceAccountAuth),
}

impl TokenSource {
    pub(crate) async fn token(&self, http: &reqwest::Client) -> CalendarResult<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ServiceAccount(auth) => auth.access_token(http).await,
        }
    }
}

/// Mints and caches service-account access tokens.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    subject: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    /// Prepare signing with `key`, impersonating `subject` when given.
    pub fn new(key: ServiceAccountKey, subject: Option<String>) -> CalendarResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| CalendarError::Auth(format!("invalid private key: {e}")))?;
        Ok(Self {
            key,
            encoding_key,
            subject,
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self, now: DateTime<Utc>) -> CalendarResult<String> {
        let claims = Claims {
            iss: &self.key.client_email,
            sub: self.subject.as_deref(),
            scope: CALENDAR_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + TOKEN_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| CalendarError::Auth(format!("failed to sign assertion: {e}")))
    }

    /// A valid access token, exchanged anew when the cached one is near expiry.
    pub async fn access_token(&self, http: &reqwest::Client) -> CalendarResult<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at > now + Duration::seconds(EXPIRY_MARGIN_SECS) {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.assertion(now)?;
        let response = http
            .post(&self.key.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS);
        debug!(subject = ?self.subject, lifetime, "Obtained calendar access token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + Duration::seconds(lifetime),
        });
        Ok(token.access_token)
    }
}
