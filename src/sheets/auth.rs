use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const LIFETIME: i64 = 3600;
/// Tokens this close to expiry are refreshed instead of reused.
const REFRESH_MARGIN: i64 = 60;

/// The fields of a service-account key file this client needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "token_uri")]
    pub token_uri: String,
}

fn token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_owned()
}

impl core::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccount {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("opening {}: {e}", path.display()))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Clone)]
struct Cached {
    token: String,
    expires_at: i64,
}

/// Bearer tokens for the Sheets API, minted from a service account and reused until near expiry.
pub struct TokenSource {
    account: ServiceAccount,
    key: EncodingKey,
    cached: Mutex<Option<Cached>>,
}

impl TokenSource {
    pub fn new(account: ServiceAccount) -> anyhow::Result<Self> {
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
        Ok(Self {
            account,
            key,
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self, now: i64) -> anyhow::Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.account.private_key_id);
        let claims = Claims {
            iss: &self.account.client_email,
            scope: SCOPE,
            aud: &self.account.token_uri,
            iat: now,
            exp: now + LIFETIME,
        };
        Ok(jsonwebtoken::encode(&header, &claims, &self.key)?)
    }

    fn reusable(&self, now: i64) -> Option<String> {
        let cached = self.cached.lock().clone()?;
        (now < cached.expires_at - REFRESH_MARGIN).then_some(cached.token)
    }

    pub async fn token(&self, client: &Client) -> anyhow::Result<String> {
        let now = Utc::now().timestamp();
        if let Some(token) = self.reusable(now) {
            return Ok(token);
        }

        let assertion = self.assertion(now)?;
        let resp = client
            .post(&self.account.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("token exchange for {} failed: {status} {}", self.account.client_email, body.trim());
        }
        let TokenResponse {
            access_token,
            expires_in,
        } = resp.json().await?;

        tracing::info!(target: "auth", "\x1b[36mnew access token\x1b[0m for {}, valid {expires_in}s", self.account.client_email);
        *self.cached.lock() = Some(Cached {
            token: access_token.clone(),
            expires_at: now + expires_in,
        });
        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{DecodingKey, Validation};

    use super::*;

    const PRIVATE: &str = include_str!("../../tests/data/service-key.pem");
    const PUBLIC: &str = include_str!("../../tests/data/service-key.pub.pem");

    fn account() -> ServiceAccount {
        let json = serde_json::json!({
            "type": "service_account",
            "client_email": "sheets@dnf.iam.gserviceaccount.com",
            "private_key": PRIVATE,
            "private_key_id": "k1",
        });
        ServiceAccount::from_json(&json.to_string()).unwrap()
    }

    #[test]
    fn key_file_defaults_token_uri() {
        let account = account();
        assert_eq!(account.token_uri, "https://oauth2.googleapis.com/token");
        assert!(!format!("{account:?}").contains("PRIVATE KEY"));
    }

    #[test]
    fn assertion_is_a_verifiable_rs256_jwt() {
        let source = TokenSource::new(account()).unwrap();
        let now = Utc::now().timestamp();
        let jwt = source.assertion(now).unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://oauth2.googleapis.com/token"]);
        let decoded = jsonwebtoken::decode::<serde_json::Value>(
            &jwt,
            &DecodingKey::from_rsa_pem(PUBLIC.as_bytes()).unwrap(),
            &validation,
        );
        let data = decoded.unwrap();
        assert_eq!(data.header.kid.as_deref(), Some("k1"));
        assert_eq!(data.claims["scope"], SCOPE);
        assert_eq!(data.claims["iss"], "sheets@dnf.iam.gserviceaccount.com");
        assert_eq!(data.claims["exp"].as_i64().unwrap() - data.claims["iat"].as_i64().unwrap(), LIFETIME);
    }

    #[test]
    fn cached_token_reused_until_margin() {
        let source = TokenSource::new(account()).unwrap();
        assert_eq!(source.reusable(0), None);
        *source.cached.lock() = Some(Cached {
            token: "t".to_owned(),
            expires_at: 1000,
        });
        assert_eq!(source.reusable(900).as_deref(), Some("t"));
        assert_eq!(source.reusable(940), None);
    }

    #[test]
    fn garbage_key_is_rejected() {
        let mut account = account();
        account.private_key = "not a key".to_owned();
        assert!(TokenSource::new(account).is_err());
    }
}
