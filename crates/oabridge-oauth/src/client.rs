use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ZaloError;

/// All outbound calls are bounded by this timeout; hitting it is a
/// transport failure, never a success.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stored expiry is the server-reported lifetime minus this margin, so
/// a token the store considers valid is never rejected upstream over
/// clock skew.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 300;

/// OA accounts and personal accounts authorize against different
/// endpoint families on the same OAuth host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Oa,
    Personal,
}

impl AccountKind {
    fn permission_path(&self) -> &'static str {
        match self {
            Self::Oa => "/v4/oa/permission",
            Self::Personal => "/v4/permission",
        }
    }

    fn token_path(&self) -> &'static str {
        match self {
            Self::Oa => "/v4/oa/access_token",
            Self::Personal => "/v4/access_token",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZaloConfig {
    pub app_id: String,
    pub secret_key: String,
    pub redirect_uri: String,
    /// Overridable bases so tests can point at a local mock server.
    pub oauth_base: String,
    pub api_base: String,
    pub graph_base: String,
}

impl ZaloConfig {
    pub fn new(app_id: String, secret_key: String, redirect_uri: String) -> Self {
        Self {
            app_id,
            secret_key,
            redirect_uri,
            oauth_base: "https://oauth.zaloapp.com".into(),
            api_base: "https://openapi.zalo.me".into(),
            graph_base: "https://graph.zalo.me".into(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let app_id = std::env::var("ZALO_APP_ID")?;
        let secret_key = std::env::var("ZALO_APP_SECRET")?;
        let redirect_uri = std::env::var("ZALO_REDIRECT_URI")?;
        Ok(Self::new(app_id, secret_key, redirect_uri))
    }
}

/// Normalized result of any token-endpoint call.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub scope: Option<String>,
}

impl TokenGrant {
    /// Absolute expiry for the token store, safety margin applied.
    pub fn expiry_unix(&self) -> i64 {
        chrono::Utc::now().timestamp() + self.expires_in as i64 - EXPIRY_SAFETY_MARGIN_SECS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZaloProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<ProfilePicture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilePicture {
    #[serde(default)]
    pub data: Option<ProfilePictureData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilePictureData {
    #[serde(default)]
    pub url: Option<String>,
}

impl ZaloProfile {
    pub fn avatar_url(&self) -> Option<&str> {
        self.picture.as_ref()?.data.as_ref()?.url.as_deref()
    }
}

/// Token endpoint responses carry either tokens or an error body, and
/// `expires_in` arrives as a string in some API revisions.
#[derive(Debug, Deserialize)]
struct TokenResponseBody {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "de_u64_flexible")]
    expires_in: Option<u64>,
    scope: Option<String>,
    error: Option<i64>,
    error_name: Option<String>,
    error_description: Option<String>,
}

/// Envelope on the OpenAPI side: `error: 0` means success regardless of
/// HTTP status.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    pub error: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

pub struct ZaloClient {
    http: reqwest::Client,
    cfg: ZaloConfig,
}

impl ZaloClient {
    pub fn new(cfg: ZaloConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, cfg })
    }

    pub fn app_id(&self) -> &str {
        &self.cfg.app_id
    }

    // -- Authorization redirects --

    /// OA flow carries the PKCE challenge; personal flow omits it.
    pub fn oa_authorize_url(&self, state: &str, challenge: &str) -> anyhow::Result<String> {
        let mut url = reqwest::Url::parse(&self.cfg.oauth_base)?;
        url.set_path(AccountKind::Oa.permission_path());
        url.query_pairs_mut()
            .append_pair("app_id", &self.cfg.app_id)
            .append_pair("redirect_uri", &self.cfg.redirect_uri)
            .append_pair("state", state)
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url.into())
    }

    pub fn personal_authorize_url(&self, state: &str) -> anyhow::Result<String> {
        let mut url = reqwest::Url::parse(&self.cfg.oauth_base)?;
        url.set_path(AccountKind::Personal.permission_path());
        url.query_pairs_mut()
            .append_pair("app_id", &self.cfg.app_id)
            .append_pair("redirect_uri", &self.cfg.redirect_uri)
            .append_pair("state", state);
        Ok(url.into())
    }

    // -- Token exchanges --

    pub async fn exchange_oa_code(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<TokenGrant, ZaloError> {
        self.token_request(
            AccountKind::Oa,
            &[
                ("grant_type", "authorization_code"),
                ("app_id", &self.cfg.app_id),
                ("code", code),
                ("code_verifier", verifier),
            ],
        )
        .await
    }

    pub async fn exchange_personal_code(&self, code: &str) -> Result<TokenGrant, ZaloError> {
        self.token_request(
            AccountKind::Personal,
            &[
                ("grant_type", "authorization_code"),
                ("app_id", &self.cfg.app_id),
                ("code", code),
            ],
        )
        .await
    }

    pub async fn refresh_token(
        &self,
        kind: AccountKind,
        refresh_token: &str,
    ) -> Result<TokenGrant, ZaloError> {
        self.token_request(
            kind,
            &[
                ("grant_type", "refresh_token"),
                ("app_id", &self.cfg.app_id),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    /// App secret travels in the `secret_key` header, never the body.
    async fn token_request(
        &self,
        kind: AccountKind,
        form: &[(&str, &str)],
    ) -> Result<TokenGrant, ZaloError> {
        let url = format!("{}{}", self.cfg.oauth_base, kind.token_path());
        let body: TokenResponseBody = self
            .http
            .post(url)
            .header("secret_key", &self.cfg.secret_key)
            .form(form)
            .send()
            .await?
            .json()
            .await?;

        match (body.access_token, body.refresh_token, body.expires_in) {
            (Some(access_token), Some(refresh_token), Some(expires_in)) => Ok(TokenGrant {
                access_token,
                refresh_token,
                expires_in,
                scope: body.scope,
            }),
            _ => {
                let name = body
                    .error_name
                    .unwrap_or_else(|| format!("error_{}", body.error.unwrap_or(-1)));
                if name == "invalid_grant" {
                    Err(ZaloError::InvalidGrant)
                } else {
                    Err(ZaloError::Upstream {
                        name,
                        description: body.error_description,
                    })
                }
            }
        }
    }

    // -- Graph API --

    pub async fn fetch_profile(&self, access_token: &str) -> Result<ZaloProfile, ZaloError> {
        let url = format!("{}/v2.0/me", self.cfg.graph_base);
        let profile = self
            .http
            .get(url)
            .query(&[("fields", "id,name,picture")])
            .header("access_token", access_token)
            .send()
            .await?
            .json()
            .await?;
        Ok(profile)
    }

    // -- OpenAPI (message send + history) --

    pub async fn send_text(
        &self,
        access_token: &str,
        user_id: &str,
        text: &str,
    ) -> Result<(), ZaloError> {
        let url = format!("{}/v3.0/oa/message/cs", self.cfg.api_base);
        let envelope: ApiEnvelope = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({
                "recipient": { "user_id": user_id },
                "message": { "text": text },
            }))
            .send()
            .await?
            .json()
            .await?;

        check_envelope(envelope).map(|_| ())
    }

    /// One page of the OA's conversation list.
    pub async fn list_conversations(
        &self,
        access_token: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Value>, ZaloError> {
        let url = format!("{}/v3.0/oa/conversation/list", self.cfg.api_base);
        let data = serde_json::json!({ "offset": offset, "limit": limit }).to_string();
        let envelope: ApiEnvelope = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(&[("data", data)])
            .send()
            .await?
            .json()
            .await?;

        Ok(as_array(check_envelope(envelope)?))
    }

    /// One page of message history with a specific user.
    pub async fn get_conversation_messages(
        &self,
        access_token: &str,
        user_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Value>, ZaloError> {
        let url = format!("{}/v3.0/oa/conversation/getmessage", self.cfg.api_base);
        let data =
            serde_json::json!({ "user_id": user_id, "offset": offset, "limit": limit }).to_string();
        let envelope: ApiEnvelope = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(&[("data", data)])
            .send()
            .await?
            .json()
            .await?;

        Ok(as_array(check_envelope(envelope)?))
    }
}

fn check_envelope(envelope: ApiEnvelope) -> Result<Value, ZaloError> {
    if envelope.error == 0 {
        Ok(envelope.data)
    } else {
        Err(ZaloError::Upstream {
            name: format!("error_{}", envelope.error),
            description: envelope.message,
        })
    }
}

fn as_array(data: Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

fn de_u64_flexible<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expires_in out of range")),
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("bad expires_in: {e}"))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unexpected expires_in: {other}"
        ))),
    }
}
