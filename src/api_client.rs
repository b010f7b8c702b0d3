//! Typed client for the trading bot's REST API.
//!
//! Every `/api/*` call carries the bearer token. A 401 drops the token so
//! later calls fail fast with [`ApiError::MissingToken`] until the operator
//! logs in again.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{
    config::Settings,
    models::{
        AccessToken, ApiMessage, DashboardSnapshot, HeldToken, InitialCapitalAck,
        NewReputationEntry, ReputationEntry, SettingsMap, Trade,
    },
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not logged in")]
    MissingToken,
    #[error("session expired or token rejected (401)")]
    Unauthorized,
    #[error("backend returned {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// The operator has to log in (again) before this can succeed.
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::MissingToken | ApiError::Unauthorized)
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(token)),
        })
    }

    pub fn from_settings(settings: &Settings, token: Option<String>) -> Result<Self, ApiError> {
        Self::new(
            &settings.api_base_url,
            Duration::from_millis(settings.request_timeout_ms),
            token,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = self.token().ok_or(ApiError::MissingToken)?;
        Ok(self.http.request(method, self.url(path)).bearer_auth(token))
    }

    async fn send(&self, rb: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = rb.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            self.set_token(None);
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                detail: error_detail(&body, status),
            });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<T, ApiError> {
        let resp = self.send(rb).await?;
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let rb = self.authed(Method::GET, path)?;
        self.send_json(rb).await
    }

    /// POST `/token` with form credentials. Stores the returned token.
    pub async fn login(&self, username: &str, password: &str) -> Result<AccessToken, ApiError> {
        let rb = self
            .http
            .post(self.url("/token"))
            .form(&[("username", username), ("password", password)]);
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                detail: error_detail(&body, status),
            });
        }
        let tok: AccessToken = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        self.set_token(Some(tok.access_token.clone()));
        Ok(tok)
    }

    pub async fn dashboard(&self) -> Result<DashboardSnapshot, ApiError> {
        self.get_json("/api/dashboard").await
    }

    pub async fn reputation_entries(&self) -> Result<Vec<ReputationEntry>, ApiError> {
        self.get_json("/api/reputation-db").await
    }

    pub async fn add_reputation_entry(&self, entry: &NewReputationEntry) -> Result<ApiMessage, ApiError> {
        let rb = self
            .authed(Method::POST, "/api/manual-reputation-entry")?
            .json(entry);
        self.send_json(rb).await
    }

    pub async fn settings(&self) -> Result<SettingsMap, ApiError> {
        self.get_json("/api/settings").await
    }

    pub async fn save_settings(&self, settings: &SettingsMap) -> Result<(), ApiError> {
        let rb = self.authed(Method::POST, "/api/settings")?.json(settings);
        self.send(rb).await?;
        Ok(())
    }

    pub async fn held_tokens(&self) -> Result<Vec<HeldToken>, ApiError> {
        self.get_json("/api/held-tokens").await
    }

    pub async fn trade_history(&self) -> Result<Vec<Trade>, ApiError> {
        self.get_json("/api/trade-history").await
    }

    pub async fn set_trustwallet_validation(&self, auto_validation: bool) -> Result<(), ApiError> {
        let rb = self
            .authed(Method::POST, "/api/trustwallet-validation")?
            .json(&serde_json::json!({ "auto_validation": auto_validation }));
        self.send(rb).await?;
        Ok(())
    }

    pub async fn update_gemini_api_key(&self, key: &str) -> Result<ApiMessage, ApiError> {
        let rb = self
            .authed(Method::POST, "/api/gemini-api-key")?
            .json(&serde_json::json!({ "gemini_api_key": key }));
        self.send_json(rb).await
    }

    pub async fn set_initial_capital(&self, amount: f64) -> Result<InitialCapitalAck, ApiError> {
        let rb = self
            .authed(Method::POST, "/api/decision/set_initial_capital")?
            .json(&serde_json::json!({ "amount": amount }));
        self.send_json(rb).await
    }

    pub async fn toggle_test_mode(&self) -> Result<ApiMessage, ApiError> {
        self.get_json("/api/test-mode").await
    }
}

/// Pull a readable message out of an error body (`detail` or `error`).
fn error_detail(body: &str, status: StatusCode) -> String {
    let fallback = || {
        let t = body.trim();
        if t.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            t.chars().take(200).collect()
        }
    };
    let Ok(v) = serde_json::from_str::<JsonValue>(body) else {
        return fallback();
    };
    for key in ["detail", "error", "message"] {
        match v.get(key) {
            Some(JsonValue::String(s)) => return s.clone(),
            Some(JsonValue::Null) | None => continue,
            Some(other) => return other.to_string(),
        }
    }
    fallback()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spawn_backend, BackendData, GOOD_TOKEN};

    fn client(url: &str, token: Option<&str>) -> ApiClient {
        ApiClient::new(url, Duration::from_secs(2), token.map(str::to_string)).unwrap()
    }

    #[test]
    fn error_detail_prefers_detail_then_error() {
        let s = StatusCode::BAD_REQUEST;
        assert_eq!(error_detail(r#"{"detail":"bad key"}"#, s), "bad key");
        assert_eq!(error_detail(r#"{"error":"amount required"}"#, s), "amount required");
        assert_eq!(error_detail(r#"{"detail":[{"loc":["x"]}]}"#, s), r#"[{"loc":["x"]}]"#);
        assert_eq!(error_detail("", s), "Bad Request");
        assert_eq!(error_detail("plain text", s), "plain text");
    }

    #[tokio::test]
    async fn sends_bearer_token_and_decodes() {
        let backend = spawn_backend(BackendData::sample()).await;
        let api = client(&backend.url, Some(GOOD_TOKEN));

        let tokens = api.held_tokens().await.unwrap();
        assert_eq!(tokens.len(), 3);
        let snap = api.dashboard().await.unwrap();
        assert_eq!(snap.tokens_scanned, Some(42));
        let trades = api.trade_history().await.unwrap();
        assert_eq!(trades[0].action, "BUY");
    }

    #[tokio::test]
    async fn unauthorized_clears_token() {
        let backend = spawn_backend(BackendData::sample()).await;
        let api = client(&backend.url, Some("stale"));

        let err = api.dashboard().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(err.requires_login());
        assert!(api.token().is_none());

        let err = api.settings().await.unwrap_err();
        assert!(matches!(err, ApiError::MissingToken));
    }

    #[tokio::test]
    async fn login_stores_token() {
        let backend = spawn_backend(BackendData::sample()).await;
        let api = client(&backend.url, None);

        let err = api.login("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 401, .. }));

        let tok = api.login("admin", "secret").await.unwrap();
        assert_eq!(tok.access_token, GOOD_TOKEN);
        assert_eq!(api.token().as_deref(), Some(GOOD_TOKEN));
        assert!(api.reputation_entries().await.is_ok());
    }

    #[tokio::test]
    async fn rejected_requests_carry_backend_detail() {
        let backend = spawn_backend(BackendData::sample()).await;
        let api = client(&backend.url, Some(GOOD_TOKEN));

        let err = api.set_initial_capital(1_000.0).await.unwrap_err();
        match err {
            ApiError::Rejected { status, detail } => {
                assert_eq!(status, 400);
                assert!(detail.contains("Solde insuffisant"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }

        let ack = api.set_initial_capital(0.5).await.unwrap();
        assert_eq!(ack.status.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn posts_expected_payloads() {
        let backend = spawn_backend(BackendData::sample()).await;
        let api = client(&backend.url, Some(GOOD_TOKEN));

        api.set_trustwallet_validation(false).await.unwrap();
        api.update_gemini_api_key("k-123").await.unwrap();
        let entry = NewReputationEntry::from_form("W9", "scam, rugpull", "malicious", "0.1").unwrap();
        api.add_reputation_entry(&entry).await.unwrap();

        let posted = backend.posted();
        assert_eq!(posted[0].0, "/api/trustwallet-validation");
        assert_eq!(posted[0].1, serde_json::json!({"auto_validation": false}));
        assert_eq!(posted[1].1, serde_json::json!({"gemini_api_key": "k-123"}));
        assert_eq!(posted[2].1["tags"], serde_json::json!(["scam", "rugpull"]));
        assert_eq!(posted[2].1["ip_publique"], JsonValue::Null);
    }

    #[tokio::test]
    async fn network_failure_is_reported() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let api = client(&format!("http://127.0.0.1:{port}"), Some(GOOD_TOKEN));
        let err = api.held_tokens().await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        assert!(!err.requires_login());
    }
}
