use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Flat configuration map exposed by `/api/settings`.
pub type SettingsMap = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    #[serde(default, alias = "solana_balance")]
    pub sol_balance: Option<f64>,
    #[serde(default)]
    pub rpc_latency: Option<f64>,
    #[serde(default)]
    pub tokens_scanned: Option<u64>,
    #[serde(default)]
    pub trades_executed: Option<u64>,
    #[serde(default)]
    pub ai_analysis_status: Option<String>,
    #[serde(default)]
    pub system_health: Option<String>,
    #[serde(default)]
    pub profits_losses: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeldToken {
    pub token_mint_address: String,
    #[serde(default = "missing_price", deserialize_with = "price_or_missing")]
    pub buy_price: f64,
    #[serde(default = "missing_price", deserialize_with = "price_or_missing")]
    pub current_price: f64,
    #[serde(default = "missing_price", deserialize_with = "price_or_missing")]
    pub max_price: f64,
    #[serde(default)]
    pub price_history: Option<Vec<f64>>,
}

// A null or absent price decodes as NaN so that one bad row is reported by
// the classifier instead of failing the whole list.
fn missing_price() -> f64 {
    f64::NAN
}

fn price_or_missing<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl HeldToken {
    /// Series used for the price chart; falls back to `[buy, current]`.
    pub fn chart_series(&self) -> Vec<f64> {
        match &self.price_history {
            Some(h) if !h.is_empty() => h.clone(),
            _ => vec![self.buy_price, self.current_price],
        }
    }
}

/// Case-insensitive substring match on the mint address.
pub fn filter_tokens<'a>(tokens: &'a [HeldToken], query: &str) -> Vec<&'a HeldToken> {
    let q = query.trim().to_lowercase();
    tokens
        .iter()
        .filter(|t| q.is_empty() || t.token_mint_address.to_lowercase().contains(&q))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TradeTimestamp {
    Unix(f64),
    Text(String),
}

impl TradeTimestamp {
    /// Seconds since epoch. Values above 1e12 are treated as milliseconds.
    pub fn as_unix_secs(&self) -> Option<f64> {
        match self {
            TradeTimestamp::Unix(v) if *v > 1e12 => Some(*v / 1000.0),
            TradeTimestamp::Unix(v) => Some(*v),
            TradeTimestamp::Text(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis() as f64 / 1000.0)
                .or_else(|| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|dt| dt.and_utc().timestamp_millis() as f64 / 1000.0)
                }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    #[serde(default)]
    pub id: Option<JsonValue>,
    pub timestamp: TradeTimestamp,
    pub token_mint_address: String,
    pub action: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub profit: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReputationEntry {
    pub wallet_id: String,
    #[serde(default)]
    pub ip_publique: Option<String>,
    #[serde(default, deserialize_with = "tags_list_or_csv")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub comportement: Option<String>,
    pub score_de_confiance: f64,
}

// The backend stores tags as a ", " joined string and may return either shape.
fn tags_list_or_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(v) => v,
        Raw::Csv(s) => parse_tags(&s),
        Raw::Null(()) => Vec::new(),
    })
}

/// Split a comma-separated tag list, trimming and de-duplicating.
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

#[derive(Debug, Error, PartialEq)]
pub enum FormError {
    #[error("wallet id is required")]
    MissingWallet,
    #[error("trust score is not a number: {0}")]
    ScoreNotNumber(String),
    #[error("trust score must be within [0, 1] (got {0})")]
    ScoreOutOfRange(f64),
    #[error("amount must be a positive number (got {0})")]
    InvalidAmount(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewReputationEntry {
    pub wallet_id: String,
    pub ip_publique: Option<String>,
    pub tags: Vec<String>,
    pub comportement: String,
    pub score_de_confiance: f64,
}

impl NewReputationEntry {
    pub fn from_form(
        wallet_id: &str,
        tags: &str,
        behavior: &str,
        score: &str,
    ) -> Result<Self, FormError> {
        let wallet_id = wallet_id.trim();
        if wallet_id.is_empty() {
            return Err(FormError::MissingWallet);
        }
        let score_de_confiance = score
            .trim()
            .parse::<f64>()
            .map_err(|_| FormError::ScoreNotNumber(score.trim().to_string()))?;
        if !score_de_confiance.is_finite() || !(0.0..=1.0).contains(&score_de_confiance) {
            return Err(FormError::ScoreOutOfRange(score_de_confiance));
        }
        Ok(Self {
            wallet_id: wallet_id.to_string(),
            ip_publique: None,
            tags: parse_tags(tags),
            comportement: behavior.trim().to_string(),
            score_de_confiance,
        })
    }
}

pub fn parse_capital(raw: &str) -> Result<f64, FormError> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(FormError::InvalidAmount(raw.trim().to_string())),
    }
}

/// Body returned by `/token`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Generic `{"message": ...}` acknowledgement.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitialCapitalAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub capital: Option<JsonValue>,
}
