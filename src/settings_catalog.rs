//! Display grouping and input coercion for the backend's flat settings map.

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::models::SettingsMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Widget {
    Number { step: f64 },
    Text,
    Secret,
    Switch,
    Select { options: &'static [&'static str] },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Param {
    pub key: &'static str,
    pub label: &'static str,
    pub widget: Widget,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Category {
    pub name: &'static str,
    pub params: &'static [Param],
}

const fn number(key: &'static str, label: &'static str, step: f64) -> Param {
    Param { key, label, widget: Widget::Number { step } }
}

const fn text(key: &'static str, label: &'static str) -> Param {
    Param { key, label, widget: Widget::Text }
}

const fn secret(key: &'static str, label: &'static str) -> Param {
    Param { key, label, widget: Widget::Secret }
}

pub const LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR"];

pub const CATEGORIES: &[Category] = &[
    Category {
        name: "Trading",
        params: &[
            number("INITIAL_CAPITAL_SOL", "Initial capital (SOL)", 0.01),
            number("MIN_LIQUIDITY_POOL_SOL", "Min. pool liquidity (SOL)", 0.01),
            number("BUY_AMOUNT_SOL", "Buy amount (SOL)", 0.01),
            number("SELL_MULTIPLIER", "Sell multiplier", 0.01),
            number("PROFIT_MULTIPLIER_SELL", "Profit sell multiplier", 0.01),
            number("STOP_LOSS_PROFIT_MULTIPLIER", "Dynamic stop loss multiplier", 0.01),
            number("TRAILING_STOP_PERCENT", "Trailing stop (fraction of peak)", 0.01),
            number("STOP_LOSS_MULTIPLIER", "Stop loss multiplier", 0.01),
        ],
    },
    Category {
        name: "Security",
        params: &[
            number("REPUTATION_SCORE_THRESHOLD", "Reputation threshold", 0.01),
            secret("PRIVATE_KEY", "Private key"),
            text("WALLET_ADDRESS", "Wallet address"),
        ],
    },
    Category {
        name: "Simulation",
        params: &[
            Param { key: "SIMULATION_MODE", label: "Simulation mode", widget: Widget::Switch },
            text("SIMULATION_REPORT_PATH", "Simulation report path"),
        ],
    },
    Category {
        name: "Blockchain",
        params: &[
            text("SOLANA_RPC_URL", "Solana RPC URL"),
            text("SOLANA_WS_URL", "Solana WebSocket URL"),
            text("JITO_SHREDSTREAM_GRPC_URL", "Jito Shredstream gRPC"),
            secret("HELIUS_API_KEY", "Helius API key"),
            number("RPC_LATENCY_CHECK_INTERVAL", "RPC latency interval (s)", 1.0),
            number("TOKEN_SCAN_INTERVAL", "Token scan interval (s)", 1.0),
            number("LATENCY_TARGET_MS", "Latency target (ms)", 1.0),
        ],
    },
    Category {
        name: "AI",
        params: &[
            secret("OPENROUTER_API_KEY", "OpenRouter API key"),
            text("GEMINI_MODEL", "Gemini model"),
        ],
    },
    Category {
        name: "System",
        params: &[
            Param { key: "LOG_LEVEL", label: "Log level", widget: Widget::Select { options: LOG_LEVELS } },
            text("DATABASE_URL", "Database URL"),
        ],
    },
];

pub fn find_param(key: &str) -> Option<&'static Param> {
    CATEGORIES
        .iter()
        .flat_map(|c| c.params.iter())
        .find(|p| p.key == key)
}

/// Backend keys that no category lists, sorted.
pub fn uncategorized_keys(map: &SettingsMap) -> Vec<&str> {
    map.keys()
        .map(String::as_str)
        .filter(|k| find_param(k).is_none())
        .collect()
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingError {
    #[error("{key}: expected a number, got {raw:?}")]
    NotNumber { key: String, raw: String },
    #[error("{key}: {raw:?} is not one of {options:?}")]
    NotAnOption {
        key: String,
        raw: String,
        options: &'static [&'static str],
    },
    #[error("expected KEY=VALUE, got {0:?}")]
    MalformedAssignment(String),
}

/// Turn raw operator input into the JSON value the widget type implies.
pub fn coerce(key: &str, raw: &str) -> Result<JsonValue, SettingError> {
    let raw_t = raw.trim();
    let Some(param) = find_param(key) else {
        return Ok(JsonValue::String(raw_t.to_string()));
    };
    match param.widget {
        Widget::Number { .. } => {
            if let Ok(i) = raw_t.parse::<i64>() {
                return Ok(JsonValue::from(i));
            }
            raw_t
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(|| SettingError::NotNumber {
                    key: key.to_string(),
                    raw: raw_t.to_string(),
                })
        }
        Widget::Switch => Ok(JsonValue::Bool(matches!(
            raw_t.to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ))),
        Widget::Select { options } => {
            let upper = raw_t.to_uppercase();
            match options.iter().find(|o| **o == upper) {
                Some(o) => Ok(JsonValue::String(o.to_string())),
                None => Err(SettingError::NotAnOption {
                    key: key.to_string(),
                    raw: raw_t.to_string(),
                    options,
                }),
            }
        }
        Widget::Text | Widget::Secret => Ok(JsonValue::String(raw_t.to_string())),
    }
}

/// Parse `KEY=VALUE` and coerce the value.
pub fn parse_assignment(s: &str) -> Result<(String, JsonValue), SettingError> {
    let Some((k, v)) = s.split_once('=') else {
        return Err(SettingError::MalformedAssignment(s.to_string()));
    };
    let key = k.trim();
    if key.is_empty() {
        return Err(SettingError::MalformedAssignment(s.to_string()));
    }
    Ok((key.to_string(), coerce(key, v)?))
}

/// Apply edits on top of the current map.
pub fn apply_edits(map: &mut SettingsMap, edits: Vec<(String, JsonValue)>) {
    for (k, v) in edits {
        map.insert(k, v);
    }
}

/// Loose truthiness for switch values: the backend may send a bool, a number
/// or a string such as `"true"`.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        JsonValue::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        _ => false,
    }
}

/// Whether an edit leaves the setting's meaning unchanged. Switches compare
/// by truthiness, numbers by value (2 and 2.0 are the same).
pub fn same_setting(key: &str, current: Option<&JsonValue>, new: &JsonValue) -> bool {
    let Some(current) = current else {
        return false;
    };
    if matches!(find_param(key).map(|p| p.widget), Some(Widget::Switch)) {
        return is_truthy(current) == is_truthy(new);
    }
    if current.is_number() && new.is_number() {
        return current.as_f64() == new.as_f64();
    }
    current == new
}

/// Value as shown to the operator. Secrets are masked.
pub fn display_value(key: &str, value: Option<&JsonValue>) -> String {
    let Some(v) = value else {
        return "-".to_string();
    };
    let text = match v {
        JsonValue::Null => return "-".to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    let is_secret = find_param(key).map(|p| p.widget == Widget::Secret).unwrap_or(false);
    if is_secret && !text.is_empty() {
        let tail: String = text.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        if text.chars().count() > 8 {
            format!("****{tail}")
        } else {
            "********".to_string()
        }
    } else {
        text
    }
}
