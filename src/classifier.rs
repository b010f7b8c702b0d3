use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{config::Settings, models::HeldToken, models::SettingsMap};

pub const DEFAULT_SELL_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_TRAILING_STOP_PERCENT: f64 = 0.15;
pub const DEFAULT_STOP_LOSS_MULTIPLIER: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenStatus {
    TakeProfit,
    TrailingStop,
    StopLoss,
    Secure,
}

impl TokenStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TokenStatus::TakeProfit => "Take Profit",
            TokenStatus::TrailingStop => "Trailing Stop",
            TokenStatus::StopLoss => "Stop Loss",
            TokenStatus::Secure => "Secure",
        }
    }

    /// Statuses that correspond to an automatic sale.
    pub fn is_exit(&self) -> bool {
        !matches!(self, TokenStatus::Secure)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Take Profit" => Some(TokenStatus::TakeProfit),
            "Trailing Stop" => Some(TokenStatus::TrailingStop),
            "Stop Loss" => Some(TokenStatus::StopLoss),
            "Secure" => Some(TokenStatus::Secure),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecurityThresholds {
    pub sell_multiplier: f64,
    pub trailing_stop_percent: f64,
    pub stop_loss_multiplier: f64,
}

impl Default for SecurityThresholds {
    fn default() -> Self {
        Self {
            sell_multiplier: DEFAULT_SELL_MULTIPLIER,
            trailing_stop_percent: DEFAULT_TRAILING_STOP_PERCENT,
            stop_loss_multiplier: DEFAULT_STOP_LOSS_MULTIPLIER,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("buy price must be a positive number (got {0})")]
    InvalidBuyPrice(f64),
    #[error("{field} must be a non-negative number (got {value})")]
    InvalidPrice { field: &'static str, value: f64 },
    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),
}

impl SecurityThresholds {
    pub fn validate(&self) -> Result<(), ClassifyError> {
        let all_finite = self.sell_multiplier.is_finite()
            && self.trailing_stop_percent.is_finite()
            && self.stop_loss_multiplier.is_finite();
        if !all_finite {
            return Err(ClassifyError::InvalidThresholds("non-finite value".into()));
        }
        if self.sell_multiplier <= 0.0 {
            return Err(ClassifyError::InvalidThresholds(format!(
                "sell_multiplier must be > 0 (got {})",
                self.sell_multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.trailing_stop_percent) {
            return Err(ClassifyError::InvalidThresholds(format!(
                "trailing_stop_percent must be in [0, 1) (got {})",
                self.trailing_stop_percent
            )));
        }
        if self.stop_loss_multiplier < 0.0 {
            return Err(ClassifyError::InvalidThresholds(format!(
                "stop_loss_multiplier must be >= 0 (got {})",
                self.stop_loss_multiplier
            )));
        }
        Ok(())
    }

    /// Local overrides win, then the backend settings map, then defaults.
    /// A value that would make the set invalid is ignored with a warning.
    pub fn resolve(settings: &Settings, backend: &SettingsMap) -> Self {
        let defaults = Self::default();
        let pick = |local: Option<f64>, key: &str, fallback: f64, check: fn(f64) -> bool| {
            if let Some(v) = local {
                return v;
            }
            match backend.get(key).and_then(setting_as_f64) {
                Some(v) if check(v) => v,
                Some(v) => {
                    log::warn!("thresholds.ignored key={key} value={v}");
                    fallback
                }
                None => fallback,
            }
        };
        Self {
            sell_multiplier: pick(
                settings.sell_multiplier,
                "SELL_MULTIPLIER",
                defaults.sell_multiplier,
                |v| v.is_finite() && v > 0.0,
            ),
            trailing_stop_percent: pick(
                settings.trailing_stop_percent,
                "TRAILING_STOP_PERCENT",
                defaults.trailing_stop_percent,
                |v| v.is_finite() && (0.0..1.0).contains(&v),
            ),
            stop_loss_multiplier: pick(
                settings.stop_loss_multiplier,
                "STOP_LOSS_MULTIPLIER",
                defaults.stop_loss_multiplier,
                |v| v.is_finite() && v >= 0.0,
            ),
        }
    }
}

fn setting_as_f64(v: &JsonValue) -> Option<f64> {
    match v {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub status: TokenStatus,
    pub reason: String,
    pub profit_multiplier: f64,
}

/// Exit status of a held token. First matching rule wins:
/// take profit, trailing stop, stop loss, secure.
pub fn classify_token(
    token: &HeldToken,
    thresholds: &SecurityThresholds,
) -> Result<Classification, ClassifyError> {
    thresholds.validate()?;
    if !token.buy_price.is_finite() || token.buy_price <= 0.0 {
        return Err(ClassifyError::InvalidBuyPrice(token.buy_price));
    }
    if !token.current_price.is_finite() || token.current_price < 0.0 {
        return Err(ClassifyError::InvalidPrice {
            field: "current_price",
            value: token.current_price,
        });
    }
    if !token.max_price.is_finite() || token.max_price < 0.0 {
        return Err(ClassifyError::InvalidPrice {
            field: "max_price",
            value: token.max_price,
        });
    }

    let profit_multiplier = token.current_price / token.buy_price;
    let trailing_floor = token.max_price * (1.0 - thresholds.trailing_stop_percent);

    let (status, reason) = if profit_multiplier >= thresholds.sell_multiplier {
        (
            TokenStatus::TakeProfit,
            format!(
                "profit x{:.2} >= x{:.2}",
                profit_multiplier, thresholds.sell_multiplier
            ),
        )
    } else if token.current_price < trailing_floor {
        (
            TokenStatus::TrailingStop,
            format!(
                "price {} < {:.6} ({}% below peak {})",
                token.current_price,
                trailing_floor,
                (thresholds.trailing_stop_percent * 100.0).round(),
                token.max_price
            ),
        )
    } else if profit_multiplier < thresholds.stop_loss_multiplier {
        (
            TokenStatus::StopLoss,
            format!(
                "profit x{:.2} < x{:.2}",
                profit_multiplier, thresholds.stop_loss_multiplier
            ),
        )
    } else {
        (
            TokenStatus::Secure,
            format!("profit x{:.2}", profit_multiplier),
        )
    };

    Ok(Classification {
        status,
        reason,
        profit_multiplier,
    })
}
