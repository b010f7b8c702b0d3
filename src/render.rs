//! Plain-text rendering of the view for the CLI.

use std::fmt::Write as _;

use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::{
    classifier::SecurityThresholds,
    models::{DashboardSnapshot, ReputationEntry, SettingsMap, Trade, TradeTimestamp},
    refresher::{DashboardView, NoticeLevel, TokenRow},
    settings_catalog::{display_value, uncategorized_keys, CATEGORIES},
    store::AlertRecord,
    utils::{fmt_opt, fmt_price, fmt_ts, short_id, sparkline},
};

#[derive(Tabled)]
struct TokenDisplayRow {
    #[tabled(rename = "Token")]
    token: String,
    #[tabled(rename = "Buy")]
    buy: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Max")]
    max: String,
    #[tabled(rename = "Take Profit")]
    take_profit: String,
    #[tabled(rename = "Trailing")]
    trailing: String,
    #[tabled(rename = "Stop Loss")]
    stop_loss: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Chart")]
    chart: String,
    #[tabled(rename = "Why")]
    why: String,
}

#[derive(Tabled)]
struct TradeDisplayRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Token")]
    token: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Price")]
    price: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Profit")]
    profit: String,
}

#[derive(Tabled)]
struct ReputationDisplayRow {
    #[tabled(rename = "Wallet")]
    wallet: String,
    #[tabled(rename = "Public IP")]
    ip: String,
    #[tabled(rename = "Tags")]
    tags: String,
    #[tabled(rename = "Behavior")]
    behavior: String,
    #[tabled(rename = "Score")]
    score: String,
}

#[derive(Tabled)]
struct AlertDisplayRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Token")]
    token: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

fn table<T: Tabled>(rows: Vec<T>) -> String {
    let mut out = Table::new(rows)
        .with(Style::modern())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    out.push('\n');
    out
}

pub fn snapshot(s: Option<&DashboardSnapshot>) -> String {
    let Some(s) = s else {
        return "Dashboard data not loaded.\n".to_string();
    };
    let mut out = String::new();
    let _ = writeln!(out, "Wallet balance   {} SOL", fmt_opt(s.sol_balance));
    let _ = writeln!(out, "RPC latency      {} ms", fmt_opt(s.rpc_latency));
    let _ = writeln!(out, "Tokens scanned   {}", fmt_opt(s.tokens_scanned));
    let _ = writeln!(out, "Trades executed  {}", fmt_opt(s.trades_executed));
    let _ = writeln!(out, "AI analysis      {}", fmt_opt(s.ai_analysis_status.as_deref()));
    let _ = writeln!(out, "System health    {}", fmt_opt(s.system_health.as_deref()));
    out
}

pub fn token_rows(rows: &[TokenRow], t: &SecurityThresholds) -> String {
    if rows.is_empty() {
        return "No tokens held.\n".to_string();
    }
    let display: Vec<TokenDisplayRow> = rows
        .iter()
        .map(|r| {
            let (status, why) = match (&r.classification, &r.error) {
                (Some(c), _) => (c.status.label().to_string(), c.reason.clone()),
                (None, Some(e)) => ("Invalid".to_string(), e.clone()),
                (None, None) => ("-".to_string(), String::new()),
            };
            TokenDisplayRow {
                token: short_id(&r.token.token_mint_address, 6),
                buy: fmt_price(r.token.buy_price),
                current: fmt_price(r.token.current_price),
                max: fmt_price(r.token.max_price),
                take_profit: format!("x{}", t.sell_multiplier),
                trailing: format!("{}%", (t.trailing_stop_percent * 100.0).trunc()),
                stop_loss: format!("x{}", t.stop_loss_multiplier),
                status,
                chart: sparkline(&r.token.chart_series()),
                why,
            }
        })
        .collect();
    table(display)
}

pub fn trades(trades: &[Trade]) -> String {
    if trades.is_empty() {
        return "No trades recorded.\n".to_string();
    }
    let display: Vec<TradeDisplayRow> = trades
        .iter()
        .map(|t| TradeDisplayRow {
            date: match (t.timestamp.as_unix_secs(), &t.timestamp) {
                (Some(ts), _) => fmt_ts(ts),
                (None, TradeTimestamp::Text(s)) => s.clone(),
                (None, TradeTimestamp::Unix(v)) => v.to_string(),
            },
            token: short_id(&t.token_mint_address, 6),
            action: t.action.clone(),
            price: fmt_opt(t.price),
            amount: fmt_opt(t.amount),
            profit: fmt_opt(t.profit),
        })
        .collect();
    table(display)
}

pub fn reputation(entries: &[ReputationEntry]) -> String {
    if entries.is_empty() {
        return "No reputation entries found.\n".to_string();
    }
    let display: Vec<ReputationDisplayRow> = entries
        .iter()
        .map(|e| ReputationDisplayRow {
            wallet: e.wallet_id.clone(),
            ip: fmt_opt(e.ip_publique.as_deref()),
            tags: e.tags.join(", "),
            behavior: fmt_opt(e.comportement.as_deref()),
            score: format!("{:.2}", e.score_de_confiance),
        })
        .collect();
    table(display)
}

pub fn settings(map: &SettingsMap) -> String {
    let mut out = String::new();
    for cat in CATEGORIES {
        let _ = writeln!(out, "[{}]", cat.name);
        for p in cat.params {
            let _ = writeln!(out, "  {:<30} {:<28} {}", p.key, p.label, display_value(p.key, map.get(p.key)));
        }
    }
    let extra = uncategorized_keys(map);
    if !extra.is_empty() {
        let _ = writeln!(out, "[Other]");
        for k in extra {
            let _ = writeln!(out, "  {:<30} {}", k, display_value(k, map.get(k)));
        }
    }
    out
}

pub fn alerts(alerts: &[AlertRecord]) -> String {
    if alerts.is_empty() {
        return "No sale alerts.\n".to_string();
    }
    let display: Vec<AlertDisplayRow> = alerts
        .iter()
        .map(|a| AlertDisplayRow {
            time: fmt_ts(a.ts),
            token: a.mint.clone(),
            status: a.status.clone(),
            reason: a.reason.clone(),
        })
        .collect();
    table(display)
}

pub fn alert_line(a: &AlertRecord) -> String {
    format!("[{}] automatic sale of {} ({}): {}", fmt_ts(a.ts), a.mint, a.status, a.reason)
}

pub fn notices(view: &DashboardView) -> String {
    let mut out = String::new();
    if view.login_required {
        out.push_str("Login required: run `solbot-dashboard login`.\n");
    }
    for (component, n) in &view.notices {
        let tag = match n.level {
            NoticeLevel::Ok => "ok",
            NoticeLevel::Error => "error",
        };
        let _ = writeln!(out, "{tag} {component}: {}", n.text);
    }
    out
}

pub fn overview(view: &DashboardView, search: &str) -> String {
    let mut out = String::new();
    out.push_str(&notices(view));
    out.push_str("== Overview ==\n");
    out.push_str(&snapshot(view.snapshot.as_ref()));
    out.push_str("\n== Held tokens ==\n");
    out.push_str(&token_rows(&view.filtered_rows(search), &view.thresholds));
    out.push_str("\n== Trade history ==\n");
    out.push_str(&trades(&view.trades));
    out.push_str("\n== Recent alerts ==\n");
    out.push_str(&alerts(&view.recent_alerts));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::HeldToken, refresher::classify_rows};

    #[test]
    fn token_table_shows_status_and_invalid_rows() {
        let t = SecurityThresholds::default();
        let tokens = vec![
            HeldToken {
                token_mint_address: "A".into(),
                buy_price: 100.0,
                current_price: 90.0,
                max_price: 90.0,
                price_history: None,
            },
            HeldToken {
                token_mint_address: "B".into(),
                buy_price: 0.0,
                current_price: 1.0,
                max_price: 1.0,
                price_history: None,
            },
        ];
        let out = token_rows(&classify_rows(&tokens, &t), &t);
        assert!(out.contains("Stop Loss"));
        assert!(out.contains("Invalid"));
        assert!(out.contains("15%"));
        assert!(out.contains("x2"));
    }

    #[test]
    fn tables_have_named_headers() {
        let alert = AlertRecord {
            alert_id: "a1".into(),
            ts: 0.0,
            mint: "MintXYZ".into(),
            status: "Stop Loss".into(),
            reason: "profit x0.90 < x1.00".into(),
        };
        let out = alerts(&[alert]);
        for h in ["Time", "Token", "Status", "Reason"] {
            assert!(out.contains(h), "missing header {h}");
        }
        assert!(out.contains("MintXYZ"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn unpriced_token_shows_dash() {
        let t = SecurityThresholds::default();
        let tokens = vec![HeldToken {
            token_mint_address: "N".into(),
            buy_price: f64::NAN,
            current_price: 1.0,
            max_price: 1.0,
            price_history: None,
        }];
        let out = token_rows(&classify_rows(&tokens, &t), &t);
        // Only the reason mentions NaN; the price cells show a dash.
        assert_eq!(out.matches("NaN").count(), 1);
        assert!(out.contains("Invalid"));
    }

    #[test]
    fn empty_states() {
        assert_eq!(trades(&[]), "No trades recorded.\n");
        assert_eq!(reputation(&[]), "No reputation entries found.\n");
        assert!(snapshot(None).contains("not loaded"));
    }
}
