use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Form, Query, Request, State},
    http::{
        header::{HOST, ORIGIN},
        HeaderMap, HeaderName, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

const SEC_FETCH_SITE: HeaderName = HeaderName::from_static("sec-fetch-site");

use crate::{
    config::Settings,
    models::{parse_capital, NewReputationEntry},
    refresher::{DashboardView, NoticeLevel, Refresher},
    settings_catalog::{
        coerce, display_value, is_truthy, same_setting, uncategorized_keys, Widget, CATEGORIES,
    },
    utils::{fmt_opt, fmt_price, fmt_ts, now_ts, sparkline},
};

#[derive(Clone)]
pub struct DashboardState {
    pub settings: Settings,
    pub refresher: Arc<Refresher>,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods([Method::GET]);
    let actions = Router::new()
        .route("/actions/refresh", post(action_refresh))
        .route("/actions/refresh-tokens", post(action_refresh_tokens))
        .route("/actions/settings", post(action_settings))
        .route("/actions/reputation", post(action_reputation))
        .route("/actions/gemini-key", post(action_gemini_key))
        .route("/actions/trustwallet-validation", post(action_trustwallet))
        .route("/actions/initial-capital", post(action_initial_capital))
        .route("/actions/test-mode", post(action_test_mode))
        .route("/actions/login", post(action_login))
        .route("/actions/logout", post(action_logout))
        .route_layer(middleware::from_fn(same_origin_only));
    Router::new()
        .route("/", get(index))
        .route("/api/view", get(api_view))
        .route("/api/alerts", get(api_alerts))
        .route("/api/health", get(api_health))
        .merge(actions)
        .layer(cors)
        .with_state(state)
}

/// Actions carry the stored bearer token to the backend, so browsers may only
/// submit them from this dashboard's own pages. Clients that send neither
/// `Sec-Fetch-Site` nor `Origin` (curl, scripts) are let through.
async fn same_origin_only(req: Request, next: Next) -> Response {
    if !is_same_origin(req.headers()) {
        log::warn!(
            "dashboard.cross_origin_rejected path={} origin={:?}",
            req.uri().path(),
            req.headers().get(ORIGIN)
        );
        return (StatusCode::FORBIDDEN, "cross-origin request rejected").into_response();
    }
    next.run(req).await
}

fn is_same_origin(headers: &HeaderMap) -> bool {
    let header = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
    if let Some(site) = header(SEC_FETCH_SITE) {
        if !matches!(site, "same-origin" | "none") {
            return false;
        }
    }
    match (header(ORIGIN), header(HOST)) {
        (None, _) => true,
        (Some(origin), Some(host)) => origin
            .split_once("://")
            .map(|(_, authority)| authority.eq_ignore_ascii_case(host))
            .unwrap_or(false),
        (Some(_), None) => false,
    }
}

pub async fn serve_dashboard(settings: Settings, refresher: Arc<Refresher>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.dashboard_host, settings.dashboard_port)
        .parse()
        .context("dashboard addr parse")?;
    let app = router(DashboardState {
        settings,
        refresher,
    });

    log::info!("dashboard.start url=http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Deserialize)]
struct SearchQ {
    search: Option<String>,
}

async fn index(State(st): State<DashboardState>, Query(q): Query<SearchQ>) -> impl IntoResponse {
    let view = st.refresher.view();
    Html(render_index_html(
        &view,
        st.refresher.api().base_url(),
        q.search.as_deref().unwrap_or(""),
    ))
}

fn esc(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_index_html(view: &DashboardView, backend: &str, search: &str) -> String {
    let mut body = String::new();

    if view.login_required {
        body.push_str(
            r#"<section class="card"><h2>Login</h2>
<form method="post" action="/actions/login">
<input name="username" placeholder="username" required>
<input name="password" type="password" placeholder="password" required>
<button>Log in</button></form></section>"#,
        );
    }

    for (component, n) in &view.notices {
        let cls = match n.level {
            NoticeLevel::Ok => "good",
            NoticeLevel::Error => "bad",
        };
        let _ = write!(
            body,
            r#"<div class="banner {cls}">{} {}: {}</div>"#,
            fmt_ts(n.ts),
            esc(component),
            esc(&n.text)
        );
    }

    // Overview
    let s = view.snapshot.clone().unwrap_or_default();
    let kpis = [
        ("Wallet balance", format!("{} SOL", fmt_opt(s.sol_balance))),
        ("RPC latency", format!("{} ms", fmt_opt(s.rpc_latency))),
        ("Tokens scanned", fmt_opt(s.tokens_scanned)),
        ("Trades executed", fmt_opt(s.trades_executed)),
        ("AI analysis", fmt_opt(s.ai_analysis_status.as_deref())),
        ("System health", fmt_opt(s.system_health.as_deref())),
    ];
    body.push_str(r#"<section class="card"><h2>Overview</h2><div class="kpis">"#);
    for (lbl, val) in kpis {
        let _ = write!(
            body,
            r#"<div class="kpi"><div class="lbl">{lbl}</div><div class="val">{}</div></div>"#,
            esc(&val)
        );
    }
    body.push_str(
        r#"</div><form method="post" action="/actions/refresh"><button>Refresh all</button></form></section>"#,
    );

    // Held tokens
    let t = &view.thresholds;
    let _ = write!(
        body,
        r#"<section class="card"><h2>Held tokens</h2>
<form method="get" action="/"><input name="search" value="{}" placeholder="Search mint"><button>Filter</button></form>
<form method="post" action="/actions/refresh-tokens"><button>Refresh tokens</button></form>
<table><tr><th>Token</th><th>Buy</th><th>Current</th><th>Max</th><th>Take profit</th><th>Trailing</th><th>Stop loss</th><th>Status</th><th>Chart</th></tr>"#,
        esc(search)
    );
    let rows = view.filtered_rows(search);
    if rows.is_empty() {
        body.push_str(r#"<tr><td colspan="9" class="muted">No tokens held</td></tr>"#);
    }
    for r in &rows {
        let (status, cls, why) = match (&r.classification, &r.error) {
            (Some(c), _) => (c.status.label(), status_class(c.status.label()), c.reason.clone()),
            (None, Some(e)) => ("Invalid", "bad", e.clone()),
            (None, None) => ("-", "", String::new()),
        };
        let _ = write!(
            body,
            r#"<tr><td class="mono">{}</td><td>{}</td><td>{}</td><td>{}</td><td>x{}</td><td>{}%</td><td>x{}</td><td class="{cls}" title="{}">{status}</td><td class="mono">{}</td></tr>"#,
            esc(&r.token.token_mint_address),
            fmt_price(r.token.buy_price),
            fmt_price(r.token.current_price),
            fmt_price(r.token.max_price),
            t.sell_multiplier,
            (t.trailing_stop_percent * 100.0).trunc(),
            t.stop_loss_multiplier,
            esc(&why),
            sparkline(&r.token.chart_series()),
        );
    }
    body.push_str("</table></section>");

    // Alerts
    body.push_str(r#"<section class="card"><h2>Sale alerts</h2><table><tr><th>Time</th><th>Token</th><th>Status</th><th>Reason</th></tr>"#);
    for a in &view.recent_alerts {
        let _ = write!(
            body,
            r#"<tr><td>{}</td><td class="mono">{}</td><td class="{}">{}</td><td>{}</td></tr>"#,
            fmt_ts(a.ts),
            esc(&a.mint),
            status_class(&a.status),
            esc(&a.status),
            esc(&a.reason)
        );
    }
    body.push_str("</table></section>");

    // Trades
    body.push_str(r#"<section class="card"><h2>Trade history</h2><table><tr><th>Date</th><th>Token</th><th>Action</th><th>Price</th><th>Amount</th><th>Profit</th></tr>"#);
    if view.trades.is_empty() {
        body.push_str(r#"<tr><td colspan="6" class="muted">No trades recorded</td></tr>"#);
    }
    for tr in &view.trades {
        let when = tr
            .timestamp
            .as_unix_secs()
            .map(fmt_ts)
            .unwrap_or_else(|| "-".to_string());
        let _ = write!(
            body,
            r#"<tr><td>{when}</td><td class="mono">{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>"#,
            esc(&tr.token_mint_address),
            esc(&tr.action),
            fmt_opt(tr.price),
            fmt_opt(tr.amount),
            fmt_opt(tr.profit)
        );
    }
    body.push_str("</table></section>");

    body.push_str(&render_settings_form(view));
    body.push_str(&render_reputation(view));

    body.push_str(
        r#"<section class="card"><h2>Controls</h2>
<form method="post" action="/actions/trustwallet-validation"><select name="enabled"><option value="on">on</option><option value="off">off</option></select><button>TrustWallet auto-validation</button></form>
<form method="post" action="/actions/initial-capital"><input name="amount" type="number" step="0.01" min="0" placeholder="SOL"><button>Set initial capital</button></form>
<form method="post" action="/actions/gemini-key"><input name="key" type="password" placeholder="Gemini API key"><button>Update key</button></form>
<form method="post" action="/actions/test-mode"><button>Toggle test mode</button></form>
<form method="post" action="/actions/logout"><button>Log out</button></form>
</section>"#,
    );

    let refreshed = view
        .last_refresh_ts
        .map(fmt_ts)
        .unwrap_or_else(|| "never".to_string());

    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Solana bot console</title>
    <style>
      :root {{ --bg: #0b1220; --panel: rgba(255,255,255,0.06); --stroke: rgba(255,255,255,0.12);
               --text: rgba(255,255,255,0.92); --muted: rgba(255,255,255,0.65);
               --good: #33d17a; --bad: #ff4d4d; --warn: #ffcc00; --info: #3dd6d0; }}
      body {{ margin: 0; padding: 18px; background: var(--bg); color: var(--text);
              font-family: ui-sans-serif, system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial; }}
      .card {{ border: 1px solid var(--stroke); border-radius: 14px; background: var(--panel); padding: 12px 14px; margin-top: 14px; }}
      .kpis {{ display: grid; gap: 10px; grid-template-columns: repeat(3, 1fr); }}
      .kpi .lbl {{ color: var(--muted); font-size: 12px; }}
      .kpi .val {{ font-size: 20px; font-weight: 800; }}
      table {{ width: 100%; border-collapse: collapse; }}
      th, td {{ padding: 6px 8px; border-bottom: 1px solid rgba(255,255,255,0.07); text-align: left; font-size: 13px; }}
      th {{ color: var(--muted); font-size: 12px; }}
      .mono {{ font-family: ui-monospace, SFMono-Regular, Menlo, Consolas, monospace; }}
      .muted {{ color: var(--muted); }}
      .good {{ color: var(--good); }} .bad {{ color: var(--bad); }} .warn {{ color: var(--warn); }} .info {{ color: var(--info); }}
      .banner {{ margin-top: 8px; padding: 8px 10px; border-radius: 10px; border: 1px solid var(--stroke); }}
      form {{ display: inline-block; margin: 4px 8px 4px 0; }}
    </style>
  </head>
  <body>
    <div class="muted">backend <span class="mono">{backend}</span> · last refresh {refreshed}</div>
    {body}
  </body>
</html>"#,
        backend = esc(backend),
        refreshed = refreshed,
        body = body
    )
}

fn status_class(label: &str) -> &'static str {
    match label {
        "Take Profit" => "info",
        "Trailing Stop" => "warn",
        "Stop Loss" => "bad",
        "Secure" => "good",
        _ => "",
    }
}

// Keys the backend does not send stay unset unless the operator picks a value.
const UNSET_OPTION: &str = r#"<option value="" selected>(unset)</option>"#;

fn render_settings_form(view: &DashboardView) -> String {
    let mut out = String::from(
        r#"<section class="card"><h2>Settings</h2><form method="post" action="/actions/settings">"#,
    );
    for cat in CATEGORIES {
        let _ = write!(out, "<details><summary>{}</summary><table>", cat.name);
        for p in cat.params {
            let current = view.settings.get(p.key);
            let plain = match current {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(v) => v.to_string(),
            };
            let input = match p.widget {
                Widget::Number { step } => format!(
                    r#"<input name="{}" type="number" step="{step}" value="{}">"#,
                    p.key,
                    esc(&plain)
                ),
                Widget::Text => format!(r#"<input name="{}" value="{}">"#, p.key, esc(&plain)),
                Widget::Secret => format!(
                    r#"<input name="{}" type="password" placeholder="{}">"#,
                    p.key,
                    esc(&display_value(p.key, current))
                ),
                Widget::Switch => {
                    let (unset, on, off) = match current.filter(|v| !v.is_null()) {
                        None => (UNSET_OPTION, "", ""),
                        Some(v) if is_truthy(v) => ("", " selected", ""),
                        Some(_) => ("", "", " selected"),
                    };
                    format!(
                        r#"<select name="{}">{unset}<option value="on"{on}>on</option><option value="off"{off}>off</option></select>"#,
                        p.key
                    )
                }
                Widget::Select { options } => {
                    let mut s = format!(r#"<select name="{}">"#, p.key);
                    if !options.iter().any(|o| plain.eq_ignore_ascii_case(o)) {
                        s.push_str(UNSET_OPTION);
                    }
                    for o in options {
                        let sel = if plain.eq_ignore_ascii_case(o) { " selected" } else { "" };
                        let _ = write!(s, r#"<option value="{o}"{sel}>{o}</option>"#);
                    }
                    s.push_str("</select>");
                    s
                }
            };
            let _ = write!(out, "<tr><td>{}</td><td>{input}</td></tr>", esc(p.label));
        }
        out.push_str("</table></details>");
    }
    let extra = uncategorized_keys(&view.settings);
    if !extra.is_empty() {
        out.push_str("<details><summary>Other</summary><table>");
        for k in extra {
            let _ = write!(
                out,
                "<tr><td class=\"mono\">{}</td><td>{}</td></tr>",
                esc(k),
                esc(&display_value(k, view.settings.get(k)))
            );
        }
        out.push_str("</table></details>");
    }
    out.push_str("<button>Save</button></form></section>");
    out
}

fn render_reputation(view: &DashboardView) -> String {
    let mut out = String::from(
        r#"<section class="card"><h2>Reputation database</h2>
<form method="post" action="/actions/reputation">
<input name="wallet_id" placeholder="Wallet id" required>
<input name="tags" placeholder="scam, rugpull, trusted">
<input name="behavior" placeholder="malicious, legitimate">
<input name="score" type="number" step="0.01" min="0" max="1" placeholder="0.0-1.0" required>
<button>Add entry</button></form>
<table><tr><th>Wallet</th><th>Public IP</th><th>Tags</th><th>Behavior</th><th>Score</th></tr>"#,
    );
    if view.reputation.is_empty() {
        out.push_str(r#"<tr><td colspan="5" class="muted">No reputation entries found</td></tr>"#);
    }
    for e in &view.reputation {
        let _ = write!(
            out,
            r#"<tr><td class="mono">{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td></tr>"#,
            esc(&e.wallet_id),
            esc(&fmt_opt(e.ip_publique.as_deref())),
            esc(&e.tags.join(", ")),
            esc(&fmt_opt(e.comportement.as_deref())),
            e.score_de_confiance
        );
    }
    out.push_str("</table></section>");
    out
}

// ---- JSON ----

async fn api_view(State(st): State<DashboardState>) -> impl IntoResponse {
    Json(st.refresher.view())
}

#[derive(Deserialize)]
struct LimitQ {
    limit: Option<usize>,
}

async fn api_alerts(State(st): State<DashboardState>, Query(q): Query<LimitQ>) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(50).min(st.settings.alert_history_limit);
    match st.refresher.store().fetch_alerts(limit) {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn api_health(State(st): State<DashboardState>) -> impl IntoResponse {
    let health = st
        .refresher
        .store()
        .fetch_runtime_statuses()
        .unwrap_or_else(|_| serde_json::json!({}));
    Json(serde_json::json!({ "ts": now_ts(), "components": health }))
}

// ---- Form actions; every one redirects back to the page ----

fn back() -> Redirect {
    Redirect::to("/")
}

async fn action_refresh(State(st): State<DashboardState>) -> Redirect {
    st.refresher.refresh_all().await;
    back()
}

async fn action_refresh_tokens(State(st): State<DashboardState>) -> Redirect {
    st.refresher.refresh_held_tokens().await;
    back()
}

async fn action_settings(
    State(st): State<DashboardState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Redirect {
    let current = st.refresher.view().settings;
    let mut edits = Vec::new();
    for (key, raw) in fields {
        // Blank inputs leave the value untouched (secrets are never echoed back).
        if raw.trim().is_empty() {
            continue;
        }
        match coerce(&key, &raw) {
            Ok(v) if !same_setting(&key, current.get(&key), &v) => edits.push((key, v)),
            Ok(_) => {}
            Err(e) => {
                st.refresher.reject_input("save settings", e);
                return back();
            }
        }
    }
    if edits.is_empty() {
        return back();
    }
    if let Err(e) = st.refresher.save_settings(edits).await {
        log::warn!("dashboard.settings_failed err={:#}", e);
    }
    back()
}

#[derive(Deserialize)]
struct ReputationForm {
    wallet_id: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    behavior: String,
    score: String,
}

async fn action_reputation(State(st): State<DashboardState>, Form(f): Form<ReputationForm>) -> Redirect {
    match NewReputationEntry::from_form(&f.wallet_id, &f.tags, &f.behavior, &f.score) {
        Ok(entry) => {
            if let Err(e) = st.refresher.add_reputation(entry).await {
                log::warn!("dashboard.reputation_failed err={:#}", e);
            }
        }
        Err(e) => st.refresher.reject_input("add reputation entry", e),
    }
    back()
}

#[derive(Deserialize)]
struct KeyForm {
    key: String,
}

async fn action_gemini_key(State(st): State<DashboardState>, Form(f): Form<KeyForm>) -> Redirect {
    if f.key.trim().is_empty() {
        st.refresher.reject_input("update gemini api key", "key is empty");
    } else if let Err(e) = st.refresher.update_gemini_api_key(f.key.trim()).await {
        log::warn!("dashboard.gemini_key_failed err={:#}", e);
    }
    back()
}

#[derive(Deserialize)]
struct ToggleForm {
    enabled: String,
}

async fn action_trustwallet(State(st): State<DashboardState>, Form(f): Form<ToggleForm>) -> Redirect {
    let enabled = matches!(f.enabled.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on");
    if let Err(e) = st.refresher.set_trustwallet_validation(enabled).await {
        log::warn!("dashboard.trustwallet_failed err={:#}", e);
    }
    back()
}

#[derive(Deserialize)]
struct AmountForm {
    amount: String,
}

async fn action_initial_capital(State(st): State<DashboardState>, Form(f): Form<AmountForm>) -> Redirect {
    match parse_capital(&f.amount) {
        Ok(amount) => {
            if let Err(e) = st.refresher.set_initial_capital(amount).await {
                log::warn!("dashboard.capital_failed err={:#}", e);
            }
        }
        Err(e) => st.refresher.reject_input("set initial capital", e),
    }
    back()
}

async fn action_test_mode(State(st): State<DashboardState>) -> Redirect {
    if let Err(e) = st.refresher.toggle_test_mode().await {
        log::warn!("dashboard.test_mode_failed err={:#}", e);
    }
    back()
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn action_login(State(st): State<DashboardState>, Form(f): Form<LoginForm>) -> Redirect {
    match st.refresher.login(&f.username, &f.password).await {
        Ok(()) => {
            st.refresher.refresh_all().await;
        }
        Err(e) => log::warn!("dashboard.login_failed err={:#}", e),
    }
    back()
}

async fn action_logout(State(st): State<DashboardState>) -> Redirect {
    if let Err(e) = st.refresher.logout() {
        log::warn!("dashboard.logout_failed err={:#}", e);
    }
    back()
}
