//! In-process fake of the trading bot backend for async tests.

use std::sync::Arc;

use axum::{
    extract::{Form, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

pub const GOOD_TOKEN: &str = "good-token";

#[derive(Default)]
pub struct BackendData {
    pub dashboard: JsonValue,
    pub held_tokens: JsonValue,
    pub trades: JsonValue,
    pub reputation: Vec<JsonValue>,
    pub settings: JsonValue,
    pub wallet_balance: f64,
    pub fail_trades: bool,
    pub revoked: bool,
    pub posted: Vec<(String, JsonValue)>,
}

impl BackendData {
    pub fn sample() -> Self {
        Self {
            dashboard: json!({
                "sol_balance": 1.25,
                "rpc_latency": 87.5,
                "tokens_scanned": 42,
                "trades_executed": 7,
                "ai_analysis_status": "idle",
                "system_health": "ok"
            }),
            held_tokens: json!([
                {"token_mint_address": "TPmint", "buy_price": 100.0, "current_price": 250.0, "max_price": 250.0},
                {"token_mint_address": "TSmint", "buy_price": 100.0, "current_price": 80.0, "max_price": 120.0,
                 "price_history": [100.0, 120.0, 80.0]},
                {"token_mint_address": "OKmint", "buy_price": 100.0, "current_price": 150.0, "max_price": 150.0}
            ]),
            trades: json!([
                {"id": 1, "timestamp": "2024-01-01T00:00:00Z", "token_mint_address": "TPmint",
                 "action": "BUY", "price": 100.0, "amount": 0.01, "profit": 0.0}
            ]),
            reputation: vec![json!({
                "wallet_id": "W1", "ip_publique": null, "tags": "trusted",
                "comportement": "legitimate", "score_de_confiance": 0.9
            })],
            settings: json!({
                "SELL_MULTIPLIER": 2.0,
                "TRAILING_STOP_PERCENT": "0.15",
                "SIMULATION_MODE": false,
                "LOG_LEVEL": "INFO"
            }),
            wallet_balance: 1.25,
            ..Default::default()
        }
    }
}

type Shared = Arc<Mutex<BackendData>>;

pub struct FakeBackend {
    pub url: String,
    pub data: Shared,
}

impl FakeBackend {
    pub fn posted(&self) -> Vec<(String, JsonValue)> {
        self.data.lock().posted.clone()
    }
}

pub async fn spawn_backend(data: BackendData) -> FakeBackend {
    let data: Shared = Arc::new(Mutex::new(data));

    let api = Router::new()
        .route("/api/dashboard", get(|State(d): State<Shared>| async move { Json(d.lock().dashboard.clone()) }))
        .route("/api/held-tokens", get(|State(d): State<Shared>| async move { Json(d.lock().held_tokens.clone()) }))
        .route("/api/trade-history", get(trade_history))
        .route("/api/reputation-db", get(|State(d): State<Shared>| async move { Json(JsonValue::Array(d.lock().reputation.clone())) }))
        .route("/api/manual-reputation-entry", post(add_reputation))
        .route("/api/settings", get(|State(d): State<Shared>| async move { Json(d.lock().settings.clone()) }).post(save_settings))
        .route("/api/trustwallet-validation", post(record_ok))
        .route("/api/gemini-api-key", post(record_ok))
        .route("/api/decision/set_initial_capital", post(set_initial_capital))
        .route("/api/test-mode", get(|| async { Json(json!({"message": "Mode test activé/désactivé"})) }))
        .route_layer(middleware::from_fn_with_state(data.clone(), require_bearer));

    let app = Router::new()
        .route("/token", post(login))
        .merge(api)
        .with_state(data.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeBackend {
        url: format!("http://{addr}"),
        data,
    }
}

async fn require_bearer(State(d): State<Shared>, req: Request, next: Next) -> Response {
    let expected = format!("Bearer {GOOD_TOKEN}");
    let ok = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);
    if !ok || d.lock().revoked {
        return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Not authenticated"}))).into_response();
    }
    next.run(req).await
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login(Form(f): Form<LoginForm>) -> Response {
    if f.username == "admin" && f.password == "secret" {
        Json(json!({"access_token": GOOD_TOKEN, "token_type": "bearer"})).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Nom d'utilisateur ou mot de passe incorrect"})),
        )
            .into_response()
    }
}

async fn trade_history(State(d): State<Shared>) -> Response {
    let d = d.lock();
    if d.fail_trades {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"}))).into_response();
    }
    Json(d.trades.clone()).into_response()
}

async fn add_reputation(State(d): State<Shared>, Json(body): Json<JsonValue>) -> Response {
    let score = body.get("score_de_confiance").and_then(|v| v.as_f64()).unwrap_or(-1.0);
    if !(0.0..=1.0).contains(&score) {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "score out of range"}))).into_response();
    }
    let mut d = d.lock();
    d.posted.push(("/api/manual-reputation-entry".to_string(), body.clone()));
    d.reputation.push(body);
    Json(json!({"message": "Entrée ajoutée à la base de données de réputation"})).into_response()
}

async fn save_settings(State(d): State<Shared>, Json(body): Json<JsonValue>) -> Response {
    let mut d = d.lock();
    d.posted.push(("/api/settings".to_string(), body.clone()));
    d.settings = body;
    Json(json!({"message": "ok"})).into_response()
}

async fn record_ok(State(d): State<Shared>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let bytes = match axum::body::to_bytes(req.into_body(), 64 * 1024).await {
        Ok(b) => b,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let body: JsonValue = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    d.lock().posted.push((path, body));
    Json(json!({"message": "ok"})).into_response()
}

async fn set_initial_capital(State(d): State<Shared>, Json(body): Json<JsonValue>) -> Response {
    let mut d = d.lock();
    d.posted.push(("/api/decision/set_initial_capital".to_string(), body.clone()));
    let Some(amount) = body.get("amount").and_then(|v| v.as_f64()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "amount required"}))).into_response();
    };
    if amount > d.wallet_balance {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Solde insuffisant sur TrustWallet ({:.2} SOL)", d.wallet_balance)})),
        )
            .into_response();
    }
    Json(json!({"status": "ok", "capital": amount})).into_response()
}
