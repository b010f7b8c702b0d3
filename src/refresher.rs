use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::{
    alerts::AlertTracker,
    api_client::{ApiClient, ApiError},
    classifier::{classify_token, Classification, SecurityThresholds},
    config::Settings,
    models::{
        filter_tokens, DashboardSnapshot, HeldToken, NewReputationEntry, ReputationEntry,
        SettingsMap, Trade,
    },
    settings_catalog::apply_edits,
    store::{AlertRecord, SqliteStore},
    utils::now_ts,
};

const RECENT_ALERTS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct TokenRow {
    pub token: HeldToken,
    pub classification: Option<Classification>,
    pub error: Option<String>,
}

pub fn classify_rows(tokens: &[HeldToken], thresholds: &SecurityThresholds) -> Vec<TokenRow> {
    tokens
        .iter()
        .map(|t| match classify_token(t, thresholds) {
            Ok(c) => TokenRow {
                token: t.clone(),
                classification: Some(c),
                error: None,
            },
            Err(e) => TokenRow {
                token: t.clone(),
                classification: None,
                error: Some(e.to_string()),
            },
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub ts: f64,
    pub level: NoticeLevel,
    pub text: String,
}

/// Everything the console shows. Each piece is owned by one fetch.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub snapshot: Option<DashboardSnapshot>,
    pub held_tokens: Vec<HeldToken>,
    pub rows: Vec<TokenRow>,
    pub trades: Vec<Trade>,
    pub reputation: Vec<ReputationEntry>,
    pub settings: SettingsMap,
    pub thresholds: SecurityThresholds,
    pub recent_alerts: Vec<AlertRecord>,
    pub notices: BTreeMap<String, Notice>,
    pub login_required: bool,
    pub last_refresh_ts: Option<f64>,
}

impl DashboardView {
    fn new(thresholds: SecurityThresholds, login_required: bool) -> Self {
        Self {
            snapshot: None,
            held_tokens: Vec::new(),
            rows: Vec::new(),
            trades: Vec::new(),
            reputation: Vec::new(),
            settings: SettingsMap::new(),
            thresholds,
            recent_alerts: Vec::new(),
            notices: BTreeMap::new(),
            login_required,
            last_refresh_ts: None,
        }
    }

    pub fn filtered_rows(&self, query: &str) -> Vec<TokenRow> {
        let keep: Vec<&str> = filter_tokens(&self.held_tokens, query)
            .into_iter()
            .map(|t| t.token_mint_address.as_str())
            .collect();
        self.rows
            .iter()
            .filter(|r| keep.contains(&r.token.token_mint_address.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Clone)]
pub struct ViewState {
    inner: Arc<RwLock<DashboardView>>,
}

impl ViewState {
    fn new(view: DashboardView) -> Self {
        Self {
            inner: Arc::new(RwLock::new(view)),
        }
    }

    pub fn snapshot(&self) -> DashboardView {
        self.inner.read().clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut DashboardView) -> R) -> R {
        f(&mut self.inner.write())
    }
}

#[derive(Debug, Default)]
pub struct RefreshReport {
    pub failures: usize,
    pub alerts: Vec<AlertRecord>,
}

pub struct Refresher {
    settings: Settings,
    api: ApiClient,
    store: SqliteStore,
    view: ViewState,
    tracker: Mutex<AlertTracker>,
}

impl Refresher {
    pub fn new(settings: Settings, api: ApiClient, store: SqliteStore) -> Result<Self> {
        let tracker = AlertTracker::with_store(store.clone(), settings.alert_history_limit)
            .context("load token statuses")?;
        let thresholds = SecurityThresholds::resolve(&settings, &SettingsMap::new());
        let mut view = DashboardView::new(thresholds, api.token().is_none());
        view.recent_alerts = store.fetch_alerts(RECENT_ALERTS).unwrap_or_default();
        Ok(Self {
            settings,
            api,
            store,
            view: ViewState::new(view),
            tracker: Mutex::new(tracker),
        })
    }

    pub fn view(&self) -> DashboardView {
        self.view.snapshot()
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn ok(&self, component: &str, message: &str) {
        self.store
            .upsert_runtime_status(component, "ok", message, None, now_ts())
            .ok();
        self.view.update(|v| {
            v.notices.remove(component);
            v.login_required = false;
        });
    }

    fn fail(&self, component: &str, err: &ApiError) {
        log::warn!("refresh.failed component={} err={}", component, err);
        let ts = now_ts();
        self.store
            .upsert_runtime_status(component, "error", "request_failed", Some(&err.to_string()), ts)
            .ok();
        if err.requires_login() {
            self.store.clear_session().ok();
        }
        self.view.update(|v| {
            v.notices.insert(
                component.to_string(),
                Notice {
                    ts,
                    level: NoticeLevel::Error,
                    text: err.to_string(),
                },
            );
            if err.requires_login() {
                v.login_required = true;
            }
        });
    }

    fn notice(&self, level: NoticeLevel, text: String) {
        self.view.update(|v| {
            v.notices.insert(
                "action".to_string(),
                Notice {
                    ts: now_ts(),
                    level,
                    text,
                },
            );
        });
    }

    /// Local input that never reached the backend.
    pub fn reject_input(&self, what: &str, err: impl std::fmt::Display) {
        log::warn!("input.rejected action={} err={}", what, err);
        self.notice(NoticeLevel::Error, format!("{what}: {err}"));
    }

    /// Record an action outcome as a notice and pass it through.
    fn report<T>(&self, what: &str, res: Result<T, ApiError>) -> Result<T> {
        match res {
            Ok(v) => {
                self.ok("action", what);
                self.notice(NoticeLevel::Ok, format!("{what}: done"));
                Ok(v)
            }
            Err(e) => {
                self.fail("action", &e);
                Err(anyhow::Error::new(e).context(what.to_string()))
            }
        }
    }

    /// Issue all reads concurrently, then classify and evaluate alerts once.
    pub async fn refresh_all(&self) -> RefreshReport {
        let (snapshot, tokens, trades, reputation, settings) = tokio::join!(
            self.api.dashboard(),
            self.api.held_tokens(),
            self.api.trade_history(),
            self.api.reputation_entries(),
            self.api.settings(),
        );

        let mut report = RefreshReport::default();
        match snapshot {
            Ok(s) => {
                self.view.update(|v| v.snapshot = Some(s));
                self.ok("dashboard", "loaded");
            }
            Err(e) => {
                report.failures += 1;
                self.fail("dashboard", &e);
            }
        }
        match trades {
            Ok(t) => {
                let msg = format!("{} trades", t.len());
                self.view.update(|v| v.trades = t);
                self.ok("trade_history", &msg);
            }
            Err(e) => {
                report.failures += 1;
                self.fail("trade_history", &e);
            }
        }
        match reputation {
            Ok(r) => {
                let msg = format!("{} entries", r.len());
                self.view.update(|v| v.reputation = r);
                self.ok("reputation", &msg);
            }
            Err(e) => {
                report.failures += 1;
                self.fail("reputation", &e);
            }
        }
        match settings {
            Ok(s) => self.apply_settings(s),
            Err(e) => {
                report.failures += 1;
                self.fail("settings", &e);
            }
        }
        match tokens {
            Ok(t) => report.alerts = self.apply_held_tokens(t),
            Err(e) => {
                report.failures += 1;
                self.fail("held_tokens", &e);
            }
        }

        let ts = now_ts();
        self.view.update(|v| v.last_refresh_ts = Some(ts));
        log::info!(
            "refresh.done failures={} alerts={}",
            report.failures,
            report.alerts.len()
        );
        report
    }

    /// Re-fetch only the held tokens (the table's refresh button).
    pub async fn refresh_held_tokens(&self) -> RefreshReport {
        match self.api.held_tokens().await {
            Ok(t) => RefreshReport {
                failures: 0,
                alerts: self.apply_held_tokens(t),
            },
            Err(e) => {
                self.fail("held_tokens", &e);
                RefreshReport {
                    failures: 1,
                    alerts: Vec::new(),
                }
            }
        }
    }

    pub async fn refresh_reputation(&self) -> bool {
        match self.api.reputation_entries().await {
            Ok(r) => {
                let msg = format!("{} entries", r.len());
                self.view.update(|v| v.reputation = r);
                self.ok("reputation", &msg);
                true
            }
            Err(e) => {
                self.fail("reputation", &e);
                false
            }
        }
    }

    pub async fn refresh_settings(&self) -> bool {
        match self.api.settings().await {
            Ok(s) => {
                self.apply_settings(s);
                true
            }
            Err(e) => {
                self.fail("settings", &e);
                false
            }
        }
    }

    fn apply_settings(&self, s: SettingsMap) {
        let thresholds = SecurityThresholds::resolve(&self.settings, &s);
        let msg = format!("{} keys", s.len());
        self.view.update(|v| {
            v.settings = s;
            v.thresholds = thresholds;
            // Display rows follow the new thresholds; alerts wait for fresh prices.
            v.rows = classify_rows(&v.held_tokens, &thresholds);
        });
        self.ok("settings", &msg);
    }

    fn apply_held_tokens(&self, tokens: Vec<HeldToken>) -> Vec<AlertRecord> {
        let thresholds = self.view.snapshot_thresholds();
        let rows = classify_rows(&tokens, &thresholds);
        let alerts = self.tracker.lock().evaluate(&rows, now_ts());
        let msg = format!("{} tokens", tokens.len());
        self.view.update(|v| {
            v.held_tokens = tokens;
            v.rows = rows;
            for a in alerts.iter().rev() {
                v.recent_alerts.insert(0, a.clone());
            }
            v.recent_alerts.truncate(RECENT_ALERTS);
        });
        self.ok("held_tokens", &msg);
        alerts
    }

    // ---- Actions ----

    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let tok = self.report("login", self.api.login(username, password).await)?;
        self.store
            .save_session(&tok.access_token, self.api.base_url(), now_ts())
            .context("save session")?;
        log::info!("session.login user={}", username);
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.api.set_token(None);
        self.store.clear_session().context("clear session")?;
        self.view.update(|v| v.login_required = true);
        log::info!("session.logout");
        Ok(())
    }

    /// Apply edits to the last fetched settings, save, then re-fetch.
    pub async fn save_settings(&self, edits: Vec<(String, serde_json::Value)>) -> Result<()> {
        let mut map = self.view.snapshot_settings();
        apply_edits(&mut map, edits);
        self.report("save settings", self.api.save_settings(&map).await)?;
        self.refresh_settings().await;
        Ok(())
    }

    /// Insert a reputation entry, then re-fetch the list.
    pub async fn add_reputation(&self, entry: NewReputationEntry) -> Result<()> {
        self.report("add reputation entry", self.api.add_reputation_entry(&entry).await)?;
        log::info!("reputation.added wallet={}", entry.wallet_id);
        self.refresh_reputation().await;
        Ok(())
    }

    pub async fn update_gemini_api_key(&self, key: &str) -> Result<()> {
        self.report("update gemini api key", self.api.update_gemini_api_key(key).await)?;
        Ok(())
    }

    pub async fn set_trustwallet_validation(&self, enabled: bool) -> Result<()> {
        self.report(
            "trustwallet auto-validation",
            self.api.set_trustwallet_validation(enabled).await,
        )?;
        log::info!("trustwallet.validation auto={}", enabled);
        Ok(())
    }

    pub async fn set_initial_capital(&self, amount: f64) -> Result<()> {
        self.report("set initial capital", self.api.set_initial_capital(amount).await)?;
        log::info!("capital.initial amount={}", amount);
        Ok(())
    }

    pub async fn toggle_test_mode(&self) -> Result<String> {
        let msg = self.report("toggle test mode", self.api.toggle_test_mode().await)?;
        Ok(msg.message.unwrap_or_default())
    }
}

impl ViewState {
    fn snapshot_thresholds(&self) -> SecurityThresholds {
        self.inner.read().thresholds
    }

    fn snapshot_settings(&self) -> SettingsMap {
        self.inner.read().settings.clone()
    }
}

/// Periodic refresh until Ctrl-C. `on_report` runs after every cycle.
pub async fn run_watch(
    refresher: Arc<Refresher>,
    refresh_secs: u64,
    mut on_report: impl FnMut(&RefreshReport),
) -> Result<()> {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(refresh_secs));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("watch.stop");
                return Ok(());
            }
        }
        let report = refresher.refresh_all().await;
        on_report(&report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::TokenStatus,
        testing::{spawn_backend, BackendData, GOOD_TOKEN},
    };

    struct Fixture {
        _dir: tempfile::TempDir,
        backend: crate::testing::FakeBackend,
        refresher: Refresher,
    }

    async fn fixture(data: BackendData, token: Option<&str>) -> Fixture {
        let backend = spawn_backend(data).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.sqlite");
        let settings = Settings::for_tests(&backend.url, path.to_str().unwrap());
        let store = SqliteStore::new(&settings.sqlite_path).unwrap();
        store.init_db().unwrap();
        let api = ApiClient::from_settings(&settings, token.map(str::to_string)).unwrap();
        let refresher = Refresher::new(settings, api, store).unwrap();
        Fixture {
            _dir: dir,
            backend,
            refresher,
        }
    }

    #[tokio::test]
    async fn refresh_all_populates_view_and_alerts_once() {
        let f = fixture(BackendData::sample(), Some(GOOD_TOKEN)).await;

        let report = f.refresher.refresh_all().await;
        assert_eq!(report.failures, 0);
        let mut alerted: Vec<&str> = report.alerts.iter().map(|a| a.mint.as_str()).collect();
        alerted.sort();
        assert_eq!(alerted, vec!["TPmint", "TSmint"]);

        let view = f.refresher.view();
        assert_eq!(view.snapshot.as_ref().unwrap().trades_executed, Some(7));
        assert_eq!(view.trades.len(), 1);
        assert_eq!(view.reputation[0].tags, vec!["trusted"]);
        assert_eq!(view.thresholds.trailing_stop_percent, 0.15);
        let statuses: Vec<TokenStatus> = view
            .rows
            .iter()
            .map(|r| r.classification.as_ref().unwrap().status)
            .collect();
        assert_eq!(
            statuses,
            vec![TokenStatus::TakeProfit, TokenStatus::TrailingStop, TokenStatus::Secure]
        );
        assert_eq!(view.recent_alerts.len(), 2);

        let again = f.refresher.refresh_all().await;
        assert!(again.alerts.is_empty());
        assert_eq!(f.refresher.store().fetch_alerts(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn one_failing_fetch_does_not_block_the_others() {
        let mut data = BackendData::sample();
        data.fail_trades = true;
        let f = fixture(data, Some(GOOD_TOKEN)).await;

        let report = f.refresher.refresh_all().await;
        assert_eq!(report.failures, 1);
        let view = f.refresher.view();
        assert!(view.trades.is_empty());
        assert_eq!(view.rows.len(), 3);
        assert!(view.notices["trade_history"].text.contains("boom"));
        assert!(!view.login_required);

        let health = f.refresher.store().fetch_runtime_statuses().unwrap();
        assert_eq!(health["trade_history"]["level"], "error");
        assert_eq!(health["held_tokens"]["level"], "ok");
    }

    #[tokio::test]
    async fn unauthorized_flags_login_and_drops_session() {
        let f = fixture(BackendData::sample(), Some(GOOD_TOKEN)).await;
        f.refresher
            .store()
            .save_session(GOOD_TOKEN, f.refresher.api().base_url(), 1.0)
            .unwrap();
        f.backend.data.lock().revoked = true;

        let report = f.refresher.refresh_all().await;
        assert_eq!(report.failures, 5);
        assert!(f.refresher.view().login_required);
        assert!(f
            .refresher
            .store()
            .load_session(f.refresher.api().base_url())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn login_then_refresh() {
        let f = fixture(BackendData::sample(), None).await;
        assert!(f.refresher.view().login_required);

        assert!(f.refresher.login("admin", "nope").await.is_err());
        f.refresher.login("admin", "secret").await.unwrap();
        let base = f.refresher.api().base_url().to_string();
        assert_eq!(
            f.refresher.store().load_session(&base).unwrap().as_deref(),
            Some(GOOD_TOKEN)
        );
        assert_eq!(f.refresher.refresh_all().await.failures, 0);
        assert!(!f.refresher.view().login_required);

        f.refresher.logout().unwrap();
        assert!(f.refresher.view().login_required);
        assert!(f.refresher.store().load_session(&base).unwrap().is_none());
    }

    #[tokio::test]
    async fn saving_settings_reclassifies_with_new_thresholds() {
        let f = fixture(BackendData::sample(), Some(GOOD_TOKEN)).await;
        f.refresher.refresh_all().await;

        // With a x1.4 take profit the 150/100 token is no longer Secure.
        f.refresher
            .save_settings(vec![("SELL_MULTIPLIER".to_string(), serde_json::json!(1.4))])
            .await
            .unwrap();
        let view = f.refresher.view();
        assert_eq!(view.thresholds.sell_multiplier, 1.4);
        assert_eq!(view.settings["LOG_LEVEL"], "INFO");
        let ok_row = view.rows.iter().find(|r| r.token.token_mint_address == "OKmint").unwrap();
        assert_eq!(ok_row.classification.as_ref().unwrap().status, TokenStatus::TakeProfit);

        // The alert only fires once fresh prices come in.
        let report = f.refresher.refresh_held_tokens().await;
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].mint, "OKmint");
    }

    #[tokio::test]
    async fn reputation_insert_refreshes_list() {
        let f = fixture(BackendData::sample(), Some(GOOD_TOKEN)).await;
        let entry = NewReputationEntry::from_form("W2", "scam", "malicious", "0.05").unwrap();
        f.refresher.add_reputation(entry).await.unwrap();
        let view = f.refresher.view();
        assert_eq!(view.reputation.len(), 2);
        assert_eq!(view.notices["action"].level, NoticeLevel::Ok);
    }

    #[tokio::test]
    async fn rejected_action_becomes_notice() {
        let f = fixture(BackendData::sample(), Some(GOOD_TOKEN)).await;
        let err = f.refresher.set_initial_capital(50.0).await.unwrap_err();
        assert!(format!("{err:#}").contains("Solde insuffisant"));
        let view = f.refresher.view();
        assert_eq!(view.notices["action"].level, NoticeLevel::Error);
    }

    #[test]
    fn unpriced_row_is_invalid_and_others_classify() {
        let tokens: Vec<HeldToken> = serde_json::from_str(
            r#"[
                {"token_mint_address":"A","buy_price":100.0,"current_price":250.0,"max_price":250.0},
                {"token_mint_address":"B","buy_price":null,"current_price":2.0,"max_price":2.0},
                {"token_mint_address":"C","buy_price":100.0,"current_price":null,"max_price":150.0}
            ]"#,
        )
        .unwrap();
        let rows = classify_rows(&tokens, &SecurityThresholds::default());
        assert_eq!(
            rows[0].classification.as_ref().unwrap().status,
            TokenStatus::TakeProfit
        );
        assert!(rows[1].classification.is_none());
        assert!(rows[1].error.as_deref().unwrap().contains("buy price"));
        assert!(rows[2].error.as_deref().unwrap().contains("current_price"));

        let mut tracker = AlertTracker::new(10);
        let alerts = tracker.evaluate(&rows, 1.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].mint, "A");
    }

    #[tokio::test]
    async fn search_filters_rows() {
        let f = fixture(BackendData::sample(), Some(GOOD_TOKEN)).await;
        f.refresher.refresh_held_tokens().await;
        let view = f.refresher.view();
        assert_eq!(view.filtered_rows("tsm").len(), 1);
        assert_eq!(view.filtered_rows("").len(), 3);
    }
}
