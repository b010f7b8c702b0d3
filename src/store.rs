 use std::collections::HashMap;
 use std::path::Path;

 use anyhow::{Context, Result};
 use rusqlite::{params, Connection, OptionalExtension};
 use serde::Serialize;
 use serde_json::Value as JsonValue;

 use crate::classifier::TokenStatus;

 #[derive(Debug, Clone, Serialize, PartialEq)]
 pub struct AlertRecord {
     pub alert_id: String,
     pub ts: f64,
     pub mint: String,
     pub status: String,
     pub reason: String,
 }

 #[derive(Clone)]
 pub struct SqliteStore {
     path: String,
 }

 impl SqliteStore {
     pub fn new(path: &str) -> Result<Self> {
         if path.trim().is_empty() {
             anyhow::bail!("SQLITE_PATH is empty");
         }
         if path != ":memory:" && !path.starts_with("file:") {
             if let Some(parent) = Path::new(path).parent() {
                 std::fs::create_dir_all(parent)
                     .with_context(|| format!("create sqlite parent dir for {path}"))?;
             }
         }

         // rusqlite::Connection is not Send/Sync; keep only the path and open
         // short-lived connections per operation.
         Ok(Self { path: path.to_string() })
     }

     pub fn path(&self) -> &str {
         &self.path
     }

     fn open_conn(&self) -> Result<Connection> {
         let conn = Connection::open(&self.path).with_context(|| format!("open sqlite {}", self.path))?;
         conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
         Ok(conn)
     }

     pub fn init_db(&self) -> Result<()> {
         let conn = self.open_conn()?;
         conn.execute_batch(
             r#"
 CREATE TABLE IF NOT EXISTS session (
   id INTEGER PRIMARY KEY CHECK (id = 1),
   token TEXT NOT NULL,
   base_url TEXT,
   ts REAL
 );

 CREATE TABLE IF NOT EXISTS alerts (
   alert_id TEXT PRIMARY KEY,
   ts REAL,
   mint TEXT,
   status TEXT,
   reason TEXT
 );

 CREATE INDEX IF NOT EXISTS idx_alerts_ts ON alerts(ts);

 CREATE TABLE IF NOT EXISTS token_status (
   mint TEXT PRIMARY KEY,
   status TEXT,
   ts REAL
 );

 CREATE TABLE IF NOT EXISTS runtime_status (
   component TEXT PRIMARY KEY,
   ts REAL,
   level TEXT,
   message TEXT,
   detail TEXT
 );
 "#,
         )?;
         Ok(())
     }

     // ---- Session ----

     pub fn save_session(&self, token: &str, base_url: &str, ts: f64) -> Result<()> {
         let conn = self.open_conn()?;
         conn.execute(
             r#"
 INSERT INTO session(id, token, base_url, ts) VALUES(1,?,?,?)
 ON CONFLICT(id) DO UPDATE SET token=excluded.token, base_url=excluded.base_url, ts=excluded.ts
 "#,
             params![token, base_url, ts],
         )?;
         Ok(())
     }

     /// Stored token, only if it was issued by the same backend.
     pub fn load_session(&self, base_url: &str) -> Result<Option<String>> {
         let conn = self.open_conn()?;
         let row = conn
             .query_row(
                 "SELECT token FROM session WHERE id = 1 AND base_url = ?",
                 params![base_url],
                 |r| r.get::<_, String>(0),
             )
             .optional()?;
         Ok(row)
     }

     pub fn clear_session(&self) -> Result<()> {
         let conn = self.open_conn()?;
         conn.execute("DELETE FROM session", [])?;
         Ok(())
     }

     // ---- Alerts ----

     pub fn insert_alert(&self, alert: &AlertRecord) -> Result<()> {
         let conn = self.open_conn()?;
         conn.execute(
             "INSERT OR REPLACE INTO alerts(alert_id, ts, mint, status, reason) VALUES(?,?,?,?,?)",
             params![alert.alert_id, alert.ts, alert.mint, alert.status, alert.reason],
         )?;
         Ok(())
     }

     /// Keep only the newest `keep` alerts.
     pub fn prune_alerts(&self, keep: usize) -> Result<usize> {
         let conn = self.open_conn()?;
         let n = conn.execute(
             "DELETE FROM alerts WHERE alert_id NOT IN (SELECT alert_id FROM alerts ORDER BY ts DESC LIMIT ?)",
             params![keep as i64],
         )?;
         Ok(n)
     }

     pub fn fetch_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>> {
         let conn = self.open_conn()?;
         let mut stmt = conn.prepare(
             "SELECT alert_id, ts, mint, status, reason FROM alerts ORDER BY ts DESC LIMIT ?",
         )?;
         let rows = stmt
             .query_map(params![limit as i64], |r| {
                 Ok(AlertRecord {
                     alert_id: r.get(0)?,
                     ts: r.get(1)?,
                     mint: r.get(2)?,
                     status: r.get(3)?,
                     reason: r.get(4)?,
                 })
             })?
             .collect::<std::result::Result<Vec<_>, _>>()?;
         Ok(rows)
     }

     // ---- Last known status per held token ----

     pub fn fetch_token_statuses(&self) -> Result<HashMap<String, TokenStatus>> {
         let conn = self.open_conn()?;
         let mut stmt = conn.prepare("SELECT mint, status FROM token_status")?;
         let mut out = HashMap::new();
         let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
         for row in rows {
             let (mint, status) = row?;
             if let Some(s) = TokenStatus::parse(&status) {
                 out.insert(mint, s);
             }
         }
         Ok(out)
     }

     /// Replace the status table with the current set of held tokens.
     pub fn replace_token_statuses(&self, statuses: &HashMap<String, TokenStatus>, ts: f64) -> Result<()> {
         let mut conn = self.open_conn()?;
         let tx = conn.transaction()?;
         tx.execute("DELETE FROM token_status", [])?;
         {
             let mut stmt = tx.prepare("INSERT INTO token_status(mint, status, ts) VALUES(?,?,?)")?;
             for (mint, status) in statuses {
                 stmt.execute(params![mint, status.label(), ts])?;
             }
         }
         tx.commit()?;
         Ok(())
     }

     // ---- Runtime status (one row per fetch/action component) ----

     pub fn upsert_runtime_status(
         &self,
         component: &str,
         level: &str,
         message: &str,
         detail: Option<&str>,
         ts: f64,
     ) -> Result<()> {
         let conn = self.open_conn()?;
         conn.execute(
             r#"
 INSERT INTO runtime_status(component, ts, level, message, detail)
 VALUES(?,?,?,?,?)
 ON CONFLICT(component) DO UPDATE SET
   ts=excluded.ts,
   level=excluded.level,
   message=excluded.message,
   detail=excluded.detail
 "#,
             params![component, ts, level, message, detail],
         )?;
         Ok(())
     }

     pub fn fetch_runtime_statuses(&self) -> Result<JsonValue> {
         let conn = self.open_conn()?;
         let mut stmt = conn.prepare(
             "SELECT component, ts, level, message, detail FROM runtime_status ORDER BY component",
         )?;
         let mut out = serde_json::Map::new();
         let rows = stmt.query_map([], |r| {
             Ok((
                 r.get::<_, String>(0)?,
                 serde_json::json!({
                     "ts": r.get::<_, f64>(1)?,
                     "level": r.get::<_, String>(2)?,
                     "message": r.get::<_, String>(3)?,
                     "detail": r.get::<_, Option<String>>(4)?,
                 }),
             ))
         })?;
         for row in rows {
             let (component, v) = row?;
             out.insert(component, v);
         }
         Ok(JsonValue::Object(out))
     }
 }

 #[cfg(test)]
 mod tests {
     use super::*;

     fn temp_store() -> (tempfile::TempDir, SqliteStore) {
         let dir = tempfile::tempdir().unwrap();
         let path = dir.path().join("nested/console.sqlite");
         let store = SqliteStore::new(path.to_str().unwrap()).unwrap();
         store.init_db().unwrap();
         (dir, store)
     }

     fn alert(id: &str, ts: f64) -> AlertRecord {
         AlertRecord {
             alert_id: id.to_string(),
             ts,
             mint: "M".to_string(),
             status: "Stop Loss".to_string(),
             reason: "profit x0.90 < x1.00".to_string(),
         }
     }

     #[test]
     fn session_is_scoped_to_backend_url() {
         let (_dir, store) = temp_store();
         assert!(store.load_session("http://a").unwrap().is_none());
         store.save_session("tok", "http://a", 1.0).unwrap();
         assert_eq!(store.load_session("http://a").unwrap().as_deref(), Some("tok"));
         assert!(store.load_session("http://b").unwrap().is_none());
         store.save_session("tok2", "http://a", 2.0).unwrap();
         assert_eq!(store.load_session("http://a").unwrap().as_deref(), Some("tok2"));
         store.clear_session().unwrap();
         assert!(store.load_session("http://a").unwrap().is_none());
     }

     #[test]
     fn alerts_newest_first_and_pruned() {
         let (_dir, store) = temp_store();
         for i in 0..5 {
             store.insert_alert(&alert(&format!("a{i}"), i as f64)).unwrap();
         }
         let rows = store.fetch_alerts(10).unwrap();
         assert_eq!(rows.len(), 5);
         assert_eq!(rows[0].alert_id, "a4");
         assert_eq!(store.prune_alerts(2).unwrap(), 3);
         let rows = store.fetch_alerts(10).unwrap();
         assert_eq!(rows.iter().map(|a| a.alert_id.as_str()).collect::<Vec<_>>(), vec!["a4", "a3"]);
     }

     #[test]
     fn token_statuses_replace_previous_set() {
         let (_dir, store) = temp_store();
         let mut m = HashMap::new();
         m.insert("A".to_string(), TokenStatus::StopLoss);
         m.insert("B".to_string(), TokenStatus::Secure);
         store.replace_token_statuses(&m, 1.0).unwrap();
         m.remove("A");
         store.replace_token_statuses(&m, 2.0).unwrap();
         let got = store.fetch_token_statuses().unwrap();
         assert_eq!(got.len(), 1);
         assert_eq!(got.get("B"), Some(&TokenStatus::Secure));
     }

     #[test]
     fn runtime_status_upserts() {
         let (_dir, store) = temp_store();
         store.upsert_runtime_status("held_tokens", "error", "fetch_failed", Some("boom"), 1.0).unwrap();
         store.upsert_runtime_status("held_tokens", "ok", "3 rows", None, 2.0).unwrap();
         let v = store.fetch_runtime_statuses().unwrap();
         assert_eq!(v["held_tokens"]["level"], "ok");
         assert!(v["held_tokens"]["detail"].is_null());
     }
 }
