use std::collections::HashMap;

use anyhow::Result;
use uuid::Uuid;

use crate::{
    classifier::TokenStatus,
    refresher::TokenRow,
    store::{AlertRecord, SqliteStore},
};

/// Remembers the last status of every held token so that a sale alert fires
/// once when a token enters an exit status, not on every refresh.
pub struct AlertTracker {
    last: HashMap<String, TokenStatus>,
    store: Option<SqliteStore>,
    history_limit: usize,
}

impl AlertTracker {
    #[cfg(test)]
    pub fn new(history_limit: usize) -> Self {
        Self {
            last: HashMap::new(),
            store: None,
            history_limit,
        }
    }

    /// Tracker seeded from (and persisting to) the store.
    pub fn with_store(store: SqliteStore, history_limit: usize) -> Result<Self> {
        let last = store.fetch_token_statuses()?;
        Ok(Self {
            last,
            store: Some(store),
            history_limit,
        })
    }

    #[cfg(test)]
    pub fn last_status(&self, mint: &str) -> Option<TokenStatus> {
        self.last.get(mint).copied()
    }

    /// Evaluate one refresh worth of classified rows.
    pub fn evaluate(&mut self, rows: &[TokenRow], ts: f64) -> Vec<AlertRecord> {
        let mut next: HashMap<String, TokenStatus> = HashMap::with_capacity(rows.len());
        let mut fired = Vec::new();

        for row in rows {
            // Rows that failed classification keep whatever was known before.
            let Some(class) = row.classification.as_ref() else {
                if let Some(prev) = self.last.get(&row.token.token_mint_address) {
                    next.insert(row.token.token_mint_address.clone(), *prev);
                }
                continue;
            };
            let mint = &row.token.token_mint_address;
            let prev = self.last.get(mint).copied();
            if class.status.is_exit() && prev != Some(class.status) {
                log::warn!(
                    "alert.sale mint={} status={} reason={}",
                    mint,
                    class.status,
                    class.reason
                );
                fired.push(AlertRecord {
                    alert_id: Uuid::new_v4().to_string(),
                    ts,
                    mint: mint.clone(),
                    status: class.status.label().to_string(),
                    reason: class.reason.clone(),
                });
            }
            next.insert(mint.clone(), class.status);
        }

        self.last = next;

        if let Some(store) = &self.store {
            for a in &fired {
                if let Err(e) = store.insert_alert(a) {
                    log::error!("alert.persist_failed mint={} err={}", a.mint, e);
                }
            }
            if let Err(e) = store.replace_token_statuses(&self.last, ts) {
                log::error!("alert.status_persist_failed err={}", e);
            }
            if !fired.is_empty() {
                store.prune_alerts(self.history_limit).ok();
            }
        }

        fired
    }
}
