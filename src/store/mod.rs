/// Shared Store contracts (spec §4.1): a durable key-value backend with
/// atomic scripted operations, giving cross-process safety for locks,
/// counters, the open-guard, and position/alert/config snapshots.
mod memory_store;
mod redis_store;

pub use memory_store::InMemorySharedStore;
pub use redis_store::RedisSharedStore;

use crate::error::Result;
use crate::types::{AlertConfig, Position};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of `acquire_lock`: mirrors the -2/0/1 script return values so
/// callers can match on it the way the atomic script's caller would.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    KillEngaged,
    Busy,
    Acquired,
}

/// One symbol's outcome within an alert, as recorded in alert history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolResult {
    pub symbol: String,
    pub status: String,
    pub reason: Option<String>,
    pub order_id: Option<String>,
    pub trade_id: Option<String>,
    pub qty: Option<i64>,
    pub side: Option<String>,
    pub product: Option<String>,
    pub ltp: Option<f64>,
    pub pct: Option<f64>,
}

impl SymbolResult {
    pub fn received(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: "RECEIVED".to_string(),
            reason: None,
            order_id: None,
            trade_id: None,
            qty: None,
            side: None,
            product: None,
            ltp: None,
            pct: None,
        }
    }
}

/// One alert-history row: the input plus one `SymbolResult` per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_name: String,
    pub raw_name: String,
    pub time: DateTime<Utc>,
    pub results: Vec<SymbolResult>,
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    // -- locks --
    async fn acquire_lock(&self, lock_key: &str, kill_key: &str, ttl_ms: u64) -> Result<LockOutcome>;
    async fn release_lock(&self, lock_key: &str);

    // -- counters --
    async fn allow_and_increment(&self, counter_key: &str, limit: u32, ttl_s: i64) -> Result<bool>;

    // -- open-guard --
    async fn set_open(&self, user: &str, symbol: &str, id: &str, ttl_s: i64) -> Result<()>;
    async fn get_open(&self, user: &str, symbol: &str) -> Result<Option<String>>;
    async fn clear_open(&self, user: &str, symbol: &str) -> Result<()>;

    // -- position snapshots --
    async fn upsert_position(&self, user: &str, position: &Position) -> Result<()>;
    async fn delete_position(&self, user: &str, symbol: &str) -> Result<()>;
    async fn list_positions(&self, user: &str) -> Result<Vec<Position>>;

    // -- alert history --
    async fn save_alert(&self, user: &str, record: &AlertRecord) -> Result<()>;
    async fn get_recent_alerts(&self, user: &str, limit: usize) -> Result<Vec<AlertRecord>>;
    async fn update_alert_status(
        &self,
        user: &str,
        time: DateTime<Utc>,
        alert_name: &str,
        symbol: &str,
        new_status: &str,
        reason: Option<&str>,
    ) -> Result<()>;

    // -- kill switch --
    async fn is_kill(&self, user: &str) -> Result<bool>;
    async fn set_kill(&self, user: &str, enabled: bool) -> Result<()>;

    // -- alert config --
    async fn save_alert_config(&self, user: &str, config: &AlertConfig) -> Result<()>;
    async fn get_alert_config(&self, user: &str, name_variants: &[String]) -> Result<Option<AlertConfig>>;
    async fn list_alert_configs(&self, user: &str) -> Result<Vec<AlertConfig>>;
    async fn delete_alert_config(&self, user: &str, normalized_name: &str) -> Result<()>;
}

pub fn lock_key(user: &str, symbol: &str, action: &str) -> String {
    format!("lock:{}:{}:{}", user, symbol, action)
}

pub fn kill_key(user: &str) -> String {
    format!("kill:{}", user)
}

pub fn counter_key(user: &str, yyyymmdd: &str, alert: &str) -> String {
    format!("count:{}:{}:{}", user, yyyymmdd, alert)
}
