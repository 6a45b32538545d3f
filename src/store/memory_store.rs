/// In-process test double for `SharedStore`, reproducing the same
/// single-lock-covers-read-modify-write atomicity as the Redis scripts so
/// engine-level tests can exercise lock/counter semantics without a live
/// Redis. Grounded in the dual `InMemoryStore`/`RedisClientStore` split used
/// for the equivalent market-data store in the broader trading ecosystem.
use super::{AlertRecord, LockOutcome, SharedStore};
use crate::error::Result;
use crate::types::{AlertConfig, Position};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    locks: HashMap<String, Expiring<()>>,
    kills: HashMap<String, Expiring<()>>,
    counters: HashMap<String, Expiring<u32>>,
    open: HashMap<String, Expiring<String>>,
    positions: HashMap<String, HashMap<String, Position>>,
    alerts: HashMap<String, Vec<AlertRecord>>,
    alert_configs: HashMap<String, HashMap<String, AlertConfig>>,
}

pub struct InMemorySharedStore {
    inner: Mutex<Inner>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for InMemorySharedStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_expired<T>(entry: &Expiring<T>, now: DateTime<Utc>) -> bool {
    entry.expires_at > now
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn acquire_lock(&self, lock_key: &str, kill_key: &str, ttl_ms: u64) -> Result<LockOutcome> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        if inner
            .kills
            .get(kill_key)
            .is_some_and(|entry| not_expired(entry, now))
        {
            return Ok(LockOutcome::KillEngaged);
        }
        if inner
            .locks
            .get(lock_key)
            .is_some_and(|entry| not_expired(entry, now))
        {
            return Ok(LockOutcome::Busy);
        }
        inner.locks.insert(
            lock_key.to_string(),
            Expiring {
                value: (),
                expires_at: now + Duration::milliseconds(ttl_ms as i64),
            },
        );
        Ok(LockOutcome::Acquired)
    }

    async fn release_lock(&self, lock_key: &str) {
        let mut inner = self.inner.lock().await;
        inner.locks.remove(lock_key);
    }

    async fn allow_and_increment(&self, counter_key: &str, limit: u32, ttl_s: i64) -> Result<bool> {
        if limit == 0 {
            return Ok(true);
        }
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let current = inner
            .counters
            .get(counter_key)
            .filter(|entry| not_expired(entry, now))
            .map(|entry| entry.value)
            .unwrap_or(0);
        if current >= limit {
            return Ok(false);
        }
        inner.counters.insert(
            counter_key.to_string(),
            Expiring {
                value: current + 1,
                expires_at: now + Duration::seconds(ttl_s),
            },
        );
        Ok(true)
    }

    async fn set_open(&self, user: &str, symbol: &str, id: &str, ttl_s: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = format!("{}:{}", user, symbol);
        inner.open.insert(
            key,
            Expiring {
                value: id.to_string(),
                expires_at: Utc::now() + Duration::seconds(ttl_s),
            },
        );
        Ok(())
    }

    async fn get_open(&self, user: &str, symbol: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        let key = format!("{}:{}", user, symbol);
        let now = Utc::now();
        Ok(inner
            .open
            .get(&key)
            .filter(|entry| not_expired(entry, now))
            .map(|entry| entry.value.clone()))
    }

    async fn clear_open(&self, user: &str, symbol: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = format!("{}:{}", user, symbol);
        inner.open.remove(&key);
        Ok(())
    }

    async fn upsert_position(&self, user: &str, position: &Position) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .positions
            .entry(user.to_string())
            .or_default()
            .insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    async fn delete_position(&self, user: &str, symbol: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(map) = inner.positions.get_mut(user) {
            map.remove(symbol);
        }
        Ok(())
    }

    async fn list_positions(&self, user: &str) -> Result<Vec<Position>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .positions
            .get(user)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_alert(&self, user: &str, record: &AlertRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let list = inner.alerts.entry(user.to_string()).or_default();
        list.retain(|r| !(r.alert_name == record.alert_name && r.time == record.time));
        list.insert(0, record.clone());
        list.truncate(200);
        Ok(())
    }

    async fn get_recent_alerts(&self, user: &str, limit: usize) -> Result<Vec<AlertRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .alerts
            .get(user)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn update_alert_status(
        &self,
        user: &str,
        time: DateTime<Utc>,
        alert_name: &str,
        symbol: &str,
        new_status: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(list) = inner.alerts.get_mut(user) {
            for record in list.iter_mut() {
                if record.alert_name == alert_name && record.time == time {
                    for result in record.results.iter_mut() {
                        if result.symbol == symbol {
                            result.status = new_status.to_string();
                            result.reason = reason.map(|r| r.to_string());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn is_kill(&self, user: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        Ok(inner
            .kills
            .get(&kill_user_key(user))
            .is_some_and(|entry| not_expired(entry, now)))
    }

    async fn set_kill(&self, user: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = kill_user_key(user);
        if enabled {
            inner.kills.insert(
                key,
                Expiring {
                    value: (),
                    expires_at: Utc::now() + Duration::hours(24),
                },
            );
        } else {
            inner.kills.remove(&key);
        }
        Ok(())
    }

    async fn save_alert_config(&self, user: &str, config: &AlertConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .alert_configs
            .entry(user.to_string())
            .or_default()
            .insert(config.normalized_name.clone(), config.clone());
        Ok(())
    }

    async fn get_alert_config(&self, user: &str, name_variants: &[String]) -> Result<Option<AlertConfig>> {
        let inner = self.inner.lock().await;
        let Some(map) = inner.alert_configs.get(user) else {
            return Ok(None);
        };
        for variant in name_variants {
            if let Some(cfg) = map.get(variant) {
                return Ok(Some(cfg.clone()));
            }
        }
        Ok(None)
    }

    async fn list_alert_configs(&self, user: &str) -> Result<Vec<AlertConfig>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .alert_configs
            .get(user)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_alert_config(&self, user: &str, normalized_name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(map) = inner.alert_configs.get_mut(user) {
            map.remove(normalized_name);
        }
        Ok(())
    }
}

fn kill_user_key(user: &str) -> String {
    format!("kill:{}", user)
}
