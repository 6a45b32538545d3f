/// Redis-backed `SharedStore`. Uses `ConnectionManager` for an
/// auto-reconnecting async connection and `redis::Script` for the two
/// operations that must evaluate a kill-check and a set-if-absent (or a
/// read-then-write) atomically: `acquire_lock` and `allow_and_increment`.
/// All other operations are single native Redis commands, already atomic.
use super::{AlertRecord, LockOutcome, SharedStore};
use crate::error::{EngineError, Result};
use crate::types::{AlertConfig, Position};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

const ACQUIRE_LOCK_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 then
    return -2
end
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('SET', KEYS[1], '1', 'PX', ARGV[1])
return 1
"#;

const ALLOW_AND_INCREMENT_SCRIPT: &str = r#"
local limit = tonumber(ARGV[1])
if limit <= 0 then
    return 1
end
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= limit then
    return 0
end
local newval = redis.call('INCR', KEYS[1])
if newval == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 1
"#;

pub struct RedisSharedStore {
    conn: ConnectionManager,
    acquire_lock_script: Script,
    allow_and_increment_script: Script,
}

impl RedisSharedStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| EngineError::StoreError(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| EngineError::StoreError(format!("redis connect failed: {e}")))?;
        Ok(Self {
            conn,
            acquire_lock_script: Script::new(ACQUIRE_LOCK_SCRIPT),
            allow_and_increment_script: Script::new(ALLOW_AND_INCREMENT_SCRIPT),
        })
    }

    fn positions_key(user: &str) -> String {
        format!("positions:{}", user)
    }

    fn alerts_key(user: &str) -> String {
        format!("alerts:{}", user)
    }

    fn alert_configs_key(user: &str) -> String {
        format!("cfg:alerts:{}", user)
    }

    fn kill_key(user: &str) -> String {
        format!("kill:{}", user)
    }

    fn open_key(user: &str, symbol: &str) -> String {
        format!("open:{}:{}", user, symbol)
    }
}

fn store_err(e: redis::RedisError) -> EngineError {
    EngineError::StoreError(e.to_string())
}

#[async_trait]
impl SharedStore for RedisSharedStore {
    async fn acquire_lock(&self, lock_key: &str, kill_key: &str, ttl_ms: u64) -> Result<LockOutcome> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .acquire_lock_script
            .key(lock_key)
            .key(kill_key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(match result {
            -2 => LockOutcome::KillEngaged,
            0 => LockOutcome::Busy,
            _ => LockOutcome::Acquired,
        })
    }

    async fn release_lock(&self, lock_key: &str) {
        let mut conn = self.conn.clone();
        // best-effort: never fails the caller (spec §4.1)
        let _: std::result::Result<(), redis::RedisError> = conn.del(lock_key).await;
    }

    async fn allow_and_increment(&self, counter_key: &str, limit: u32, ttl_s: i64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .allow_and_increment_script
            .key(counter_key)
            .arg(limit)
            .arg(ttl_s)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(result == 1)
    }

    async fn set_open(&self, user: &str, symbol: &str, id: &str, ttl_s: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::open_key(user, symbol), id, ttl_s as u64)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_open(&self, user: &str, symbol: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(Self::open_key(user, symbol)).await.map_err(store_err)?;
        Ok(value)
    }

    async fn clear_open(&self, user: &str, symbol: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::open_key(user, symbol)).await.map_err(store_err)?;
        Ok(())
    }

    async fn upsert_position(&self, user: &str, position: &Position) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(position)?;
        conn.hset::<_, _, _, ()>(Self::positions_key(user), &position.symbol, json)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete_position(&self, user: &str, symbol: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(Self::positions_key(user), symbol)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn list_positions(&self, user: &str) -> Result<Vec<Position>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(Self::positions_key(user)).await.map_err(store_err)?;
        let mut positions = Vec::with_capacity(raw.len());
        for json in raw {
            positions.push(serde_json::from_str(&json)?);
        }
        Ok(positions)
    }

    async fn save_alert(&self, user: &str, record: &AlertRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::alerts_key(user);
        let raw: Vec<String> = conn.lrange(&key, 0, 199).await.map_err(store_err)?;
        let mut kept = Vec::with_capacity(raw.len() + 1);
        for json in raw {
            let existing: AlertRecord = serde_json::from_str(&json)?;
            if !(existing.alert_name == record.alert_name && existing.time == record.time) {
                kept.push(json);
            }
        }
        kept.insert(0, serde_json::to_string(record)?);
        kept.truncate(200);
        let _: () = conn.del(&key).await.map_err(store_err)?;
        conn.rpush::<_, _, ()>(&key, kept).await.map_err(store_err)?;
        Ok(())
    }

    async fn get_recent_alerts(&self, user: &str, limit: usize) -> Result<Vec<AlertRecord>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(Self::alerts_key(user), 0, limit.saturating_sub(1) as isize)
            .await
            .map_err(store_err)?;
        let mut records = Vec::with_capacity(raw.len());
        for json in raw {
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
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
        let mut conn = self.conn.clone();
        let key = Self::alerts_key(user);
        let raw: Vec<String> = conn.lrange(&key, 0, 199).await.map_err(store_err)?;
        let mut updated = Vec::with_capacity(raw.len());
        for json in raw {
            let mut record: AlertRecord = serde_json::from_str(&json)?;
            if record.alert_name == alert_name && record.time == time {
                for result in record.results.iter_mut() {
                    if result.symbol == symbol {
                        result.status = new_status.to_string();
                        result.reason = reason.map(|r| r.to_string());
                    }
                }
            }
            updated.push(serde_json::to_string(&record)?);
        }
        let _: () = conn.del(&key).await.map_err(store_err)?;
        if !updated.is_empty() {
            conn.rpush::<_, _, ()>(&key, updated).await.map_err(store_err)?;
        }
        Ok(())
    }

    async fn is_kill(&self, user: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::kill_key(user)).await.map_err(store_err)?;
        Ok(exists)
    }

    async fn set_kill(&self, user: &str, enabled: bool) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::kill_key(user);
        if enabled {
            // expires at next trading-day rollover; a flat 24h TTL is the
            // conservative upper bound used until a rollover scheduler
            // recomputes the precise boundary.
            conn.set_ex::<_, _, ()>(&key, "1", 24 * 3600).await.map_err(store_err)?;
        } else {
            let _: () = conn.del(&key).await.map_err(store_err)?;
        }
        Ok(())
    }

    async fn save_alert_config(&self, user: &str, config: &AlertConfig) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(config)?;
        conn.hset::<_, _, _, ()>(Self::alert_configs_key(user), &config.normalized_name, json)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_alert_config(&self, user: &str, name_variants: &[String]) -> Result<Option<AlertConfig>> {
        let mut conn = self.conn.clone();
        let key = Self::alert_configs_key(user);
        for variant in name_variants {
            let found: Option<String> = conn.hget(&key, variant).await.map_err(store_err)?;
            if let Some(json) = found {
                return Ok(Some(serde_json::from_str(&json)?));
            }
        }
        Ok(None)
    }

    async fn list_alert_configs(&self, user: &str) -> Result<Vec<AlertConfig>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(Self::alert_configs_key(user)).await.map_err(store_err)?;
        let mut configs = Vec::with_capacity(raw.len());
        for json in raw {
            configs.push(serde_json::from_str(&json)?);
        }
        Ok(configs)
    }

    async fn delete_alert_config(&self, user: &str, normalized_name: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(Self::alert_configs_key(user), normalized_name)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
