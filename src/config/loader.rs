/// Configuration loading: TOML file as the base layer, environment
/// variables (`TRADE_ENGINE__<FIELD>`) as an overlay, matching the
/// teacher's layered-config idiom.
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::types::EngineConfig;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .add_source(config::Environment::with_prefix("TRADE_ENGINE").separator("__"));

    let settings = builder
        .build()
        .map_err(|e| EngineError::ConfigError(format!("failed to build config: {e}")))?;

    let cfg: EngineConfig = settings
        .try_deserialize()
        .map_err(|e| EngineError::ConfigError(format!("failed to parse config: {e}")))?;

    validate_config(&cfg)?;
    Ok(cfg)
}

fn validate_config(cfg: &EngineConfig) -> Result<()> {
    if cfg.redis_url.is_empty() {
        return Err(EngineError::ConfigError("redis_url is empty".to_string()));
    }
    if cfg.venue_exchange.is_empty() {
        return Err(EngineError::ConfigError("venue_exchange is empty".to_string()));
    }
    if cfg.entry_lock_ttl_ms == 0 || cfg.exit_lock_ttl_ms == 0 {
        return Err(EngineError::ConfigError("lock TTLs must be > 0".to_string()));
    }
    if cfg.ltp_wait_poll_ms == 0 || cfg.ltp_wait_poll_ms > cfg.ltp_wait_timeout_ms {
        return Err(EngineError::ConfigError(
            "ltp_wait_poll_ms must be > 0 and <= ltp_wait_timeout_ms".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
        redis_url = "redis://127.0.0.1:6379"
        entry_lock_ttl_ms = 2000
        exit_lock_ttl_ms = 2500
        counter_grace_hours = 6
        ltp_wait_timeout_ms = 300
        ltp_wait_poll_ms = 50
        snapshot_throttle_ms = 800
        monitoring_log_throttle_ms = 10000
        sector_summary_throttle_s = 30
        tick_broadcast_throttle_ms = 100
        venue_exchange = "NSE"
        venue_timezone = "Asia/Kolkata"
        broker_api_key = "key"
        broker_api_secret = "secret"
        broker_access_token = "token"
        broker_ws_url = "wss://ws.kite.trade"
        paper_trading = false
        log_level = "info"
        "#
    }

    #[test]
    fn loads_valid_toml() {
        let path = std::env::temp_dir().join(format!("trade-engine-test-{}.toml", std::process::id()));
        std::fs::File::create(&path).unwrap().write_all(sample_toml().as_bytes()).unwrap();
        let cfg = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.venue_exchange, "NSE");
        assert_eq!(cfg.entry_lock_ttl_ms, 2000);
    }

    #[test]
    fn rejects_empty_redis_url() {
        let cfg = EngineConfig {
            redis_url: String::new(),
            entry_lock_ttl_ms: 2000,
            exit_lock_ttl_ms: 2500,
            counter_grace_hours: 6,
            ltp_wait_timeout_ms: 300,
            ltp_wait_poll_ms: 50,
            snapshot_throttle_ms: 800,
            monitoring_log_throttle_ms: 10_000,
            sector_summary_throttle_s: 30,
            tick_broadcast_throttle_ms: 100,
            venue_exchange: "NSE".to_string(),
            venue_timezone: "Asia/Kolkata".to_string(),
            broker_api_key: "key".to_string(),
            broker_api_secret: "secret".to_string(),
            broker_access_token: "token".to_string(),
            broker_ws_url: "wss://ws.kite.trade".to_string(),
            paper_trading: false,
            log_level: "info".to_string(),
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_inverted_ltp_poll_timeout() {
        let mut toml = sample_toml().replace("ltp_wait_poll_ms = 50", "ltp_wait_poll_ms = 500");
        toml.push('\n');
        let path = std::env::temp_dir().join(format!("trade-engine-test-bad-{}.toml", std::process::id()));
        std::fs::File::create(&path).unwrap().write_all(toml.as_bytes()).unwrap();
        let result = load_config(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}
