/// Entry Path (spec §4.5): ordered guards, each returning a specific
/// `{status, reason}` tag on failure, culminating in a broker order
/// submission and Position construction on success.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::engine::TradeEngine;
use crate::order_worker::OrderJob;
use crate::outcome::{EntryOutcome, RejectReason, SkipReason};
use crate::store::{kill_key, lock_key, LockOutcome};
use crate::types::{AlertConfig, Direction, Position, PositionStatus, Product, Side};

impl TradeEngine {
    /// Runs every guard in spec order for a single symbol within one alert
    /// dispatch. Always releases the entry lock on the way out once held.
    pub async fn enter(self: &Arc<Self>, symbol: &str, alert_name: &str, cfg: &AlertConfig) -> EntryOutcome {
        // 1. Sector gate
        let sector = crate::stock_sector::get_sector(symbol);
        let passes_sector = {
            let ranker = self.sector.read().await;
            ranker.gate(cfg.sector_filter_on, sector, cfg.direction, cfg.top_n_sector)
        };
        if !passes_sector {
            return EntryOutcome::Skipped { reason: SkipReason::SectorFilter };
        }

        // 2. In-memory duplicate
        {
            let positions = self.positions.read().await;
            if let Some(existing) = positions.get(symbol) {
                if existing.status.is_active() {
                    return EntryOutcome::Skipped { reason: SkipReason::AlreadyOpen };
                }
            }
        }

        // 3. Cross-process duplicate
        match self.store.get_open(&self.user_id, symbol).await {
            Ok(Some(_)) => return EntryOutcome::Skipped { reason: SkipReason::AlreadyOpenRedis },
            Ok(None) => {}
            Err(e) => return EntryOutcome::Error { detail: e.to_string() },
        }

        // 4. Entry lock
        let lock_key = lock_key(&self.user_id, symbol, "entry");
        let kill_key = kill_key(&self.user_id);
        match self.store.acquire_lock(&lock_key, &kill_key, self.config.entry_lock_ttl_ms).await {
            Ok(LockOutcome::KillEngaged) => return EntryOutcome::Rejected { reason: RejectReason::KillSwitch },
            Ok(LockOutcome::Busy) => return EntryOutcome::Skipped { reason: SkipReason::EntryLockBusy },
            Ok(LockOutcome::Acquired) => {}
            Err(e) => return EntryOutcome::Error { detail: e.to_string() },
        }

        let outcome = self.enter_locked(symbol, alert_name, cfg, sector).await;
        self.store.release_lock(&lock_key).await;
        outcome
    }

    /// Everything after the entry lock is held (spec §4.5 steps 5-12).
    async fn enter_locked(
        self: &Arc<Self>,
        symbol: &str,
        alert_name: &str,
        cfg: &AlertConfig,
        sector: Option<&str>,
    ) -> EntryOutcome {
        // 5. Broker readiness
        if self.config.broker_api_key.is_empty() || self.config.broker_access_token.is_empty() {
            return EntryOutcome::Error { detail: "ZERODHA_NOT_CONNECTED".to_string() };
        }

        // 6. Direction/product compatibility
        if cfg.direction == Direction::Short && cfg.product == Product::Delivery {
            return EntryOutcome::Rejected { reason: RejectReason::CncShortNotAllowed };
        }

        // 7. Price discovery
        let ltp = self.wait_for_ltp(symbol, cfg.qty_mode).await;
        let ltp = match ltp {
            Some(ltp) => ltp,
            None => return EntryOutcome::Skipped { reason: SkipReason::NoLtpForCapitalQty },
        };

        // 8. Quantity
        let qty = match cfg.qty_mode {
            crate::types::QtyMode::FixedQty => cfg.qty.max(1),
            crate::types::QtyMode::FixedCapital => {
                if ltp <= 0.0 {
                    0
                } else {
                    (cfg.capital / ltp).floor() as i64
                }
            }
        };
        if qty <= 0 {
            return EntryOutcome::Rejected { reason: RejectReason::BadQty };
        }

        // 9. Per-alert daily capacity
        let today = Utc::now().format("%Y%m%d").to_string();
        let counter_key = crate::store::counter_key(&self.user_id, &today, &cfg.normalized_name);
        let ttl_s = self.seconds_to_next_day_with_grace();
        match self
            .store
            .allow_and_increment(&counter_key, cfg.trade_limit_per_day, ttl_s)
            .await
        {
            Ok(true) => {}
            Ok(false) => return EntryOutcome::Skipped { reason: SkipReason::TradeLimit },
            Err(e) => return EntryOutcome::Error { detail: e.to_string() },
        }

        // 10. Submit order
        let side = cfg.direction.entry_side();
        let job = OrderJob::PlaceOrder {
            exchange: self.config.venue_exchange.clone(),
            tradingsymbol: symbol.to_string(),
            side,
            quantity: qty,
            product: cfg.product,
        };
        let order_id = match self.order_worker.submit(job).await {
            Ok(reply) => match reply.into_order_id() {
                Ok(id) => id,
                Err(e) => {
                    self.engage_kill_switch(&format!("ORDER_FAIL:{e}")).await;
                    return EntryOutcome::Error { detail: format!("ORDER_FAIL:{e}") };
                }
            },
            Err(e) => {
                self.engage_kill_switch(&format!("ORDER_FAIL:{e}")).await;
                return EntryOutcome::Error { detail: format!("ORDER_FAIL:{e}") };
            }
        };

        // 11. Construct Position, open-guard, snapshot
        let trade_id = uuid::Uuid::new_v4().to_string();
        let mut position = Position {
            trade_id: trade_id.clone(),
            user_id: self.user_id.clone(),
            symbol: symbol.to_string(),
            alert_name: alert_name.to_string(),
            alert_time: Utc::now(),
            side,
            product: cfg.product,
            qty,
            entry_price: ltp,
            ltp,
            target_price: 0.0,
            stop_loss_price: 0.0,
            trailing_stop_pct: cfg.trailing_stop_pct,
            running_extreme: ltp,
            status: PositionStatus::Open,
            entry_order_id: Some(order_id.clone()),
            exit_order_id: None,
            exit_reason: None,
            pnl: 0.0,
            cfg_target_pct: cfg.target_pct,
            cfg_sl_pct: cfg.stop_loss_pct,
            cfg_tsl_pct: cfg.trailing_stop_pct,
            sector: sector.map(|s| s.to_string()),
            updated_at: Utc::now(),
        };
        position.recompute_levels_from_entry();

        if let Err(e) = self
            .store
            .set_open(&self.user_id, symbol, &trade_id, self.seconds_to_next_day_with_grace())
            .await
        {
            warn!("failed to set open-guard for {symbol}: {e}");
        }
        self.force_upsert(&position).await;
        self.positions.write().await.insert(symbol.to_string(), position.clone());

        self.emit(
            crate::events::EventType::PositionOpened,
            crate::events::EventPayload::PositionOpened {
                trade_id: trade_id.clone(),
                symbol: symbol.to_string(),
                side: side.as_str().to_string(),
                qty,
                entry_price: ltp,
            },
        );

        EntryOutcome::Entered {
            trade_id,
            order_id,
            qty,
            side: side.as_str().to_string(),
            product: cfg.product.as_str().to_string(),
            ltp,
        }
    }

    /// Step 7: cached tick if present; for FIXED_CAPITAL, poll up to 300 ms
    /// at 50 ms intervals for the next tick.
    async fn wait_for_ltp(&self, symbol: &str, qty_mode: crate::types::QtyMode) -> Option<f64> {
        if let Some(ltp) = self.cached_ltp(symbol).await {
            return Some(ltp);
        }
        if qty_mode != crate::types::QtyMode::FixedCapital {
            return None;
        }
        let deadline = Duration::from_millis(self.config.ltp_wait_timeout_ms);
        let poll = Duration::from_millis(self.config.ltp_wait_poll_ms);
        let mut waited = Duration::from_millis(0);
        while waited < deadline {
            tokio::time::sleep(poll).await;
            waited += poll;
            if let Some(ltp) = self.cached_ltp(symbol).await {
                return Some(ltp);
            }
        }
        None
    }

    async fn cached_ltp(&self, symbol: &str) -> Option<f64> {
        let ticks = self.ticks.read().await;
        ticks.get(symbol).filter(|t| t.ltp > 0.0).map(|t| t.ltp)
    }

    /// Counter TTL: seconds until next trading-day boundary plus the
    /// configured grace period (spec §4.1, §5 "plus 6h grace").
    fn seconds_to_next_day_with_grace(&self) -> i64 {
        let now = Utc::now();
        let tomorrow_midnight = (now + chrono::Duration::days(1))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let seconds = (tomorrow_midnight - now.naive_utc()).num_seconds().max(0);
        seconds + self.config.counter_grace_hours * 3600
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::*;
    use crate::types::{Direction, Product, QtyMode};

    /// Scenario 1 (spec §8): two concurrent entries for the same symbol
    /// collapse to exactly one ENTERED; the loser sees ALREADY_OPEN_REDIS or
    /// ENTRY_LOCK_BUSY. P1: never more than one active position survives.
    #[tokio::test]
    async fn scenario_duplicate_concurrent_alerts_collapse_to_one_entry() {
        let (engine, broker) = build_engine();
        broker.update_ltp("SBIN", 100.0).await;
        engine.on_tick("SBIN", 100.0, 99.0, 100.0, 99.0, 0, 0).await;
        let cfg = test_alert_config("morning_longs");

        let e1 = Arc::clone(&engine);
        let cfg1 = cfg.clone();
        let fut1 = tokio::spawn(async move { e1.enter("SBIN", "morning_longs", &cfg1).await });
        let e2 = Arc::clone(&engine);
        let cfg2 = cfg.clone();
        let fut2 = tokio::spawn(async move { e2.enter("SBIN", "morning_longs", &cfg2).await });

        let (r1, r2) = (fut1.await.unwrap(), fut2.await.unwrap());
        let entered = [&r1, &r2].iter().filter(|o| o.is_entered()).count();
        assert_eq!(entered, 1, "exactly one of the two concurrent entries must succeed");

        let loser = if r1.is_entered() { &r2 } else { &r1 };
        assert!(matches!(
            loser,
            EntryOutcome::Skipped { reason: SkipReason::AlreadyOpenRedis }
                | EntryOutcome::Skipped { reason: SkipReason::AlreadyOpen }
                | EntryOutcome::Skipped { reason: SkipReason::EntryLockBusy }
        ));

        let key = crate::store::counter_key("u1", &Utc::now().format("%Y%m%d").to_string(), "morning_longs");
        // the counter was incremented exactly once, by the winner (P3): a
        // limit-of-1 check against it must now report "already at limit"
        assert!(!engine.store.allow_and_increment(&key, 1, 3600).await.unwrap());
        let positions = engine.positions_snapshot().await;
        assert_eq!(positions.iter().filter(|p| p.status.is_active()).count(), 1);
    }

    /// Scenario 2 (spec §8): `limit/day=2`, three symbols in one alert; the
    /// first two succeed, the third is skipped for TRADE_LIMIT (P3).
    #[tokio::test]
    async fn scenario_capacity_reached_skips_third_symbol() {
        let (engine, broker) = build_engine();
        for sym in ["A", "B", "C"] {
            broker.update_ltp(sym, 100.0).await;
            engine.on_tick(sym, 100.0, 99.0, 100.0, 99.0, 0, 0).await;
        }
        let mut cfg = test_alert_config("morning_longs");
        cfg.trade_limit_per_day = 2;

        let r1 = engine.enter("A", "morning_longs", &cfg).await;
        let r2 = engine.enter("B", "morning_longs", &cfg).await;
        let r3 = engine.enter("C", "morning_longs", &cfg).await;

        assert!(r1.is_entered());
        assert!(r2.is_entered());
        assert!(matches!(r3, EntryOutcome::Skipped { reason: SkipReason::TradeLimit }));

        let today = Utc::now().format("%Y%m%d").to_string();
        let key = crate::store::counter_key("u1", &today, "morning_longs");
        assert!(!engine.store.allow_and_increment(&key, 2, 3600).await.unwrap());
    }

    #[tokio::test]
    async fn direction_short_with_delivery_is_rejected() {
        let (engine, broker) = build_engine();
        broker.update_ltp("SBIN", 100.0).await;
        engine.on_tick("SBIN", 100.0, 99.0, 100.0, 99.0, 0, 0).await;
        let mut cfg = test_alert_config("morning_shorts");
        cfg.direction = Direction::Short;
        cfg.product = Product::Delivery;

        let outcome = engine.enter("SBIN", "morning_shorts", &cfg).await;
        assert!(matches!(outcome, EntryOutcome::Rejected { reason: RejectReason::CncShortNotAllowed }));
    }

    #[tokio::test]
    async fn broker_not_connected_when_credentials_missing() {
        let mut config = test_config();
        config.broker_access_token = String::new();
        let (engine, broker) = build_engine_with_config(config);
        broker.update_ltp("SBIN", 100.0).await;
        engine.on_tick("SBIN", 100.0, 99.0, 100.0, 99.0, 0, 0).await;
        let cfg = test_alert_config("morning_longs");

        let outcome = engine.enter("SBIN", "morning_longs", &cfg).await;
        assert!(matches!(outcome, EntryOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn fixed_capital_quantity_is_floor_of_capital_over_ltp() {
        let (engine, broker) = build_engine();
        broker.update_ltp("SBIN", 333.0).await;
        engine.on_tick("SBIN", 333.0, 330.0, 333.0, 330.0, 0, 0).await;
        let mut cfg = test_alert_config("morning_longs");
        cfg.qty_mode = QtyMode::FixedCapital;
        cfg.capital = 1000.0; // floor(1000/333) = 3

        let outcome = engine.enter("SBIN", "morning_longs", &cfg).await;
        match outcome {
            EntryOutcome::Entered { qty, .. } => assert_eq!(qty, 3),
            other => panic!("expected ENTERED, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fixed_capital_with_no_ltp_is_skipped() {
        let (engine, _broker) = build_engine();
        let mut cfg = test_alert_config("morning_longs");
        cfg.qty_mode = QtyMode::FixedCapital;
        cfg.capital = 1000.0;

        let outcome = engine.enter("UNKNOWNSYM", "morning_longs", &cfg).await;
        assert!(matches!(outcome, EntryOutcome::Skipped { reason: SkipReason::NoLtpForCapitalQty }));
    }

    #[tokio::test]
    async fn already_open_in_memory_is_skipped() {
        let (engine, broker) = build_engine();
        broker.update_ltp("SBIN", 100.0).await;
        engine.on_tick("SBIN", 100.0, 99.0, 100.0, 99.0, 0, 0).await;
        let cfg = test_alert_config("morning_longs");

        let first = engine.enter("SBIN", "morning_longs", &cfg).await;
        assert!(first.is_entered());
        let second = engine.enter("SBIN", "morning_longs", &cfg).await;
        assert!(matches!(second, EntryOutcome::Skipped { reason: SkipReason::AlreadyOpen }));
    }

    #[tokio::test]
    async fn sector_filter_rejects_symbol_outside_top_n() {
        let (engine, broker) = build_engine();
        // rank sectors with several other symbols so SBIN's sector (NIFTY BANK)
        // falls outside the top-2 gainers
        for (sym, prev, ltp) in [
            ("TVSMOTOR", 100.0, 101.5), // NIFTY AUTO
            ("MARUTI", 100.0, 101.2),   // NIFTY AUTO
            ("SBIN", 100.0, 99.7),      // NIFTY BANK
            ("ITC", 100.0, 99.1),       // NIFTY FMCG
        ] {
            broker.update_ltp(sym, ltp).await;
            engine.on_tick(sym, ltp, prev, ltp, prev, 0, 0).await;
        }
        let mut cfg = test_alert_config("morning_longs");
        cfg.sector_filter_on = true;
        cfg.top_n_sector = 1;

        let outcome = engine.enter("SBIN", "morning_longs", &cfg).await;
        assert!(matches!(outcome, EntryOutcome::Skipped { reason: SkipReason::SectorFilter }));
    }

    #[tokio::test]
    async fn bad_qty_is_rejected() {
        let (engine, broker) = build_engine();
        broker.update_ltp("SBIN", 100.0).await;
        engine.on_tick("SBIN", 100.0, 99.0, 100.0, 99.0, 0, 0).await;
        let mut cfg = test_alert_config("morning_longs");
        cfg.qty_mode = QtyMode::FixedCapital;
        cfg.capital = 10.0; // floor(10/100) = 0

        let outcome = engine.enter("SBIN", "morning_longs", &cfg).await;
        assert!(matches!(outcome, EntryOutcome::Rejected { reason: RejectReason::BadQty }));
    }
}
