/// Trade Engine Core (spec §2.6, §4.6-§4.9): an in-memory, per-user state
/// machine driven by two asynchronous event streams (broker ticks, alert
/// webhooks), coordinated with the Shared Store for cross-process safety.
///
/// Concurrency model (spec §5): all mutable state here (positions map,
/// sector accumulator, tick cache) is reached only through `&self` methods
/// on this struct, each guarded by its own lock — mirroring the teacher's
/// `PositionManager`/`RiskManager` `Arc<RwLock<HashMap<...>>>` pattern. The
/// broker tick feed and the Order Worker each run on their own Tokio task
/// and hand results back via channels; they never touch this state
/// directly.
pub mod entry;
pub mod exit;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::broker::BrokerAdapter;
use crate::error::Result;
use crate::events::{Event, EventBus, EventPayload, EventType, LevelDistance};
use crate::order_worker::OrderWorker;
use crate::outcome::ExitOutcome;
use crate::sector::SectorRanker;
use crate::store::SharedStore;
use crate::types::{EngineConfig, Position, PositionStatus, Side, Tick};

pub struct TradeEngine {
    pub(crate) user_id: String,
    pub(crate) store: Arc<dyn SharedStore>,
    pub(crate) broker: Arc<dyn BrokerAdapter>,
    pub(crate) order_worker: OrderWorker,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) config: Arc<EngineConfig>,

    pub(crate) positions: RwLock<HashMap<String, Position>>,
    pub(crate) ticks: RwLock<HashMap<String, Tick>>,
    pub(crate) sector: RwLock<SectorRanker>,

    /// Symbols with an exit already dispatched (spec §4.6 step 11, §4.7).
    pub(crate) exit_inflight: RwLock<HashSet<String>>,
    /// Symbols currently running the entry-price reconciliation background
    /// task (spec §4.6 step 7: "at most one concurrent invocation").
    pub(crate) reconciling: RwLock<HashSet<String>>,

    last_snapshot_write: RwLock<HashMap<String, DateTime<Utc>>>,
    last_monitor_log: RwLock<HashMap<String, DateTime<Utc>>>,
    last_sector_summary: RwLock<Option<DateTime<Utc>>>,

    killed_this_session: AtomicBool,
}

impl TradeEngine {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn SharedStore>,
        broker: Arc<dyn BrokerAdapter>,
        order_worker: OrderWorker,
        event_bus: Arc<EventBus>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            broker,
            order_worker,
            event_bus,
            config,
            positions: RwLock::new(HashMap::new()),
            ticks: RwLock::new(HashMap::new()),
            sector: RwLock::new(SectorRanker::new()),
            exit_inflight: RwLock::new(HashSet::new()),
            reconciling: RwLock::new(HashSet::new()),
            last_snapshot_write: RwLock::new(HashMap::new()),
            last_monitor_log: RwLock::new(HashMap::new()),
            last_sector_summary: RwLock::new(None),
            killed_this_session: AtomicBool::new(false),
        }
    }

    fn emit(&self, event_type: EventType, payload: EventPayload) {
        self.event_bus.publish(Event::new(self.user_id.clone(), event_type, payload));
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Admin surface (spec §6): disengage a previously-set kill switch.
    pub async fn disengage_kill_switch(&self) -> Result<()> {
        self.store.set_kill(&self.user_id, false).await
    }

    /// Engage the kill switch (spec §7: dispatcher-level exceptions and
    /// entry-placement failures do this).
    pub async fn engage_kill_switch(&self, reason: &str) {
        warn!(user = %self.user_id, reason, "engaging kill switch");
        if let Err(e) = self.store.set_kill(&self.user_id, true).await {
            warn!("failed to persist kill switch: {e}");
        }
        self.killed_this_session.store(true, Ordering::SeqCst);
        self.emit(EventType::KillSwitchEngaged, EventPayload::KillSwitchEngaged {
            reason: reason.to_string(),
        });
    }

    /// Throttled snapshot write (spec §5: "≥800 ms spacing per symbol").
    async fn throttled_upsert(&self, position: &Position) {
        let now = Utc::now();
        let should_write = {
            let mut last = self.last_snapshot_write.write().await;
            let due = last
                .get(&position.symbol)
                .map(|t| (now - *t).num_milliseconds() >= self.config.snapshot_throttle_ms as i64)
                .unwrap_or(true);
            if due {
                last.insert(position.symbol.clone(), now);
            }
            due
        };
        if should_write {
            if let Err(e) = self.store.upsert_position(&self.user_id, position).await {
                warn!("snapshot write failed for {}: {e}", position.symbol);
            }
        }
    }

    /// Unthrottled snapshot write, used on status transitions that must be
    /// durable immediately (open, exiting, closed).
    async fn force_upsert(&self, position: &Position) {
        self.last_snapshot_write.write().await.insert(position.symbol.clone(), Utc::now());
        if let Err(e) = self.store.upsert_position(&self.user_id, position).await {
            warn!("snapshot write failed for {}: {e}", position.symbol);
        }
    }

    /// Ingest a tick (spec §4.6). Non-suspending except for fire-and-forget
    /// background spawns (entry-price reconciliation, Exit Path). Requires
    /// `Arc<Self>` so those spawns can hold their own strong reference.
    pub async fn on_tick(
        self: &Arc<Self>,
        symbol: &str,
        ltp: f64,
        prev_close: f64,
        session_high: f64,
        session_low: f64,
        total_buy_qty: i64,
        total_sell_qty: i64,
    ) {
        if ltp <= 0.0 {
            return;
        }
        {
            let mut ticks = self.ticks.write().await;
            ticks.insert(
                symbol.to_string(),
                Tick {
                    ltp,
                    prev_close,
                    session_high,
                    session_low,
                    total_buy_qty,
                    total_sell_qty,
                },
            );
        }
        self.emit(EventType::TickUpdated, EventPayload::TickUpdated {
            symbol: symbol.to_string(),
            ltp,
        });

        if prev_close > 0.0 {
            if let Some(sector) = crate::stock_sector::get_sector(symbol) {
                self.sector.write().await.update(symbol, sector, ltp, prev_close);
            }
            self.maybe_emit_sector_summary().await;
        }

        self.monitor_position(symbol, ltp).await;
    }

    async fn maybe_emit_sector_summary(&self) {
        let now = Utc::now();
        let due = {
            let mut last = self.last_sector_summary.write().await;
            let due = last
                .map(|t| (now - t).num_seconds() >= self.config.sector_summary_throttle_s as i64)
                .unwrap_or(true);
            if due {
                *last = Some(now);
            }
            due
        };
        if due {
            let ranked = self.sector.read().await.ranked();
            self.emit(EventType::SectorSummary, EventPayload::SectorSummary { ranked });
        }
    }

    /// Steps 4-11 of spec §4.6: load the position, update P&L, recompute
    /// trailing levels, evaluate exit predicates in deterministic order.
    async fn monitor_position(self: &Arc<Self>, symbol: &str, ltp: f64) {
        let snapshot = {
            let positions = self.positions.read().await;
            positions.get(symbol).cloned()
        };
        let Some(mut position) = snapshot else {
            return;
        };
        if position.status != PositionStatus::Open {
            return;
        }

        position.ltp = ltp;
        position.updated_at = Utc::now();
        position.pnl = if position.entry_price <= 0.0 {
            0.0
        } else {
            match position.side {
                Side::Buy => (ltp - position.entry_price) * position.qty as f64,
                Side::Sell => (position.entry_price - ltp) * position.qty as f64,
            }
        };

        if position.product == crate::types::Product::Delivery {
            self.write_back(position).await;
            return;
        }

        if position.entry_price <= 0.0 {
            self.spawn_entry_price_reconciliation(symbol.to_string());
        }

        position.running_extreme = match position.side {
            Side::Buy => position.running_extreme.max(ltp),
            Side::Sell => {
                if position.running_extreme <= 0.0 {
                    ltp
                } else {
                    position.running_extreme.min(ltp)
                }
            }
        };

        let trailing_line = match position.side {
            Side::Buy => position.running_extreme * (1.0 - position.cfg_tsl_pct / 100.0),
            Side::Sell => position.running_extreme * (1.0 + position.cfg_tsl_pct / 100.0),
        };

        self.maybe_emit_monitoring_record(&position, trailing_line).await;

        let exit_reason = self.evaluate_exit_predicate(&position, trailing_line);

        if let Some(reason) = exit_reason {
            position.status = PositionStatus::ExitConditionsMet;
            position.exit_reason = Some(reason.as_str().to_string());
            self.force_upsert(&position).await;
            self.emit(EventType::ExitConditionsMet, EventPayload::ExitConditionsMet {
                trade_id: position.trade_id.clone(),
                symbol: symbol.to_string(),
                reason: reason.as_str().to_string(),
            });

            let already_inflight = {
                let mut inflight = self.exit_inflight.write().await;
                !inflight.insert(symbol.to_string())
            };
            self.write_back(position).await;
            if !already_inflight {
                self.spawn_exit(symbol.to_string(), reason);
            }
        } else {
            self.write_back(position).await;
        }
    }

    /// Deterministic order TARGET -> STOP_LOSS -> TRAILING_SL (spec §4.6
    /// step 10, §5, §8 P4). A level of 0 disables that check.
    fn evaluate_exit_predicate(&self, position: &Position, trailing_line: f64) -> Option<crate::types::ExitReason> {
        use crate::types::ExitReason;
        let ltp = position.ltp;
        let hit_target = position.target_price != 0.0
            && match position.side {
                Side::Buy => ltp >= position.target_price,
                Side::Sell => ltp <= position.target_price,
            };
        if hit_target {
            return Some(ExitReason::Target);
        }
        let hit_stop = position.stop_loss_price != 0.0
            && match position.side {
                Side::Buy => ltp <= position.stop_loss_price,
                Side::Sell => ltp >= position.stop_loss_price,
            };
        if hit_stop {
            return Some(ExitReason::StopLoss);
        }
        let hit_trailing = position.cfg_tsl_pct != 0.0
            && match position.side {
                Side::Buy => ltp <= trailing_line,
                Side::Sell => ltp >= trailing_line,
            };
        if hit_trailing {
            return Some(ExitReason::TrailingSl);
        }
        None
    }

    async fn maybe_emit_monitoring_record(&self, position: &Position, trailing_line: f64) {
        let now = Utc::now();
        let due = {
            let mut last = self.last_monitor_log.write().await;
            let due = last
                .get(&position.symbol)
                .map(|t| (now - *t).num_seconds() >= self.config.monitoring_log_throttle_ms as i64 / 1000)
                .unwrap_or(true);
            if due {
                last.insert(position.symbol.clone(), now);
            }
            due
        };
        if !due {
            return;
        }
        let distance = |level: f64| -> LevelDistance {
            let pct = if position.ltp != 0.0 { (level - position.ltp) / position.ltp * 100.0 } else { 0.0 };
            LevelDistance {
                label: "",
                distance_pct: pct,
                near: pct.abs() <= 0.15,
            }
        };
        let mut target_d = distance(position.target_price);
        target_d.label = "TARGET";
        let mut stop_d = distance(position.stop_loss_price);
        stop_d.label = "STOP_LOSS";
        let mut tsl_d = distance(trailing_line);
        tsl_d.label = "TRAILING_SL";

        self.emit(EventType::MonitoringRecord, EventPayload::MonitoringRecord {
            trade_id: position.trade_id.clone(),
            symbol: position.symbol.clone(),
            entry_price: position.entry_price,
            ltp: position.ltp,
            pnl: position.pnl,
            target_price: position.target_price,
            stop_loss_price: position.stop_loss_price,
            trailing_line,
            distances: vec![target_d, stop_d, tsl_d],
        });
    }

    async fn write_back(&self, position: Position) {
        {
            let mut positions = self.positions.write().await;
            positions.insert(position.symbol.clone(), position.clone());
        }
        self.throttled_upsert(&position).await;
    }

    fn spawn_entry_price_reconciliation(self: &Arc<Self>, symbol: String) {
        let already = {
            let inflight = self.reconciling.try_write();
            match inflight {
                Ok(mut guard) => !guard.insert(symbol.clone()),
                Err(_) => true,
            }
        };
        if already {
            return;
        }
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.reconcile_entry_price(&symbol).await;
            engine.reconciling.write().await.remove(&symbol);
        });
    }

    /// spec §4.6 step 7: fetch the broker's open positions, find the row
    /// for this symbol, set `entry_price = average_price`.
    async fn reconcile_entry_price(self: &Arc<Self>, symbol: &str) {
        let reply = match self.order_worker.submit(crate::order_worker::OrderJob::FetchPositions).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("entry-price reconciliation fetch failed for {symbol}: {e}");
                return;
            }
        };
        let Ok(broker_positions) = reply.into_positions() else { return };
        let Some(row) = broker_positions.iter().find(|p| p.tradingsymbol == symbol) else {
            return;
        };
        if row.average_price <= 0.0 {
            return;
        }
        let mut positions = self.positions.write().await;
        if let Some(position) = positions.get_mut(symbol) {
            if position.entry_price <= 0.0 {
                position.entry_price = row.average_price;
                position.recompute_levels_from_entry();
                let snapshot = position.clone();
                drop(positions);
                self.force_upsert(&snapshot).await;
            }
        }
    }

    fn spawn_exit(self: &Arc<Self>, symbol: String, reason: crate::types::ExitReason) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.exit_position(&symbol, reason).await;
        });
    }

    /// Order-update handling (spec §4.8).
    pub async fn on_order_update(&self, order_id: &str, status: &str, average_price: f64) {
        if status != "COMPLETE" {
            return;
        }
        let mut positions = self.positions.write().await;
        for position in positions.values_mut() {
            if position.entry_order_id.as_deref() == Some(order_id) {
                position.entry_price = average_price;
                position.recompute_levels_from_entry();
                let snapshot = position.clone();
                drop(positions);
                self.force_upsert(&snapshot).await;
                return;
            }
            if position.exit_order_id.as_deref() == Some(order_id) {
                info!("exit order {order_id} completed for {}; workflow already finalized", position.symbol);
                return;
            }
        }
    }

    /// Restart rehydration (spec §4.9).
    pub async fn rehydrate(&self) -> Result<Vec<String>> {
        let stored = self.store.list_positions(&self.user_id).await?;
        let mut positions = self.positions.write().await;
        let mut resubscribe = Vec::new();
        for mut position in stored {
            if !position.status.is_active() {
                continue;
            }
            position.status = PositionStatus::Open;
            if position.entry_price > 0.0 && position.running_extreme <= 0.0 {
                position.running_extreme = position.entry_price;
            }
            resubscribe.push(position.symbol.clone());
            positions.insert(position.symbol.clone(), position);
        }
        info!(user = %self.user_id, count = resubscribe.len(), "rehydrated positions");
        Ok(resubscribe)
    }

    pub async fn positions_snapshot(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn get_position(&self, symbol: &str) -> Option<Position> {
        self.positions.read().await.get(symbol).cloned()
    }

    /// Whether the kill switch has been engaged by this process since
    /// startup (distinct from the durable store flag, which may have been
    /// set by another process or survive a restart).
    pub fn killed_this_session(&self) -> bool {
        self.killed_this_session.load(Ordering::SeqCst)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::types::{Product, Side};

    #[tokio::test]
    async fn on_tick_ignores_non_positive_ltp() {
        let (engine, _broker) = build_engine();
        engine.on_tick("SBIN", 0.0, 100.0, 101.0, 99.0, 0, 0).await;
        assert!(engine.ticks.read().await.get("SBIN").is_none());
        engine.on_tick("SBIN", -5.0, 100.0, 101.0, 99.0, 0, 0).await;
        assert!(engine.ticks.read().await.get("SBIN").is_none());
    }

    #[tokio::test]
    async fn on_tick_caches_tick_and_updates_sector_ranker() {
        let (engine, _broker) = build_engine();
        // SBIN is mapped to NIFTY BANK in the static sector table.
        engine.on_tick("SBIN", 101.0, 100.0, 101.0, 99.0, 0, 0).await;
        let cached = engine.ticks.read().await.get("SBIN").copied().unwrap();
        assert_eq!(cached.ltp, 101.0);
        let avg = engine.sector.read().await.average("NIFTY BANK");
        assert!(avg.is_some());
    }

    /// Scenario 3 (spec §8): target and stop both crossed across two ticks;
    /// only the first-matching predicate (TARGET) should fire the exit, and
    /// it should fire exactly once even though `on_tick` keeps running after
    /// the exit is spawned (P4).
    #[tokio::test]
    async fn scenario_target_then_stop_only_fires_target_once() {
        let (engine, broker) = build_engine();
        broker.update_ltp("SBIN", 100.0).await;
        // seed the broker's net position the way the Entry Path would have
        broker.place_order("NSE", "SBIN", Side::Buy, 10, Product::Intraday).await.unwrap();

        let mut position = open_position("SBIN", Side::Buy, 100.0, 10);
        position.target_price = 101.0;
        position.stop_loss_price = 99.3;
        position.cfg_tsl_pct = 0.0;
        engine.positions.write().await.insert("SBIN".to_string(), position);

        engine.on_tick("SBIN", 101.05, 0.0, 101.05, 101.05, 0, 0).await;
        engine.on_tick("SBIN", 99.25, 0.0, 99.25, 99.25, 0, 0).await;

        // allow the spawned exit task to run
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let position = engine.get_position("SBIN").await;
        assert!(position.is_none(), "position should be closed and removed from memory");
        assert_eq!(broker.positions().await.unwrap()[0].quantity, 0);
    }

    #[tokio::test]
    async fn p5_trailing_extreme_is_monotonic_for_buy_and_sell() {
        let (engine, broker) = build_engine();
        broker.update_ltp("SBIN", 100.0).await;
        let mut position = open_position("SBIN", Side::Buy, 100.0, 10);
        position.target_price = 0.0; // disabled
        position.stop_loss_price = 0.0;
        position.cfg_tsl_pct = 5.0;
        engine.positions.write().await.insert("SBIN".to_string(), position);

        engine.on_tick("SBIN", 102.0, 0.0, 102.0, 102.0, 0, 0).await;
        let extreme_1 = engine.get_position("SBIN").await.unwrap().running_extreme;
        engine.on_tick("SBIN", 101.0, 0.0, 101.0, 101.0, 0, 0).await;
        let extreme_2 = engine.get_position("SBIN").await.unwrap().running_extreme;
        assert_eq!(extreme_1, 102.0);
        assert_eq!(extreme_2, 102.0, "BUY running_extreme must not decrease on a pullback");
    }

    #[tokio::test]
    async fn p6_order_update_reconciles_entry_price_idempotently() {
        let (engine, _broker) = build_engine();
        let mut position = open_position("SBIN", Side::Buy, 0.0, 10);
        position.entry_order_id = Some("ORD1".to_string());
        position.cfg_target_pct = 1.0;
        position.cfg_sl_pct = 0.7;
        engine.positions.write().await.insert("SBIN".to_string(), position);

        engine.on_order_update("ORD1", "COMPLETE", 100.0).await;
        let after_first = engine.get_position("SBIN").await.unwrap();
        assert_eq!(after_first.entry_price, 100.0);
        assert!((after_first.target_price - 101.0).abs() < 1e-9);

        // repeated event for the same order id is idempotent (P6)
        engine.on_order_update("ORD1", "COMPLETE", 100.0).await;
        let after_second = engine.get_position("SBIN").await.unwrap();
        assert_eq!(after_second.entry_price, after_first.entry_price);
        assert_eq!(after_second.target_price, after_first.target_price);
    }

    #[tokio::test]
    async fn on_order_update_ignores_exit_order_id() {
        let (engine, _broker) = build_engine();
        let mut position = open_position("SBIN", Side::Buy, 100.0, 10);
        position.exit_order_id = Some("ORD-EXIT".to_string());
        engine.positions.write().await.insert("SBIN".to_string(), position);

        engine.on_order_update("ORD-EXIT", "COMPLETE", 999.0).await;
        let position = engine.get_position("SBIN").await.unwrap();
        assert_eq!(position.entry_price, 100.0, "exit order completion must not touch entry_price");
    }

    /// Scenario 6 (spec §8): a rehydrated OPEN position re-enables
    /// monitoring and the very next tick can close it.
    #[tokio::test]
    async fn scenario_restart_rehydrates_and_resumes_monitoring() {
        let (engine, broker) = build_engine();
        broker.update_ltp("SBIN", 101.2).await;
        broker.place_order("NSE", "SBIN", Side::Buy, 10, Product::Intraday).await.unwrap();
        let position = crate::types::Position {
            trade_id: "t1".into(),
            user_id: "u1".into(),
            symbol: "SBIN".into(),
            alert_name: "morning_longs".into(),
            alert_time: Utc::now(),
            side: Side::Buy,
            product: Product::Intraday,
            qty: 10,
            entry_price: 100.0,
            ltp: 100.0,
            target_price: 101.0,
            stop_loss_price: 99.3,
            trailing_stop_pct: 0.0,
            running_extreme: 0.0,
            status: PositionStatus::Open,
            entry_order_id: Some("ORD1".into()),
            exit_order_id: None,
            exit_reason: None,
            pnl: 0.0,
            cfg_target_pct: 1.0,
            cfg_sl_pct: 0.7,
            cfg_tsl_pct: 0.0,
            sector: None,
            updated_at: Utc::now(),
        };
        engine.store.upsert_position("u1", &position).await.unwrap();

        let resubscribe = engine.rehydrate().await.unwrap();
        assert_eq!(resubscribe, vec!["SBIN".to_string()]);
        let rehydrated = engine.get_position("SBIN").await.unwrap();
        assert_eq!(rehydrated.running_extreme, 100.0, "extreme seeded to entry_price when <= 0");

        engine.on_tick("SBIN", 101.2, 0.0, 101.2, 101.2, 0, 0).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(engine.get_position("SBIN").await.is_none());
        assert_eq!(broker.positions().await.unwrap()[0].quantity, 0);
    }
}
