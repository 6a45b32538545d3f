/// Exit Path (spec §4.7): lock, transition, submit, finalize. Also covers
/// manual square-off (broker-positions fallback) and bulk end-of-day
/// square-off (concurrent dispatch over all open symbols).
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::engine::TradeEngine;
use crate::order_worker::OrderJob;
use crate::outcome::ExitOutcome;
use crate::store::{kill_key, lock_key, LockOutcome};
use crate::types::{ExitReason, Side};

impl TradeEngine {
    /// Entry point spawned from the monitor loop, and usable directly for
    /// bulk square-off.
    pub async fn exit_position(self: &Arc<Self>, symbol: &str, reason: ExitReason) -> ExitOutcome {
        let outcome = self.exit_position_inner(symbol, reason).await;
        self.exit_inflight.write().await.remove(symbol);
        self.emit(
            crate::events::EventType::PositionRefresh,
            crate::events::EventPayload::PositionRefresh { symbol: symbol.to_string() },
        );
        outcome
    }

    async fn exit_position_inner(self: &Arc<Self>, symbol: &str, reason: ExitReason) -> ExitOutcome {
        // 1. Load position, require active status
        let position = {
            let positions = self.positions.read().await;
            positions.get(symbol).cloned()
        };
        let Some(mut position) = position else {
            return ExitOutcome::NoOp;
        };
        if !position.status.is_active() {
            return ExitOutcome::NoOp;
        }

        // 2. Exit side
        let exit_side = position.side.opposite();

        // 3. Exit lock
        let lock_key = lock_key(&self.user_id, symbol, "exit");
        let kill_key = kill_key(&self.user_id);
        match self.store.acquire_lock(&lock_key, &kill_key, self.config.exit_lock_ttl_ms).await {
            Ok(LockOutcome::Acquired) => {}
            Ok(_) => return ExitOutcome::NoOp,
            Err(e) => return ExitOutcome::Error { detail: e.to_string() },
        }

        let outcome = self
            .exit_locked(&mut position, exit_side, reason)
            .await;
        self.store.release_lock(&lock_key).await;
        outcome
    }

    async fn exit_locked(
        self: &Arc<Self>,
        position: &mut crate::types::Position,
        exit_side: Side,
        reason: ExitReason,
    ) -> ExitOutcome {
        // 4. Transition to EXITING
        position.status = crate::types::PositionStatus::Exiting;
        self.force_upsert(position).await;
        self.positions.write().await.insert(position.symbol.clone(), position.clone());

        // 5. Submit order
        let job = OrderJob::PlaceOrder {
            exchange: self.config.venue_exchange.clone(),
            tradingsymbol: position.symbol.clone(),
            side: exit_side,
            quantity: position.qty,
            product: position.product,
        };
        let order_result = self.order_worker.submit(job).await.and_then(|r| r.into_order_id());

        match order_result {
            Ok(order_id) => {
                // 6. Success: finalize
                position.exit_order_id = Some(order_id.clone());
                position.status = crate::types::PositionStatus::Closed;
                position.exit_reason = Some(reason.as_str().to_string());
                position.updated_at = Utc::now();
                self.force_upsert(position).await;

                if let Err(e) = self.store.delete_position(&self.user_id, &position.symbol).await {
                    warn!("failed to delete position snapshot for {}: {e}", position.symbol);
                }
                if let Err(e) = self.store.clear_open(&self.user_id, &position.symbol).await {
                    warn!("failed to clear open-guard for {}: {e}", position.symbol);
                }
                self.positions.write().await.remove(&position.symbol);

                if let Err(e) = self
                    .store
                    .update_alert_status(
                        &self.user_id,
                        position.alert_time,
                        &position.alert_name,
                        &position.symbol,
                        "CLOSED",
                        Some(reason.as_str()),
                    )
                    .await
                {
                    warn!("failed to update alert history for {}: {e}", position.symbol);
                }

                self.emit(
                    crate::events::EventType::PositionClosed,
                    crate::events::EventPayload::PositionClosed {
                        trade_id: position.trade_id.clone(),
                        symbol: position.symbol.clone(),
                        exit_reason: reason.as_str().to_string(),
                        pnl: position.pnl,
                    },
                );
                info!(symbol = %position.symbol, reason = reason.as_str(), "position closed");
                ExitOutcome::Exited { order_id, reason: reason.as_str().to_string() }
            }
            Err(e) => {
                // 7. Failure: ERROR status, keep open-guard, no kill switch
                position.status = crate::types::PositionStatus::Error;
                position.exit_reason = Some(format!("EXIT_ORDER_FAIL:{e}"));
                position.updated_at = Utc::now();
                self.force_upsert(position).await;
                self.positions.write().await.insert(position.symbol.clone(), position.clone());
                warn!(symbol = %position.symbol, "exit order failed: {e}");
                ExitOutcome::Error { detail: format!("EXIT_ORDER_FAIL:{e}") }
            }
        }
    }

    /// Manual square-off (spec §4.7): if no in-memory position exists,
    /// fall back to the broker's positions list and compute exit side from
    /// the net quantity's sign.
    pub async fn manual_square_off(self: &Arc<Self>, symbol: &str) -> ExitOutcome {
        let has_position = self.positions.read().await.contains_key(symbol);
        if has_position {
            return self.exit_position(symbol, ExitReason::Manual).await;
        }

        let reply = match self.order_worker.submit(OrderJob::FetchPositions).await {
            Ok(reply) => reply,
            Err(e) => return ExitOutcome::Error { detail: e.to_string() },
        };
        let Ok(broker_positions) = reply.into_positions() else {
            return ExitOutcome::Error { detail: "unexpected order worker reply".to_string() };
        };
        let Some(row) = broker_positions.iter().find(|p| p.tradingsymbol == symbol && p.quantity != 0) else {
            return ExitOutcome::NoOp;
        };
        let exit_side = if row.quantity > 0 { Side::Sell } else { Side::Buy };
        let qty = row.quantity.abs();
        let job = OrderJob::PlaceOrder {
            exchange: self.config.venue_exchange.clone(),
            tradingsymbol: symbol.to_string(),
            side: exit_side,
            quantity: qty,
            product: row.product,
        };
        match self.order_worker.submit(job).await.and_then(|r| r.into_order_id()) {
            Ok(order_id) => ExitOutcome::Exited { order_id, reason: ExitReason::Manual.as_str().to_string() },
            Err(e) => ExitOutcome::Error { detail: format!("EXIT_ORDER_FAIL:{e}") },
        }
    }

    /// Bulk square-off (spec §4.7, end-of-day): dispatch the Exit Path
    /// concurrently over every symbol currently OPEN.
    pub async fn bulk_square_off(self: &Arc<Self>) -> usize {
        let symbols: Vec<String> = {
            let positions = self.positions.read().await;
            positions
                .values()
                .filter(|p| p.status == crate::types::PositionStatus::Open)
                .map(|p| p.symbol.clone())
                .collect()
        };
        let count = symbols.len();
        let futures = symbols
            .into_iter()
            .map(|symbol| {
                let engine = Arc::clone(self);
                async move { engine.exit_position(&symbol, ExitReason::AutoSquareOff).await }
            });
        join_all(futures).await;
        self.emit(
            crate::events::EventType::Toast,
            crate::events::EventPayload::Toast {
                message: format!("AUTO_SQ_OFF triggered ({count} positions)"),
            },
        );
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::*;
    use crate::types::{PositionStatus, Product};

    async fn seed_open_position(engine: &Arc<TradeEngine>, broker: &Arc<crate::broker::PaperBrokerClient>, symbol: &str) {
        broker.update_ltp(symbol, 100.0).await;
        broker.place_order("NSE", symbol, Side::Buy, 10, Product::Intraday).await.unwrap();
        let position = open_position(symbol, Side::Buy, 100.0, 10);
        engine.positions.write().await.insert(symbol.to_string(), position);
    }

    #[tokio::test]
    async fn exit_closes_position_and_clears_guard() {
        let (engine, broker) = build_engine();
        seed_open_position(&engine, &broker, "SBIN").await;
        engine.store.set_open("u1", "SBIN", "t1", 3600).await.unwrap();

        let outcome = engine.exit_position("SBIN", ExitReason::Target).await;
        assert!(outcome.is_exited());
        assert!(engine.get_position("SBIN").await.is_none());
        assert!(engine.store.get_open("u1", "SBIN").await.unwrap().is_none());
        assert!(engine.store.list_positions("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exit_on_nonexistent_position_is_noop() {
        let (engine, _broker) = build_engine();
        let outcome = engine.exit_position("SBIN", ExitReason::Manual).await;
        assert!(matches!(outcome, ExitOutcome::NoOp));
    }

    #[tokio::test]
    async fn exit_on_already_closed_position_is_noop() {
        let (engine, broker) = build_engine();
        seed_open_position(&engine, &broker, "SBIN").await;
        {
            let mut positions = engine.positions.write().await;
            positions.get_mut("SBIN").unwrap().status = PositionStatus::Closed;
        }
        let outcome = engine.exit_position("SBIN", ExitReason::Target).await;
        assert!(matches!(outcome, ExitOutcome::NoOp));
    }

    /// Manual square-off (spec §4.7): falls back to the broker's positions
    /// list when no in-memory position exists, computing exit side from
    /// the net quantity's sign.
    #[tokio::test]
    async fn manual_square_off_falls_back_to_broker_positions_for_short() {
        let (engine, broker) = build_engine();
        broker.update_ltp("SBIN", 100.0).await;
        broker.place_order("NSE", "SBIN", Side::Sell, 10, Product::Intraday).await.unwrap();

        let outcome = engine.manual_square_off("SBIN").await;
        assert!(outcome.is_exited());
        let positions = broker.positions().await.unwrap();
        assert_eq!(positions[0].quantity, 0, "reverse BUY order should flatten the short");
    }

    #[tokio::test]
    async fn manual_square_off_noop_when_no_broker_position() {
        let (engine, _broker) = build_engine();
        let outcome = engine.manual_square_off("SBIN").await;
        assert!(matches!(outcome, ExitOutcome::NoOp));
    }

    #[tokio::test]
    async fn bulk_square_off_exits_every_open_symbol_concurrently() {
        let (engine, broker) = build_engine();
        for sym in ["SBIN", "ITC", "TCS"] {
            seed_open_position(&engine, &broker, sym).await;
        }
        let count = engine.bulk_square_off().await;
        assert_eq!(count, 3);
        for sym in ["SBIN", "ITC", "TCS"] {
            assert!(engine.get_position(sym).await.is_none());
        }
    }

    /// Exit-side order failure (spec §7): status becomes ERROR, the
    /// open-guard is NOT cleared, and the kill switch is not engaged.
    #[tokio::test]
    async fn exit_order_failure_keeps_open_guard_and_does_not_kill() {
        let (engine, _broker) = build_engine();
        // no LTP cached for the paper broker => place_order fails
        let position = open_position("SBIN", Side::Buy, 100.0, 10);
        engine.positions.write().await.insert("SBIN".to_string(), position);
        engine.store.set_open("u1", "SBIN", "t1", 3600).await.unwrap();

        let outcome = engine.exit_position("SBIN", ExitReason::Target).await;
        assert!(matches!(outcome, ExitOutcome::Error { .. }));
        assert!(engine.store.get_open("u1", "SBIN").await.unwrap().is_some(), "open-guard must survive an exit failure");
        assert!(!engine.killed_this_session(), "exit failure must not engage the kill switch");

        let position = engine.get_position("SBIN").await.unwrap();
        assert_eq!(position.status, PositionStatus::Error);
    }
}
