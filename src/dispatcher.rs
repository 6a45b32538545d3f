/// Alert Dispatcher (spec §4.4): normalizes an incoming alert, records it
/// into history immediately, evaluates alert-level guards, then fans out
/// to the Entry Path per symbol.
use std::sync::Arc;

use chrono::Utc;
use tracing::error;

use crate::engine::TradeEngine;
use crate::normalize::{normalize_alert_name, normalize_symbol};
use crate::outcome::{EntryOutcome, RejectReason, SkipReason};
use crate::store::{AlertRecord, SymbolResult};
use crate::utils::time::is_in_entry_window;

pub struct DispatchResult {
    pub alert_name: String,
    pub symbols: Vec<String>,
    pub results: Vec<SymbolResult>,
}

impl TradeEngine {
    /// Entry point for a parsed webhook payload. `raw_name` and
    /// `raw_symbols` are exactly what the caller extracted from the
    /// request body; normalization happens here, once, at ingress.
    pub async fn dispatch_alert(
        self: &Arc<Self>,
        raw_name: &str,
        raw_symbols: Vec<String>,
        _triggered_at: Option<chrono::DateTime<Utc>>,
    ) -> DispatchResult {
        // 1. Normalize
        let normalized_name = normalize_alert_name(raw_name);
        let mut symbols: Vec<String> = Vec::new();
        for raw in &raw_symbols {
            let normalized = normalize_symbol(raw);
            if !normalized.is_empty() && !symbols.contains(&normalized) {
                symbols.push(normalized);
            }
        }

        let alert_time = Utc::now();

        // 2. Record RECEIVED immediately
        let mut results: Vec<SymbolResult> = symbols.iter().map(|s| SymbolResult::received(s)).collect();
        let mut record = AlertRecord {
            alert_name: normalized_name.clone(),
            raw_name: raw_name.to_string(),
            time: alert_time,
            results: results.clone(),
        };
        if let Err(e) = self.store.save_alert(&self.user_id, &record).await {
            error!("failed to save alert history: {e}");
        }

        let outcome = self.dispatch_guarded(raw_name, &normalized_name, &symbols, alert_time, &mut results).await;

        if let Err(e) = outcome {
            self.engage_kill_switch(&format!("CRITICAL_FAIL:{e}")).await;
            for result in results.iter_mut() {
                if result.status == "RECEIVED" {
                    result.status = "ERROR".to_string();
                    result.reason = Some(format!("CRITICAL_FAIL:{e}"));
                }
            }
        }

        record.results = results.clone();
        if let Err(e) = self.store.save_alert(&self.user_id, &record).await {
            error!("failed to rewrite alert history: {e}");
        }

        DispatchResult {
            alert_name: normalized_name,
            symbols,
            results,
        }
    }

    /// Alert-level guards (kill switch, config lookup, entry window) plus
    /// the per-symbol Entry Path fan-out. Any `Err` here is a
    /// dispatcher-level exception (spec §4.4 failure isolation).
    async fn dispatch_guarded(
        self: &Arc<Self>,
        raw_name: &str,
        normalized_name: &str,
        symbols: &[String],
        alert_time: chrono::DateTime<Utc>,
        results: &mut [SymbolResult],
    ) -> crate::error::Result<()> {
        // 3. Kill switch
        if self.store.is_kill(&self.user_id).await? {
            for result in results.iter_mut() {
                apply_entry_outcome(result, &EntryOutcome::Rejected { reason: RejectReason::KillSwitch });
            }
            return Ok(());
        }

        // 4. Config lookup with variant fallback
        let variants = name_variants(raw_name, normalized_name);
        let cfg = self.store.get_alert_config(&self.user_id, &variants).await?;
        let Some(cfg) = cfg else {
            for result in results.iter_mut() {
                apply_entry_outcome(result, &EntryOutcome::Skipped { reason: SkipReason::NoConfig });
            }
            return Ok(());
        };
        if !cfg.enabled {
            for result in results.iter_mut() {
                apply_entry_outcome(result, &EntryOutcome::Skipped { reason: SkipReason::Disabled });
            }
            return Ok(());
        }

        // 5. Entry window
        let now = Utc::now();
        if !is_in_entry_window(now, &cfg.entry_window_start, &cfg.entry_window_end) {
            for result in results.iter_mut() {
                apply_entry_outcome(result, &EntryOutcome::Rejected { reason: RejectReason::OutsideEntryWindow });
            }
            return Ok(());
        }

        // 6. Per-symbol Entry Path
        for (i, symbol) in symbols.iter().enumerate() {
            let outcome = self.enter(symbol, normalized_name, &cfg).await;
            if let EntryOutcome::Entered { ref trade_id, .. } = outcome {
                // stamp the position's alert_time to match the history row
                if let Some(mut position) = self.get_position(symbol).await {
                    position.alert_time = alert_time;
                    position.trade_id = trade_id.clone();
                    self.positions.write().await.insert(symbol.clone(), position);
                }
            }
            apply_entry_outcome(&mut results[i], &outcome);
        }

        self.emit(
            crate::events::EventType::Toast,
            crate::events::EventPayload::Toast {
                message: format!("alert {normalized_name} dispatched for {} symbol(s)", symbols.len()),
            },
        );

        Ok(())
    }
}

fn apply_entry_outcome(result: &mut SymbolResult, outcome: &EntryOutcome) {
    let (status, reason) = outcome.status_reason();
    result.status = status.to_string();
    result.reason = reason.map(|r| r.to_string());
    if let EntryOutcome::Entered { trade_id, order_id, qty, side, product, ltp } = outcome {
        result.trade_id = Some(trade_id.clone());
        result.order_id = Some(order_id.clone());
        result.qty = Some(*qty);
        result.side = Some(side.clone());
        result.product = Some(product.clone());
        result.ltp = Some(*ltp);
    }
    if let EntryOutcome::Error { detail } = outcome {
        result.reason = Some(detail.clone());
    }
}

/// Config lookup variants, in the order the dispatcher tries them (spec
/// §4.4 step 4): normalized name first, then {raw, lower, spaces-
/// >underscores, underscores->spaces, normalized} in order.
fn name_variants(raw_name: &str, normalized_name: &str) -> Vec<String> {
    let mut variants = vec![
        normalized_name.to_string(),
        raw_name.to_string(),
        raw_name.to_lowercase(),
        raw_name.replace(' ', "_"),
        raw_name.replace('_', " "),
        normalized_name.to_string(),
    ];
    variants.dedup();
    variants
}
