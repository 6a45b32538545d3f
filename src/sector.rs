/// Sector Ranker: an incremental accumulator gating entries by sector
/// relative strength. Pure data structure, no I/O — callers own locking.
use crate::types::Direction;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SectorRanker {
    symbol_pct: HashMap<String, f64>,
    sector_sum: HashMap<String, f64>,
    sector_count: HashMap<String, u32>,
    /// First-seen order, so `ranked` has a deterministic pre-sort basis
    /// instead of `HashMap` iteration order.
    sector_order: Vec<String>,
}

impl SectorRanker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update on every tick carrying a valid `prev_close > 0`. O(1).
    pub fn update(&mut self, symbol: &str, sector: &str, ltp: f64, prev_close: f64) {
        if prev_close <= 0.0 {
            return;
        }
        if !self.sector_sum.contains_key(sector) {
            self.sector_order.push(sector.to_string());
        }
        let pct = (ltp - prev_close) / prev_close * 100.0;
        match self.symbol_pct.get(symbol) {
            Some(prev_pct) => {
                let delta = pct - prev_pct;
                *self.sector_sum.entry(sector.to_string()).or_insert(0.0) += delta;
            }
            None => {
                *self.sector_sum.entry(sector.to_string()).or_insert(0.0) += pct;
                *self.sector_count.entry(sector.to_string()).or_insert(0) += 1;
            }
        }
        self.symbol_pct.insert(symbol.to_string(), pct);
    }

    /// Sectors sorted by average percent-change descending. Ties resolve in
    /// first-seen order, not `HashMap` iteration order.
    pub fn ranked(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .sector_order
            .iter()
            .filter(|sector| self.sector_count.get(sector.as_str()).copied().unwrap_or(0) > 0)
            .map(|sector| {
                let count = self.sector_count.get(sector).copied().unwrap_or(0);
                let sum = self.sector_sum.get(sector).copied().unwrap_or(0.0);
                (sector.clone(), sum / count as f64)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    pub fn average(&self, sector: &str) -> Option<f64> {
        let count = *self.sector_count.get(sector)?;
        if count == 0 {
            return None;
        }
        let sum = self.sector_sum.get(sector).copied().unwrap_or(0.0);
        Some(sum / count as f64)
    }

    /// Gate semantics: sector filter off passes unconditionally; an unknown
    /// sector fails closed; otherwise LONG passes in the top-N gainers,
    /// SHORT passes in the bottom-N losers.
    pub fn gate(
        &self,
        sector_filter_on: bool,
        sector: Option<&str>,
        direction: Direction,
        top_n: usize,
    ) -> bool {
        if !sector_filter_on {
            return true;
        }
        let Some(sector) = sector else {
            return false;
        };
        let ranked = self.ranked();
        if ranked.is_empty() {
            return false;
        }
        let position = ranked.iter().position(|(s, _)| s == sector);
        let Some(position) = position else {
            return false;
        };
        match direction {
            Direction::Long => position < top_n,
            Direction::Short => position >= ranked.len().saturating_sub(top_n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_ignores_invalid_prev_close() {
        let mut sr = SectorRanker::new();
        sr.update("SBIN", "NIFTY BANK", 100.0, 0.0);
        assert_eq!(sr.average("NIFTY BANK"), None);
    }

    #[test]
    fn update_computes_percent_change() {
        let mut sr = SectorRanker::new();
        sr.update("SBIN", "NIFTY BANK", 101.0, 100.0);
        assert!((sr.average("NIFTY BANK").unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_update_for_same_symbol_replaces_contribution() {
        let mut sr = SectorRanker::new();
        sr.update("SBIN", "NIFTY BANK", 101.0, 100.0); // +1%
        sr.update("SBIN", "NIFTY BANK", 102.0, 100.0); // +2%, delta +1
        assert!((sr.average("NIFTY BANK").unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn ranked_breaks_ties_by_first_seen_order_not_hashmap_order() {
        let mut sr = SectorRanker::new();
        // FMCG and AUTO tie at +1.0%; FMCG was seen first and must rank
        // ahead of AUTO regardless of HashMap iteration order.
        sr.update("F1", "FMCG", 101.0, 100.0);
        sr.update("A1", "AUTO", 101.0, 100.0);
        sr.update("B1", "BANK", 99.0, 100.0);
        let names: Vec<&str> = sr.ranked().iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(names, vec!["FMCG", "AUTO", "BANK"]);
    }

    #[test]
    fn ranked_sorts_descending() {
        let mut sr = SectorRanker::new();
        sr.update("A", "IT", 101.5, 100.0);
        sr.update("B", "AUTO", 101.2, 100.0);
        sr.update("C", "BANK", 99.7, 100.0);
        sr.update("D", "FMCG", 99.1, 100.0);
        let ranked = sr.ranked();
        let names: Vec<&str> = ranked.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(names, vec!["IT", "AUTO", "BANK", "FMCG"]);
    }

    #[test]
    fn gate_passes_when_filter_off() {
        let sr = SectorRanker::new();
        assert!(sr.gate(false, None, Direction::Long, 2));
    }

    #[test]
    fn gate_fails_closed_for_unknown_sector() {
        let mut sr = SectorRanker::new();
        sr.update("A", "IT", 101.5, 100.0);
        assert!(!sr.gate(true, None, Direction::Long, 2));
    }

    #[test]
    fn gate_long_passes_top_n_gainers() {
        let mut sr = SectorRanker::new();
        sr.update("A", "IT", 101.5, 100.0);
        sr.update("B", "AUTO", 101.2, 100.0);
        sr.update("C", "BANK", 99.7, 100.0);
        sr.update("D", "FMCG", 99.1, 100.0);
        assert!(sr.gate(true, Some("IT"), Direction::Long, 2));
        assert!(sr.gate(true, Some("AUTO"), Direction::Long, 2));
        assert!(!sr.gate(true, Some("BANK"), Direction::Long, 2));
    }

    #[test]
    fn gate_short_passes_bottom_n_losers() {
        let mut sr = SectorRanker::new();
        sr.update("A", "IT", 101.5, 100.0);
        sr.update("B", "AUTO", 101.2, 100.0);
        sr.update("C", "BANK", 99.7, 100.0);
        sr.update("D", "FMCG", 99.1, 100.0);
        assert!(sr.gate(true, Some("FMCG"), Direction::Short, 2));
        assert!(sr.gate(true, Some("BANK"), Direction::Short, 2));
        assert!(!sr.gate(true, Some("IT"), Direction::Short, 2));
    }

    #[test]
    fn scenario_sector_gate_rejects_itc_under_fmcg() {
        // ranks [IT:+1.5, AUTO:+1.2, BANK:-0.3, FMCG:-0.9], top_n_sector=2,
        // LONG, ITC mapped to FMCG -> SECTOR_FILTER reject.
        let mut sr = SectorRanker::new();
        sr.update("X1", "IT", 101.5, 100.0);
        sr.update("X2", "AUTO", 101.2, 100.0);
        sr.update("X3", "BANK", 99.7, 100.0);
        sr.update("X4", "FMCG", 99.1, 100.0);
        assert!(!sr.gate(true, Some("FMCG"), Direction::Long, 2));
    }
}
