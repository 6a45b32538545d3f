/// Core type definitions for the trade engine
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert direction: which side the alert wants to enter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// Entry side implied by this direction
    pub fn entry_side(&self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }
}

/// Broker product code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    Intraday,
    Delivery,
}

impl Product {
    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Intraday => "INTRADAY",
            Product::Delivery => "DELIVERY",
        }
    }
}

/// Position sizing strategy for an alert config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QtyMode {
    FixedQty,
    FixedCapital,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Position lifecycle status. Transitions monotonically:
/// Open -> ExitConditionsMet -> Exiting -> Closed, with Open -> Error /
/// Open -> Rejected as terminal dead ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    ExitConditionsMet,
    Exiting,
    Closed,
    Rejected,
    Error,
}

impl PositionStatus {
    /// Status values that count toward the at-most-one-active-position guard
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PositionStatus::Open | PositionStatus::ExitConditionsMet | PositionStatus::Exiting
        )
    }
}

/// Exit reason, in the deterministic evaluation order used by the monitor loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Target,
    StopLoss,
    TrailingSl,
    Manual,
    AutoSquareOff,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Target => "TARGET",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingSl => "TRAILING_SL",
            ExitReason::Manual => "MANUAL",
            ExitReason::AutoSquareOff => "AUTO_SQ_OFF",
        }
    }
}

/// Per-(user, normalized_alert_name) configuration, operator-authored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub raw_name: String,
    pub normalized_name: String,
    pub enabled: bool,
    pub direction: Direction,
    pub product: Product,
    pub qty_mode: QtyMode,
    pub qty: i64,
    pub capital: f64,
    pub target_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_stop_pct: f64,
    pub trade_limit_per_day: u32,
    pub sector_filter_on: bool,
    pub top_n_sector: usize,
    pub entry_window_start: String,
    pub entry_window_end: String,
}

/// An open/closing/closed position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: String,
    pub user_id: String,
    pub symbol: String,
    pub alert_name: String,
    pub alert_time: DateTime<Utc>,

    pub side: Side,
    pub product: Product,
    pub qty: i64,

    pub entry_price: f64,
    pub ltp: f64,
    pub target_price: f64,
    pub stop_loss_price: f64,
    pub trailing_stop_pct: f64,
    pub running_extreme: f64,

    pub status: PositionStatus,

    pub entry_order_id: Option<String>,
    pub exit_order_id: Option<String>,

    pub exit_reason: Option<String>,
    pub pnl: f64,

    /// Echoed config percentages, needed to recompute levels after
    /// entry-price reconciliation without re-reading AlertConfig.
    pub cfg_target_pct: f64,
    pub cfg_sl_pct: f64,
    pub cfg_tsl_pct: f64,

    pub sector: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Recompute target/stop/extreme from the echoed config percentages.
    /// Called after fill reconciliation changes `entry_price`.
    pub fn recompute_levels_from_entry(&mut self) {
        let entry = self.entry_price;
        match self.side {
            Side::Buy => {
                self.target_price = entry * (1.0 + self.cfg_target_pct / 100.0);
                self.stop_loss_price = entry * (1.0 - self.cfg_sl_pct / 100.0);
            }
            Side::Sell => {
                self.target_price = entry * (1.0 - self.cfg_target_pct / 100.0);
                self.stop_loss_price = entry * (1.0 + self.cfg_sl_pct / 100.0);
            }
        }
        self.running_extreme = entry;
    }
}

/// In-memory tick cache entry
#[derive(Debug, Clone, Copy, Default)]
pub struct Tick {
    pub ltp: f64,
    pub prev_close: f64,
    pub session_high: f64,
    pub session_low: f64,
    pub total_buy_qty: i64,
    pub total_sell_qty: i64,
}

/// Engine-wide configuration loaded from TOML at startup. Per-user
/// AlertConfig lives in the Shared Store, not here.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    // Shared Store
    pub redis_url: String,

    // Lock / counter TTLs
    pub entry_lock_ttl_ms: u64,
    pub exit_lock_ttl_ms: u64,
    pub counter_grace_hours: i64,

    // Entry path timing
    pub ltp_wait_timeout_ms: u64,
    pub ltp_wait_poll_ms: u64,

    // Throttling
    pub snapshot_throttle_ms: u64,
    pub monitoring_log_throttle_ms: u64,
    pub sector_summary_throttle_s: u64,
    pub tick_broadcast_throttle_ms: u64,

    // Venue
    pub venue_exchange: String,
    pub venue_timezone: String,

    // Broker credentials (opaque; encryption-at-rest is out of scope)
    pub broker_api_key: String,
    pub broker_api_secret: String,
    pub broker_access_token: String,
    pub broker_ws_url: String,

    /// Use the in-process simulated broker instead of the live Kite client.
    #[serde(default)]
    pub paper_trading: bool,

    // Logging
    pub log_level: String,
}
