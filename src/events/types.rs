/// Observability event vocabulary (spec §2.8): the Trade Engine broadcasts
/// `(user_id, event)` after every meaningful state change. What happens to
/// the event downstream (WebSocket fan-out, toast UI) is an external
/// collaborator; this crate only defines the shape and the in-process bus.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub user_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(user_id: impl Into<String>, event_type: EventType, payload: EventPayload) -> Self {
        Self {
            user_id: user_id.into(),
            event_type,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    TickUpdated,
    SectorSummary,
    MonitoringRecord,
    PositionOpened,
    PositionUpdated,
    ExitConditionsMet,
    PositionClosed,
    PositionRefresh,
    Toast,
    KillSwitchEngaged,
}

/// Per-level distance used in monitoring records (spec §4.6, "near" tags).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelDistance {
    pub label: &'static str,
    pub distance_pct: f64,
    pub near: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    TickUpdated {
        symbol: String,
        ltp: f64,
    },
    SectorSummary {
        ranked: Vec<(String, f64)>,
    },
    MonitoringRecord {
        trade_id: String,
        symbol: String,
        entry_price: f64,
        ltp: f64,
        pnl: f64,
        target_price: f64,
        stop_loss_price: f64,
        trailing_line: f64,
        distances: Vec<LevelDistance>,
    },
    PositionOpened {
        trade_id: String,
        symbol: String,
        side: String,
        qty: i64,
        entry_price: f64,
    },
    PositionUpdated {
        trade_id: String,
        symbol: String,
        ltp: f64,
        pnl: f64,
    },
    ExitConditionsMet {
        trade_id: String,
        symbol: String,
        reason: String,
    },
    PositionClosed {
        trade_id: String,
        symbol: String,
        exit_reason: String,
        pnl: f64,
    },
    PositionRefresh {
        symbol: String,
    },
    Toast {
        message: String,
    },
    KillSwitchEngaged {
        reason: String,
    },
}
