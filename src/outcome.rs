/// Tagged-value outcomes for guard evaluation (spec §7 error taxonomy).
///
/// Guards (rate limits, locks, window checks, sector gates, ...) are not
/// faults: a rejected entry is an expected, frequent result, not an error
/// condition. These types carry `{status, reason}` the way the webhook
/// response does, and are never wrapped in `EngineError`.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum EntryOutcome {
    Entered {
        trade_id: String,
        order_id: String,
        qty: i64,
        side: String,
        product: String,
        ltp: f64,
    },
    Rejected {
        reason: RejectReason,
    },
    Skipped {
        reason: SkipReason,
    },
    Error {
        detail: String,
    },
}

impl EntryOutcome {
    pub fn is_entered(&self) -> bool {
        matches!(self, EntryOutcome::Entered { .. })
    }

    /// The `(status, reason)` pair as rendered in alert history / the
    /// webhook response (spec §6, §7).
    pub fn status_reason(&self) -> (&'static str, Option<&'static str>) {
        match self {
            EntryOutcome::Entered { .. } => ("ENTERED", None),
            EntryOutcome::Rejected { reason } => ("REJECTED", Some(reason.as_str())),
            EntryOutcome::Skipped { reason } => ("SKIPPED", Some(reason.as_str())),
            EntryOutcome::Error { .. } => ("ERROR", None),
        }
    }
}

/// Structural impossibilities (spec §7): the request can never succeed as
/// given, regardless of retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    KillSwitch,
    OutsideEntryWindow,
    BadQty,
    CncShortNotAllowed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::KillSwitch => "KILL_SWITCH",
            RejectReason::OutsideEntryWindow => "OUTSIDE_ENTRY_WINDOW",
            RejectReason::BadQty => "BAD_QTY",
            RejectReason::CncShortNotAllowed => "CNC_SHORT_NOT_ALLOWED",
        }
    }
}

/// Transient / policy refusals (spec §7): the same request might succeed
/// later or for a different symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    NoConfig,
    Disabled,
    SectorFilter,
    AlreadyOpen,
    AlreadyOpenRedis,
    EntryLockBusy,
    NoLtpForCapitalQty,
    TradeLimit,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoConfig => "NO_CONFIG",
            SkipReason::Disabled => "DISABLED",
            SkipReason::SectorFilter => "SECTOR_FILTER",
            SkipReason::AlreadyOpen => "ALREADY_OPEN",
            SkipReason::AlreadyOpenRedis => "ALREADY_OPEN_REDIS",
            SkipReason::EntryLockBusy => "ENTRY_LOCK_BUSY",
            SkipReason::NoLtpForCapitalQty => "NO_LTP_FOR_CAPITAL_QTY",
            SkipReason::TradeLimit => "TRADE_LIMIT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum ExitOutcome {
    Exited { order_id: String, reason: String },
    NoOp,
    Error { detail: String },
}

impl ExitOutcome {
    pub fn is_exited(&self) -> bool {
        matches!(self, ExitOutcome::Exited { .. })
    }
}
