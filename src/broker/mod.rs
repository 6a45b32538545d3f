pub mod kite;
pub mod paper;
pub mod websocket;

pub use kite::KiteBrokerClient;
pub use paper::PaperBrokerClient;
pub use websocket::{BrokerTickStream, RawTick};

use crate::error::Result;
use crate::types::{Product, Side};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A row from the broker's `positions()` call (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerPosition {
    pub tradingsymbol: String,
    /// Signed: positive long, negative short.
    pub quantity: i64,
    pub average_price: f64,
    pub product: Product,
}

/// Everything the Trade Engine needs from the broker SDK, behind one seam
/// so the Order Worker can serialize calls to it without knowing whether
/// it's talking to the live broker or a test double.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn place_order(
        &self,
        exchange: &str,
        tradingsymbol: &str,
        side: Side,
        quantity: i64,
        product: Product,
    ) -> Result<String>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>>;

    /// Symbol -> instrument token map for the given exchange.
    async fn instruments(&self, exchange: &str) -> Result<std::collections::HashMap<String, String>>;

    async fn quote(&self, exchange: &str, tradingsymbol: &str) -> Result<f64>;

    /// Broker-readiness check (spec §4.5 step 5): credentials and access
    /// token present and accepted.
    async fn profile(&self) -> Result<BrokerProfile>;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerProfile {
    pub user_id: String,
    pub user_name: String,
}
