/// Paper-trading `BrokerAdapter`: fills every order at the last cached
/// tick price instead of routing to the live broker. Used for dry-run
/// operation and in engine-level tests where a live broker connection
/// would be inappropriate.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{BrokerAdapter, BrokerPosition, BrokerProfile};
use crate::error::{EngineError, Result};
use crate::types::{Product, Side};

pub struct PaperBrokerClient {
    user_id: String,
    next_order_id: AtomicU64,
    /// symbol -> last known LTP, fed by the same tick stream the engine uses.
    ltp_cache: Arc<RwLock<HashMap<String, f64>>>,
    /// net positions accumulated across fills, keyed by tradingsymbol.
    positions: Arc<RwLock<HashMap<String, BrokerPosition>>>,
}

impl PaperBrokerClient {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            next_order_id: AtomicU64::new(1),
            ltp_cache: Arc::new(RwLock::new(HashMap::new())),
            positions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn update_ltp(&self, symbol: &str, ltp: f64) {
        self.ltp_cache.write().await.insert(symbol.to_string(), ltp);
    }
}

#[async_trait]
impl BrokerAdapter for PaperBrokerClient {
    async fn place_order(
        &self,
        _exchange: &str,
        tradingsymbol: &str,
        side: Side,
        quantity: i64,
        product: Product,
    ) -> Result<String> {
        let fill_price = *self
            .ltp_cache
            .read()
            .await
            .get(tradingsymbol)
            .ok_or_else(|| EngineError::OrderPlacementFailed(format!("no LTP cached for {tradingsymbol}")))?;
        let signed_qty = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        let mut positions = self.positions.write().await;
        positions
            .entry(tradingsymbol.to_string())
            .and_modify(|p| p.quantity += signed_qty)
            .or_insert(BrokerPosition {
                tradingsymbol: tradingsymbol.to_string(),
                quantity: signed_qty,
                average_price: fill_price,
                product,
            });
        let order_id = format!("PAPER-{}-{}", self.user_id, self.next_order_id.fetch_add(1, Ordering::SeqCst));
        Ok(order_id)
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn instruments(&self, _exchange: &str) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    async fn quote(&self, _exchange: &str, tradingsymbol: &str) -> Result<f64> {
        self.ltp_cache
            .read()
            .await
            .get(tradingsymbol)
            .copied()
            .ok_or_else(|| EngineError::InstrumentNotFound(tradingsymbol.to_string()))
    }

    async fn profile(&self) -> Result<BrokerProfile> {
        Ok(BrokerProfile {
            user_id: self.user_id.clone(),
            user_name: format!("paper:{}", self.user_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn place_order_fails_without_cached_ltp() {
        let broker = PaperBrokerClient::new("u1");
        let result = broker
            .place_order("NSE", "SBIN", Side::Buy, 10, Product::Intraday)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn place_order_fills_at_cached_ltp_and_accumulates_net_qty() {
        let broker = PaperBrokerClient::new("u1");
        broker.update_ltp("SBIN", 100.0).await;
        broker.place_order("NSE", "SBIN", Side::Buy, 10, Product::Intraday).await.unwrap();
        broker.place_order("NSE", "SBIN", Side::Buy, 5, Product::Intraday).await.unwrap();
        let positions = broker.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 15);
        assert_eq!(positions[0].average_price, 100.0);
    }

    #[tokio::test]
    async fn opposite_side_reduces_net_quantity() {
        let broker = PaperBrokerClient::new("u1");
        broker.update_ltp("SBIN", 100.0).await;
        broker.place_order("NSE", "SBIN", Side::Buy, 10, Product::Intraday).await.unwrap();
        broker.place_order("NSE", "SBIN", Side::Sell, 10, Product::Intraday).await.unwrap();
        let positions = broker.positions().await.unwrap();
        assert_eq!(positions[0].quantity, 0);
    }
}
