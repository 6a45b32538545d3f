/// Kite Connect REST client: the broker SDK used by the Trade Engine
/// (spec §6 field shapes). All calls are routed through the Order
/// Worker — this client itself is a thin, stateless wrapper.
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{BrokerAdapter, BrokerPosition, BrokerProfile};
use crate::error::{EngineError, Result};
use crate::types::{Product, Side};

const BASE_URL: &str = "https://api.kite.trade";

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    variety: &'a str,
    exchange: &'a str,
    tradingsymbol: &'a str,
    transaction_type: &'a str,
    quantity: i64,
    product: &'a str,
    order_type: &'a str,
    validity: &'a str,
}

#[derive(Debug, Deserialize)]
struct KiteEnvelope<T> {
    status: String,
    data: Option<T>,
    message: Option<String>,
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponseData {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct PositionsResponseData {
    net: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    tradingsymbol: String,
    quantity: i64,
    average_price: f64,
    product: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentRow {
    instrument_token: String,
    tradingsymbol: String,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    last_price: f64,
}

#[derive(Debug, Deserialize)]
struct ProfileData {
    user_id: String,
    user_name: String,
}

pub struct KiteBrokerClient {
    client: Client,
    api_key: String,
    access_token: String,
}

impl KiteBrokerClient {
    pub fn new(api_key: String, access_token: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            api_key,
            access_token,
        }
    }

    fn auth_header(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }

    async fn parse_envelope<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        debug!("kite {} response status={} body={}", context, status, body);
        let envelope: KiteEnvelope<T> = serde_json::from_str(&body)?;
        if envelope.status != "success" {
            return Err(EngineError::BrokerApiError {
                code: envelope.error_type.unwrap_or_default(),
                message: envelope.message.unwrap_or_default(),
            });
        }
        envelope
            .data
            .ok_or_else(|| EngineError::BrokerApiError {
                code: "EMPTY_DATA".to_string(),
                message: format!("{context} returned no data"),
            })
    }
}

#[async_trait]
impl BrokerAdapter for KiteBrokerClient {
    async fn place_order(
        &self,
        exchange: &str,
        tradingsymbol: &str,
        side: Side,
        quantity: i64,
        product: Product,
    ) -> Result<String> {
        let req = OrderRequest {
            variety: "regular",
            exchange,
            tradingsymbol,
            transaction_type: side.as_str(),
            quantity,
            product: product.as_str(),
            order_type: "MARKET",
            validity: "DAY",
        };
        debug!("placing order: {:?}", req);
        let response = self
            .client
            .post(format!("{BASE_URL}/orders/regular"))
            .header("Authorization", self.auth_header())
            .form(&req)
            .send()
            .await?;
        let data: OrderResponseData = self.parse_envelope(response, "place_order").await?;
        info!("order placed: {}", data.order_id);
        Ok(data.order_id)
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        let response = self
            .client
            .get(format!("{BASE_URL}/portfolio/positions"))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let data: PositionsResponseData = self.parse_envelope(response, "positions").await?;
        Ok(data
            .net
            .into_iter()
            .map(|p| BrokerPosition {
                tradingsymbol: p.tradingsymbol,
                quantity: p.quantity,
                average_price: p.average_price,
                product: if p.product == "CNC" {
                    Product::Delivery
                } else {
                    Product::Intraday
                },
            })
            .collect())
    }

    async fn instruments(&self, exchange: &str) -> Result<HashMap<String, String>> {
        let response = self
            .client
            .get(format!("{BASE_URL}/instruments/{exchange}"))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let body = response.text().await?;
        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let mut map = HashMap::new();
        for row in reader.deserialize::<InstrumentRow>() {
            let row = row.map_err(|e| EngineError::InstrumentNotFound(e.to_string()))?;
            map.insert(row.tradingsymbol, row.instrument_token);
        }
        Ok(map)
    }

    async fn quote(&self, exchange: &str, tradingsymbol: &str) -> Result<f64> {
        let response = self
            .client
            .get(format!("{BASE_URL}/quote/ltp"))
            .header("Authorization", self.auth_header())
            .query(&[("i", format!("{exchange}:{tradingsymbol}"))])
            .send()
            .await?;
        let key = format!("{exchange}:{tradingsymbol}");
        let data: HashMap<String, QuoteData> = self.parse_envelope(response, "quote").await?;
        data.get(&key)
            .map(|q| q.last_price)
            .ok_or_else(|| EngineError::InstrumentNotFound(tradingsymbol.to_string()))
    }

    async fn profile(&self) -> Result<BrokerProfile> {
        let response = self
            .client
            .get(format!("{BASE_URL}/user/profile"))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let data: ProfileData = self.parse_envelope(response, "profile").await?;
        Ok(BrokerProfile {
            user_id: data.user_id,
            user_name: data.user_name,
        })
    }
}
