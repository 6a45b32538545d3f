/// Broker tick feed: a thin WebSocket forwarder. The wire protocol for the
/// live broker's streaming ticks is named-interface-only per spec §1 ("the
/// broker SDK itself" is an external collaborator); this client assumes a
/// JSON tick frame and hands each parsed tick to the caller over a channel,
/// never touching engine state directly (spec §5 — ticks must be forwarded
/// to the scheduler via a thread-safe handoff, not mutated in place).
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct RawTick {
    pub tradingsymbol: String,
    pub ltp: f64,
    #[serde(default)]
    pub prev_close: f64,
    #[serde(default)]
    pub session_high: f64,
    #[serde(default)]
    pub session_low: f64,
    #[serde(default)]
    pub total_buy_qty: i64,
    #[serde(default)]
    pub total_sell_qty: i64,
}

#[derive(Debug, serde::Serialize)]
struct SubscribeRequest<'a> {
    action: &'a str,
    symbols: &'a [String],
}

pub struct BrokerTickStream;

impl BrokerTickStream {
    /// Connects, subscribes to `symbols`, and spawns a task forwarding each
    /// parsed `RawTick` onto the returned channel. The caller (main.rs)
    /// drains this channel and calls `TradeEngine::on_tick` per spec §5's
    /// single-threaded-core rule.
    pub async fn connect(ws_url: &str, access_token: &str, symbols: Vec<String>) -> Result<mpsc::Receiver<RawTick>> {
        let url = format!("{ws_url}?access_token={access_token}");
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| EngineError::NetworkTimeout(format!("websocket connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = SubscribeRequest {
            action: "subscribe",
            symbols: &symbols,
        };
        let payload = serde_json::to_string(&subscribe)?;
        write
            .send(Message::Text(payload))
            .await
            .map_err(|e| EngineError::NetworkTimeout(format!("subscribe failed: {e}")))?;

        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<RawTick>(&text) {
                        Ok(tick) => {
                            if tx.send(tick).await.is_err() {
                                debug!("tick receiver dropped, stopping forward loop");
                                break;
                            }
                        }
                        Err(e) => warn!("discarding unparseable tick frame: {e}"),
                    },
                    Ok(Message::Close(_)) => {
                        info!("broker tick stream closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("broker tick stream error: {e}");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}
