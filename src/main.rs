/// Entry point: wires the Shared Store, Broker Adapter, Order Worker,
/// Event Bus and Trade Engine Core together, then drains the broker tick
/// feed into the engine for the lifetime of the process.
use std::sync::Arc;

use tracing::{error, info, warn};

use trade_engine::broker::{BrokerAdapter, BrokerTickStream, KiteBrokerClient, PaperBrokerClient};
use trade_engine::config::load_config;
use trade_engine::engine::TradeEngine;
use trade_engine::error::Result;
use trade_engine::events::EventBus;
use trade_engine::order_worker::OrderWorker;
use trade_engine::store::{InMemorySharedStore, RedisSharedStore, SharedStore};

/// A single operator's engine plus the plumbing that feeds it (spec §2:
/// one Trade Engine instance per user account).
struct App {
    engine: Arc<TradeEngine>,
}

impl App {
    async fn bootstrap(user_id: &str, config_path: &str) -> Result<Self> {
        let config = Arc::new(load_config(config_path)?);
        info!(user = %user_id, "configuration loaded");

        let store: Arc<dyn SharedStore> = match RedisSharedStore::connect(&config.redis_url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("redis unavailable ({e}); falling back to in-memory shared store");
                Arc::new(InMemorySharedStore::new())
            }
        };

        let broker: Arc<dyn BrokerAdapter> = if config.paper_trading {
            Arc::new(PaperBrokerClient::new(user_id.to_string()))
        } else {
            Arc::new(KiteBrokerClient::new(config.broker_api_key.clone(), config.broker_access_token.clone()))
        };

        let order_worker = OrderWorker::spawn(Arc::clone(&broker));

        let event_bus = Arc::new(EventBus::new());
        event_bus.start_processing().await;

        let engine = Arc::new(TradeEngine::new(
            user_id.to_string(),
            store,
            broker,
            order_worker,
            event_bus,
            config,
        ));

        let resubscribe = engine.rehydrate().await?;
        if !resubscribe.is_empty() {
            info!(symbols = ?resubscribe, "rehydrated open positions, resubscribing market data");
        }

        Ok(Self { engine })
    }

    /// Connects the broker tick feed and forwards every tick to the engine
    /// until the stream closes (spec §5: ticks are handed to the core via
    /// a thread-safe channel, never mutated in place by the feed itself).
    async fn run_tick_loop(&self, ws_url: &str, access_token: &str, symbols: Vec<String>) -> Result<()> {
        let mut ticks = BrokerTickStream::connect(ws_url, access_token, symbols).await?;
        while let Some(tick) = ticks.recv().await {
            self.engine
                .on_tick(
                    &tick.tradingsymbol,
                    tick.ltp,
                    tick.prev_close,
                    tick.session_high,
                    tick.session_low,
                    tick.total_buy_qty,
                    tick.total_sell_qty,
                )
                .await;
        }
        warn!("broker tick stream closed");
        Ok(())
    }

    /// Minimal admin surface (spec §6): toggle kill, toggle auto-square-off,
    /// trigger bulk exit, delete alert config. Not part of the core; a
    /// thin CLI placeholder for the HTTP front-end this crate doesn't own.
    async fn handle_admin_command(&self, command: &str) -> Result<()> {
        match command {
            "kill-on" => {
                self.engine.engage_kill_switch("manual admin command").await;
                info!("kill switch engaged via admin command");
            }
            "kill-off" => {
                self.engine.disengage_kill_switch().await?;
                info!("kill switch disengaged via admin command");
            }
            "square-off" => {
                let n = self.engine.bulk_square_off().await;
                info!(count = n, "bulk square-off triggered via admin command");
            }
            other => {
                warn!("unrecognized admin command: {other}");
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "trade_engine=info".to_string()))
        .init();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let user_id = std::env::var("TRADE_ENGINE_USER_ID").unwrap_or_else(|_| "default".to_string());

    info!("starting trade engine");
    let app = App::bootstrap(&user_id, &config_path).await?;

    let ws_url = app.engine.config().broker_ws_url.clone();
    let access_token = app.engine.config().broker_access_token.clone();
    let symbols: Vec<String> = app
        .engine
        .positions_snapshot()
        .await
        .into_iter()
        .map(|p| p.symbol)
        .collect();

    if let Some(command) = std::env::args().nth(1) {
        app.handle_admin_command(&command).await?;
        return Ok(());
    }

    if let Err(e) = app.run_tick_loop(&ws_url, &access_token, symbols).await {
        error!("tick loop terminated: {e}");
    }

    Ok(())
}
