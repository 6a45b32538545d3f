/// Order Worker (spec §4.2): a single-consumer FIFO queue that serializes
/// broker calls onto one background task so the hot tick loop never blocks
/// on synchronous, rate-limited broker I/O. Producers enqueue a job and get
/// back a future; the consumer always resolves it, even when the broker
/// call fails, so a placement failure surfaces as `Err` rather than a
/// dropped future.
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::broker::{BrokerAdapter, BrokerPosition};
use crate::error::{EngineError, Result};
use crate::types::{Product, Side};

#[derive(Debug, Clone)]
pub enum OrderJob {
    PlaceOrder {
        exchange: String,
        tradingsymbol: String,
        side: Side,
        quantity: i64,
        product: Product,
    },
    FetchPositions,
    Quote {
        exchange: String,
        tradingsymbol: String,
    },
}

#[derive(Debug, Clone)]
pub enum OrderReply {
    OrderId(String),
    Positions(Vec<BrokerPosition>),
    Quote(f64),
}

impl OrderReply {
    pub fn into_order_id(self) -> Result<String> {
        match self {
            OrderReply::OrderId(id) => Ok(id),
            _ => Err(EngineError::InternalError("expected OrderId reply".into())),
        }
    }

    pub fn into_positions(self) -> Result<Vec<BrokerPosition>> {
        match self {
            OrderReply::Positions(p) => Ok(p),
            _ => Err(EngineError::InternalError("expected Positions reply".into())),
        }
    }
}

struct Envelope {
    job: OrderJob,
    reply: oneshot::Sender<Result<OrderReply>>,
}

/// Handle producers use to submit jobs; cheap to clone, shares one queue.
#[derive(Clone)]
pub struct OrderWorker {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl OrderWorker {
    /// Spawns the single consumer task once. `broker` is shared by every
    /// user's order flow; the FIFO queue is what keeps broker rate limits
    /// trivial to reason about (spec §4.2, §5).
    pub fn spawn(broker: Arc<dyn BrokerAdapter>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(Envelope { job, reply }) = rx.recv().await {
                let result = Self::execute(&broker, job).await;
                if reply.send(result).is_err() {
                    warn!("order worker: caller dropped receiver before reply");
                }
            }
            debug!("order worker: queue closed, consumer exiting");
        });
        Self { tx }
    }

    async fn execute(broker: &Arc<dyn BrokerAdapter>, job: OrderJob) -> Result<OrderReply> {
        match job {
            OrderJob::PlaceOrder {
                exchange,
                tradingsymbol,
                side,
                quantity,
                product,
            } => broker
                .place_order(&exchange, &tradingsymbol, side, quantity, product)
                .await
                .map(OrderReply::OrderId),
            OrderJob::FetchPositions => broker.positions().await.map(OrderReply::Positions),
            OrderJob::Quote { exchange, tradingsymbol } => {
                broker.quote(&exchange, &tradingsymbol).await.map(OrderReply::Quote)
            }
        }
    }

    /// Enqueue a job and await its resolution. Resolves with `Err` rather
    /// than panicking or hanging if the broker call fails (spec §4.2).
    pub async fn submit(&self, job: OrderJob) -> Result<OrderReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope { job, reply: reply_tx })
            .map_err(|_| EngineError::OrderWorkerShutdown)?;
        reply_rx.await.map_err(|_| EngineError::OrderWorkerShutdown)?
    }
}
