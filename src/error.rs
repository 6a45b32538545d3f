/// Centralized error types for the trade engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Authentication / broker session errors
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Broker not connected: {0}")]
    BrokerNotConnected(String),

    #[error("Token expired: {0}")]
    TokenExpired(String),

    // Network errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    // Shared Store errors
    #[error("Shared store error: {0}")]
    StoreError(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // Order errors
    #[error("Order placement failed: {0}")]
    OrderPlacementFailed(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order worker shut down")]
    OrderWorkerShutdown,

    #[error("Exit order failed: {0}")]
    ExitOrderFailed(String),

    #[error("Critical failure, kill switch engaged: {0}")]
    CriticalFail(String),

    // Position errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position already exists: {0}")]
    DuplicatePosition(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // File I/O errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // Broker errors
    #[error("Broker API error: {code} - {message}")]
    BrokerApiError { code: String, message: String },

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    // System errors
    #[error("Fatal error: {0}")]
    FatalError(String),

    // Generic
    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Check if error is recoverable (caller may retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::NetworkTimeout(_)
                | EngineError::StoreError(_)
                | EngineError::RateLimitExceeded(_)
        )
    }

    /// Check if error requires immediate engine shutdown
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::FatalError(_))
    }

    /// Error code for logging/monitoring, matching the downstream-fault taxonomy
    pub fn error_code(&self) -> &str {
        match self {
            EngineError::AuthenticationFailed(_) => "AUTH_001",
            EngineError::BrokerNotConnected(_) => "AUTH_002",
            EngineError::TokenExpired(_) => "AUTH_003",
            EngineError::HttpError(_) => "NET_001",
            EngineError::NetworkTimeout(_) => "NET_002",
            EngineError::StoreError(_) => "STORE_001",
            EngineError::DeserializationError(_) => "DATA_001",
            EngineError::OrderPlacementFailed(_) => "ORDER_001",
            EngineError::OrderNotFound(_) => "ORDER_002",
            EngineError::OrderWorkerShutdown => "ORDER_003",
            EngineError::ExitOrderFailed(_) => "ORDER_004",
            EngineError::CriticalFail(_) => "SYS_002",
            EngineError::PositionNotFound(_) => "POS_001",
            EngineError::DuplicatePosition(_) => "POS_002",
            EngineError::ConfigError(_) => "CFG_001",
            EngineError::InvalidParameter(_) => "CFG_002",
            EngineError::FileError(_) => "FILE_001",
            EngineError::BrokerApiError { .. } => "BROKER_001",
            EngineError::RateLimitExceeded(_) => "BROKER_002",
            EngineError::InstrumentNotFound(_) => "BROKER_003",
            EngineError::FatalError(_) => "SYS_001",
            EngineError::InternalError(_) => "INT_001",
            EngineError::Other(_) => "GEN_001",
        }
    }
}
