//! Crate-level error types.
//!
//! [`BookfeedError`] unifies every error source (configuration, WebSocket,
//! JSON, HTTP) behind a single enum so callers can match on the variant
//! they care about while still using the `?` operator for easy propagation.
//!
//! The market-data event stream never carries these: transport and parse
//! failures there degrade to observable [`crate::models::MarketEvent`]s
//! instead. This type is for the request/response surfaces.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BookfeedError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum BookfeedError {
    /// A configuration value could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A WebSocket operation (connect, send) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An HTTP request to the order-placement backend failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend rejected a request with a non-success status.
    #[error("api error: status {status}: {body}")]
    Api { status: u16, body: String },

    /// An authenticated call was made with no active session.
    #[error("authentication required")]
    Unauthenticated,

    /// The client's background task is no longer running.
    #[error("market data client stopped")]
    ClientStopped,
}
