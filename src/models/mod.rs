//! Shared models for the market-data wire protocol.
//!
//! Contains the inbound frame types, outbound commands, connection
//! lifecycle states, and the [`MarketEvent`] stream variants the client
//! fans out to consumers.

pub mod order;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::book::BookSnapshot;

/// Connection lifecycle states.
///
/// Transitions happen only inside the connection supervisor. `Closed` is
/// the rest state after an explicit `close()`; a later `connect()` starts
/// a fresh lifecycle from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Where a price level originated: a user's resting order or the
/// externally sourced liquidity merged in by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelSource {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "BINANCE")]
    External,
}

fn default_source() -> LevelSource {
    LevelSource::External
}

/// A single price level in the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    #[serde(default = "default_source")]
    pub source: LevelSource,
}

/// A complete replacement ladder pair for one trading pair, as received
/// from the server. `timestamp` is the monotonic ordering key; frames
/// without one sort at zero.
#[derive(Debug, Clone, Deserialize)]
pub struct BookUpdate {
    #[serde(rename = "tradingPair")]
    pub trading_pair: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    #[serde(default)]
    pub timestamp: u64,
}

/// A typed inbound frame produced by the codec. Immutable once
/// constructed; malformed frames degrade to `ParseError` instead of
/// failing the stream.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Book(BookUpdate),
    Info(String),
    ServerError(String),
    ParseError { raw: String, detail: String },
}

/// A caller-issued command serialized onto the wire by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    Subscribe { trading_pair: String },
    Unsubscribe { trading_pair: String },
}

impl OutboundCommand {
    pub fn subscribe(trading_pair: impl Into<String>) -> Self {
        Self::Subscribe {
            trading_pair: trading_pair.into(),
        }
    }

    pub fn unsubscribe(trading_pair: impl Into<String>) -> Self {
        Self::Unsubscribe {
            trading_pair: trading_pair.into(),
        }
    }

    /// Returns the wire-format action name.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }

    /// Returns the trading pair this command targets.
    pub fn trading_pair(&self) -> &str {
        match self {
            Self::Subscribe { trading_pair } | Self::Unsubscribe { trading_pair } => trading_pair,
        }
    }
}

/// Events fanned out to every consumer of the market-data client.
///
/// The stream never terminates abnormally due to network conditions:
/// transport failures appear as `Disconnected`/`Reconnecting`, malformed
/// frames as `ParseError`, and only an explicit `close()` produces
/// `Closed`.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// The connection is open and subscriptions have been replayed.
    Connected,
    /// The transport dropped or a connect attempt failed.
    Disconnected { reason: String },
    /// A reconnect attempt is starting (1-based within the current outage).
    Reconnecting { attempt: u32 },
    /// The configured retry cap was reached; the client gave up.
    RetriesExhausted { attempts: u32 },
    /// The client was closed explicitly.
    Closed,
    /// A new order-book snapshot for one trading pair.
    Book(Arc<BookSnapshot>),
    /// Informational notice passed through from the server.
    Info(String),
    /// Error notice passed through from the server.
    ServerError(String),
    /// A single frame failed to parse; the connection and all book state
    /// are unaffected.
    ParseError { raw: String, detail: String },
}
