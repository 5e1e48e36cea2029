//! Order DTOs exchanged with the order-placement backend.
//!
//! These types pass through the REST collaborator unmodified; field names
//! follow the backend's camelCase wire contract.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::LevelSource;
use crate::book::BookSnapshot;

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

/// Execution style of an order being entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

/// Request body for creating an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateRequest {
    #[serde(rename = "type")]
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub trading_pair: String,
}

/// An order as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    /// ISO-8601 creation time.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub source: Option<LevelSource>,
    pub trading_pair: String,
}

/// Prices a market order off the current book: a buy crosses the best ask,
/// a sell the best bid. Limit orders keep their caller-entered price, so
/// this returns `None` for them, and for market orders when the relevant
/// side is empty.
///
/// Derived pricing is an explicit recomputation: call this again whenever
/// the side, the order type, or the book snapshot changes.
#[must_use]
pub fn market_price(
    side: OrderSide,
    order_type: OrderType,
    book: &BookSnapshot,
) -> Option<Decimal> {
    if order_type != OrderType::Market {
        return None;
    }
    match side {
        OrderSide::Buy => book.best_ask().map(|level| level.price),
        OrderSide::Sell => book.best_bid().map(|level| level.price),
    }
}
