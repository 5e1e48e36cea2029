//! Order-book state reduction.
//!
//! [`OrderBookReducer`] folds inbound [`BookUpdate`]s into per-pair book
//! state. The server sends complete replacement ladders per update, so
//! applying one rebuilds the pair's ladders from the incoming message
//! alone; the only cross-update state is the monotonic ordering key used
//! to drop stale frames.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::models::{BookUpdate, PriceLevel};

/// An immutable view of one trading pair's book, published to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    pub trading_pair: String,
    /// Sorted descending by price, no duplicates, no zero-quantity rows.
    pub bids: Vec<PriceLevel>,
    /// Sorted ascending by price, no duplicates, no zero-quantity rows.
    pub asks: Vec<PriceLevel>,
    /// Ordering key of the update this snapshot was built from.
    pub timestamp: u64,
}

impl BookSnapshot {
    /// Highest bid, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Lowest ask, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

/// Per-pair reducer state. Mutated only through [`OrderBookReducer::apply`].
#[derive(Debug, Default)]
struct BookState {
    last_applied: Option<u64>,
    current: Option<Arc<BookSnapshot>>,
}

/// Folds book updates into current per-pair state.
#[derive(Debug, Default)]
pub struct OrderBookReducer {
    books: HashMap<String, BookState>,
}

impl OrderBookReducer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a book update, returning the new snapshot if the update's
    /// ordering key advanced past the last applied one.
    ///
    /// Stale or duplicate keys are dropped silently (`None`); they are not
    /// errors. Invalid price levels are logged and skipped rather than
    /// corrupting the ladder.
    pub fn apply(&mut self, update: &BookUpdate) -> Option<Arc<BookSnapshot>> {
        let state = self.books.entry(update.trading_pair.clone()).or_default();

        if let Some(last) = state.last_applied {
            if update.timestamp <= last {
                debug!(
                    pair = %update.trading_pair,
                    key = update.timestamp,
                    last_applied = last,
                    "dropping stale book update"
                );
                return None;
            }
        }

        let bids = build_side(&update.trading_pair, "bids", &update.bids, true);
        let asks = build_side(&update.trading_pair, "asks", &update.asks, false);

        let snapshot = Arc::new(BookSnapshot {
            trading_pair: update.trading_pair.clone(),
            bids,
            asks,
            timestamp: update.timestamp,
        });
        state.last_applied = Some(update.timestamp);
        state.current = Some(Arc::clone(&snapshot));

        Some(snapshot)
    }

    /// Drops all state for a trading pair, e.g. on unsubscribe. Returns
    /// whether anything was tracked for it.
    pub fn discard(&mut self, trading_pair: &str) -> bool {
        self.books.remove(trading_pair).is_some()
    }

    /// Drops all book state for every pair.
    pub fn clear(&mut self) {
        self.books.clear();
    }

    /// Returns the current snapshot for a pair, if one has been applied.
    #[must_use]
    pub fn snapshot(&self, trading_pair: &str) -> Option<Arc<BookSnapshot>> {
        self.books
            .get(trading_pair)
            .and_then(|state| state.current.clone())
    }
}

/// Builds one sorted, validated ladder side from an incoming update.
///
/// Runs in time proportional to the incoming ladder. Zero-quantity levels
/// are removals and are omitted; non-positive prices, negative quantities,
/// and duplicate prices are validation errors: the offending level is
/// dropped with a warning and the first occurrence of a price wins.
fn build_side(pair: &str, side: &str, levels: &[PriceLevel], descending: bool) -> Vec<PriceLevel> {
    let mut ladder: BTreeMap<Decimal, PriceLevel> = BTreeMap::new();

    for level in levels {
        if level.price <= Decimal::ZERO {
            warn!(pair, side, price = %level.price, "dropping level with non-positive price");
            continue;
        }
        if level.quantity < Decimal::ZERO {
            warn!(pair, side, price = %level.price, quantity = %level.quantity,
                "dropping level with negative quantity");
            continue;
        }
        if level.quantity.is_zero() {
            continue;
        }
        if ladder.contains_key(&level.price) {
            warn!(pair, side, price = %level.price, "dropping duplicate price level");
            continue;
        }
        ladder.insert(level.price, *level);
    }

    if descending {
        ladder.into_values().rev().collect()
    } else {
        ladder.into_values().collect()
    }
}
