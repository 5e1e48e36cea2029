//! Declarative subscription tracking.
//!
//! The router owns the set of trading pairs the caller wants streamed.
//! Subscriptions are declarative, not one-shot commands: the set survives
//! reconnects and explicit close, and the supervisor replays a subscribe
//! command for every tracked pair, in insertion order, after each
//! successful connection.

/// Insertion-ordered set of subscribed trading pairs.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRouter {
    pairs: Vec<String>,
}

impl SubscriptionRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a pair. Returns `false` if it was already tracked.
    pub(crate) fn add(&mut self, trading_pair: &str) -> bool {
        if self.pairs.iter().any(|p| p == trading_pair) {
            return false;
        }
        self.pairs.push(trading_pair.to_string());
        true
    }

    /// Removes a pair. Returns `false` if it was not tracked.
    pub(crate) fn remove(&mut self, trading_pair: &str) -> bool {
        let before = self.pairs.len();
        self.pairs.retain(|p| p != trading_pair);
        self.pairs.len() != before
    }

    /// Tracked pairs in insertion order.
    pub(crate) fn pairs(&self) -> &[String] {
        &self.pairs
    }
}
