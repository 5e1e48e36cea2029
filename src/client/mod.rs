//! Market-data client facade.
//!
//! [`MarketDataClient`] composes the connection supervisor, subscription
//! router, codec, and order-book reducer behind a small handle: callers
//! issue non-blocking `connect`/`subscribe`/`send`/`close` calls and
//! observe everything through a single fan-out event stream.

mod router;
mod supervisor;

use tokio::sync::{broadcast, mpsc, watch};

use crate::config::{AppConfig, ReconnectPolicy};
use crate::models::{ConnectionState, MarketEvent, OutboundCommand};
use crate::{BookfeedError, Result};
use supervisor::{Command, Supervisor};

/// Capacity of the fan-out event channel. A consumer that falls this far
/// behind lags (misses old events) rather than stalling the supervisor.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Handle to the market-data synchronization client.
///
/// All methods are non-blocking command sends to the supervisor task;
/// results show up on the event stream. The handle is cheap to use from
/// anywhere, but dropping the last one stops the supervisor.
pub struct MarketDataClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<MarketEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl MarketDataClient {
    /// Spawns the supervisor task for the given endpoint.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(ws_url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let supervisor = Supervisor::new(ws_url.into(), policy, cmd_rx, events.clone(), state_tx);
        tokio::spawn(supervisor.run());

        Self {
            cmd_tx,
            events,
            state_rx,
        }
    }

    /// Convenience constructor from the loaded application config.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.ws_url.clone(), config.reconnect.clone())
    }

    /// Starts a session. Idempotent: a no-op while connecting or open.
    /// After `close()` this begins a fresh lifecycle and replays every
    /// previously subscribed pair.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Tracks a trading pair and, when connected, sends the subscribe
    /// command immediately. Idempotent for already-subscribed pairs.
    pub fn subscribe(&self, trading_pair: impl Into<String>) -> Result<()> {
        self.command(Command::Subscribe(trading_pair.into()))
    }

    /// Stops tracking a pair, discards its book state, and, when
    /// connected, sends the unsubscribe command.
    pub fn unsubscribe(&self, trading_pair: impl Into<String>) -> Result<()> {
        self.command(Command::Unsubscribe(trading_pair.into()))
    }

    /// Sends a raw outbound command over the current connection. Dropped
    /// with a warning when not connected.
    pub fn send(&self, command: OutboundCommand) -> Result<()> {
        self.command(Command::Send(command))
    }

    /// Tears down the connection and clears all book state, emitting
    /// exactly one `Closed` event. Effective even mid-reconnect-backoff,
    /// and idempotent: closing twice is a no-op, not an error.
    pub fn close(&self) -> Result<()> {
        self.command(Command::Close)
    }

    /// Attaches a new consumer to the event stream. Consumers attach and
    /// detach freely without affecting the underlying connection.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| BookfeedError::ClientStopped)
    }
}
