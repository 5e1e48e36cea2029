//! WebSocket connection lifecycle management.
//!
//! [`Supervisor`] is a single task that owns the socket, the subscription
//! set, and the order-book reducer, handling connecting, reading frames,
//! automatic reconnection with exponential backoff, and re-subscription to
//! all tracked trading pairs after each reconnect.
//!
//! Single-writer discipline: nothing outside this task touches the reducer
//! or the router. Callers talk to it through [`Command`]s and observe it
//! through the broadcast event channel and the state watch.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::Message as WsMessage;

use super::router::SubscriptionRouter;
use crate::book::OrderBookReducer;
use crate::codec::MessageCodec;
use crate::config::ReconnectPolicy;
use crate::models::{ConnectionState, InboundEvent, MarketEvent, OutboundCommand};

/// Write half of the market-data connection.
type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Read half of the market-data connection.
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Commands sent from the facade to the supervisor.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
    Send(OutboundCommand),
    Close,
}

/// Raw traffic forwarded by the reader task, tagged with the generation of
/// the connection it came from. The supervisor drops anything whose
/// generation is no longer current, so a late frame from a superseded
/// connection can never touch current state.
#[derive(Debug)]
enum RawInbound {
    Frame { generation: u64, text: String },
    Closed { generation: u64, reason: String },
}

/// How an open session ended.
enum SessionExit {
    /// The transport dropped; reconnect.
    ConnectionLost(String),
    /// The caller closed the client; `Closed` has already been emitted.
    Closed,
    /// The command channel dropped; the client itself is gone.
    Shutdown,
}

/// Outcome of a cancellable backoff wait.
enum BackoffOutcome {
    Elapsed,
    Close,
    Shutdown,
}

/// Owns the connection lifecycle for one market-data client.
pub(crate) struct Supervisor {
    url: String,
    policy: ReconnectPolicy,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<MarketEvent>,
    state_tx: watch::Sender<ConnectionState>,
    router: SubscriptionRouter,
    books: OrderBookReducer,
    raw_tx: mpsc::UnboundedSender<RawInbound>,
    raw_rx: mpsc::UnboundedReceiver<RawInbound>,
    /// Incremented for every connection attempt; frames from older
    /// generations are ignored.
    generation: u64,
}

impl Supervisor {
    pub(crate) fn new(
        url: String,
        policy: ReconnectPolicy,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        events: broadcast::Sender<MarketEvent>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        Self {
            url,
            policy,
            cmd_rx,
            events,
            state_tx,
            router: SubscriptionRouter::new(),
            books: OrderBookReducer::new(),
            raw_tx,
            raw_rx,
            generation: 0,
        }
    }

    /// Runs the supervisor until the owning client is dropped.
    ///
    /// While idle (never connected, or after `close()`), only the
    /// subscription set is maintained; `Connect` enters a session that
    /// lasts until an explicit close or shutdown.
    pub(crate) async fn run(mut self) {
        loop {
            let Some(cmd) = self.cmd_rx.recv().await else {
                return;
            };
            match cmd {
                Command::Connect => {
                    if matches!(self.run_session().await, SessionExit::Shutdown) {
                        return;
                    }
                }
                Command::Subscribe(pair) => {
                    self.router.add(&pair);
                }
                Command::Unsubscribe(pair) => {
                    if self.router.remove(&pair) {
                        self.books.discard(&pair);
                    }
                }
                Command::Send(command) => {
                    warn!(?command, "not connected; dropping outbound command");
                }
                Command::Close => {
                    // Close while already Idle/Closed is a no-op; no event.
                    if *self.state_tx.borrow() != ConnectionState::Closed {
                        self.finish_closed();
                    }
                }
            }
        }
    }

    /// One connected lifecycle: connect, read, reconnect on failure,
    /// until an explicit close or shutdown.
    async fn run_session(&mut self) -> SessionExit {
        // Consecutive failed connect attempts; reset on success.
        let mut failures: u32 = 0;
        self.set_state(ConnectionState::Connecting);

        loop {
            self.generation += 1;
            match self.open_connection().await {
                Ok(mut writer) => {
                    failures = 0;
                    self.set_state(ConnectionState::Open);
                    self.emit(MarketEvent::Connected);
                    info!(url = %self.url, generation = self.generation, "connected");
                    self.replay_subscriptions(&mut writer).await;

                    match self.read_loop(writer).await {
                        SessionExit::ConnectionLost(reason) => {
                            warn!(reason = %reason, "connection lost");
                            self.set_state(ConnectionState::Reconnecting);
                            self.emit(MarketEvent::Disconnected { reason });
                        }
                        exit => return exit,
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %e, attempt = failures, "connection attempt failed");
                    self.set_state(ConnectionState::Reconnecting);
                    self.emit(MarketEvent::Disconnected {
                        reason: e.to_string(),
                    });

                    if let Some(cap) = self.policy.max_retries {
                        if failures >= cap {
                            warn!(attempts = failures, "reconnect attempts exhausted");
                            self.emit(MarketEvent::RetriesExhausted { attempts: failures });
                            return self.finish_closed();
                        }
                    }
                }
            }

            let delay = self.policy.delay_for(failures.saturating_sub(1));
            match self.backoff_wait(delay).await {
                BackoffOutcome::Elapsed => {}
                BackoffOutcome::Close => return self.finish_closed(),
                BackoffOutcome::Shutdown => return SessionExit::Shutdown,
            }
            self.emit(MarketEvent::Reconnecting {
                attempt: failures.saturating_add(1),
            });
        }
    }

    /// Opens the transport and spawns a reader task that forwards frames
    /// tagged with the current generation.
    async fn open_connection(&mut self) -> crate::Result<WsWriter> {
        debug!(url = %self.url, generation = self.generation, "connecting to WebSocket");
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (writer, reader) = ws_stream.split();
        self.spawn_reader(reader);
        Ok(writer)
    }

    fn spawn_reader(&self, mut reader: WsReader) {
        let generation = self.generation;
        let raw_tx = self.raw_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let frame = RawInbound::Frame {
                            generation,
                            text: text.as_str().to_string(),
                        };
                        if raw_tx.send(frame).is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        let _ = raw_tx.send(RawInbound::Closed { generation, reason });
                        return;
                    }
                    // Binary/Ping/Pong frames carry nothing for us.
                    Ok(_) => {}
                    Err(e) => {
                        let _ = raw_tx.send(RawInbound::Closed {
                            generation,
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
            }
            let _ = raw_tx.send(RawInbound::Closed {
                generation,
                reason: "stream ended".to_string(),
            });
        });
    }

    /// Replays a subscribe command for every tracked pair, in insertion
    /// order. This is what makes reconnection transparent to the caller.
    async fn replay_subscriptions(&mut self, writer: &mut WsWriter) {
        let pairs: Vec<String> = self.router.pairs().to_vec();
        for pair in pairs {
            if let Err(e) = self
                .send_command(writer, &OutboundCommand::subscribe(&pair))
                .await
            {
                warn!(pair = %pair, error = %e, "failed to replay subscription");
            }
        }
    }

    /// Processes inbound frames and caller commands until the connection
    /// drops, the caller closes, or the client is dropped.
    ///
    /// Frames are handled strictly in arrival order; each frame's effects
    /// (reducer update, event emission) complete before the next one is
    /// examined.
    async fn read_loop(&mut self, mut writer: WsWriter) -> SessionExit {
        loop {
            tokio::select! {
                raw = self.raw_rx.recv() => {
                    // We hold a sender, so the channel cannot close.
                    let Some(raw) = raw else { return SessionExit::Shutdown };
                    match raw {
                        RawInbound::Frame { generation, text } => {
                            if generation != self.generation {
                                debug!(generation, "dropping frame from superseded connection");
                                continue;
                            }
                            self.process_frame(&text);
                        }
                        RawInbound::Closed { generation, reason } => {
                            if generation != self.generation {
                                continue;
                            }
                            return SessionExit::ConnectionLost(reason);
                        }
                    }
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return SessionExit::Shutdown,
                        Some(Command::Connect) => {
                            debug!("already connected; ignoring connect");
                        }
                        Some(Command::Subscribe(pair)) => {
                            if self.router.add(&pair) {
                                let command = OutboundCommand::subscribe(&pair);
                                if let Err(e) = self.send_command(&mut writer, &command).await {
                                    warn!(pair = %pair, error = %e, "failed to send subscribe");
                                }
                            }
                        }
                        Some(Command::Unsubscribe(pair)) => {
                            if self.router.remove(&pair) {
                                self.books.discard(&pair);
                                let command = OutboundCommand::unsubscribe(&pair);
                                if let Err(e) = self.send_command(&mut writer, &command).await {
                                    warn!(pair = %pair, error = %e, "failed to send unsubscribe");
                                }
                            }
                        }
                        Some(Command::Send(command)) => {
                            if let Err(e) = self.send_command(&mut writer, &command).await {
                                warn!(?command, error = %e, "failed to send command");
                            }
                        }
                        Some(Command::Close) => {
                            let _ = writer.send(WsMessage::Close(None)).await;
                            return self.finish_closed();
                        }
                    }
                }
            }
        }
    }

    /// Decodes one frame and applies its effects.
    fn process_frame(&mut self, text: &str) {
        match MessageCodec::decode(text) {
            InboundEvent::Book(update) => {
                if let Some(snapshot) = self.books.apply(&update) {
                    self.emit(MarketEvent::Book(snapshot));
                }
            }
            InboundEvent::Info(notice) => {
                info!(notice = %notice, "server info");
                self.emit(MarketEvent::Info(notice));
            }
            InboundEvent::ServerError(notice) => {
                warn!(notice = %notice, "server error");
                self.emit(MarketEvent::ServerError(notice));
            }
            InboundEvent::ParseError { raw, detail } => {
                warn!(detail = %detail, "malformed frame");
                self.emit(MarketEvent::ParseError { raw, detail });
            }
        }
    }

    async fn send_command(
        &self,
        writer: &mut WsWriter,
        command: &OutboundCommand,
    ) -> crate::Result<()> {
        let json = MessageCodec::encode(command);
        writer.send(WsMessage::Text(json.into())).await?;
        debug!(
            action = command.action(),
            pair = command.trading_pair(),
            "sent command"
        );
        Ok(())
    }

    /// Sleeps the backoff delay, staying responsive to caller commands.
    /// `Close` cancels the pending reconnect.
    async fn backoff_wait(&mut self, delay: std::time::Duration) -> BackoffOutcome {
        info!(backoff_ms = delay.as_millis() as u64, "backing off before reconnect");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return BackoffOutcome::Elapsed,

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return BackoffOutcome::Shutdown,
                        Some(Command::Close) => return BackoffOutcome::Close,
                        Some(Command::Connect) => {
                            debug!("already reconnecting; ignoring connect");
                        }
                        Some(Command::Subscribe(pair)) => {
                            self.router.add(&pair);
                        }
                        Some(Command::Unsubscribe(pair)) => {
                            if self.router.remove(&pair) {
                                self.books.discard(&pair);
                            }
                        }
                        Some(Command::Send(command)) => {
                            warn!(?command, "not connected; dropping outbound command");
                        }
                    }
                }
            }
        }
    }

    /// Transitions to Closed: clears all book state, emits exactly one
    /// `Closed` event. The subscription set survives for the next connect.
    fn finish_closed(&mut self) -> SessionExit {
        self.books.clear();
        self.set_state(ConnectionState::Closed);
        self.emit(MarketEvent::Closed);
        info!("market data client closed");
        SessionExit::Closed
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(?state, "connection state");
        let _ = self.state_tx.send(state);
    }

    fn emit(&self, event: MarketEvent) {
        // Send fails only when no consumer is attached, which is fine.
        let _ = self.events.send(event);
    }
}
