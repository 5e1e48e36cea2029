//! End-to-end client tests against a local loopback WebSocket server.
//!
//! These exercise the full connection lifecycle: subscription replay after
//! a dropped transport, stale-frame dropping, parse-error isolation,
//! close-during-backoff, and the retry cap.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_test::assert_ok;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tungstenite::Message;

use bookfeed::config::ReconnectPolicy;
use bookfeed::models::{ConnectionState, MarketEvent};
use bookfeed::MarketDataClient;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        max_retries: None,
    }
}

async fn accept_session(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept failed");
    accept_async(stream).await.expect("websocket handshake failed")
}

/// Waits for the first event matching `pred`, skipping others.
async fn wait_for<F>(
    events: &mut broadcast::Receiver<MarketEvent>,
    what: &str,
    pred: F,
) -> MarketEvent
where
    F: Fn(&MarketEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if pred(&event) {
                        return event;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event stream ended while waiting for {what}");
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Counts matching events arriving within `window`.
async fn count_within<F>(
    events: &mut broadcast::Receiver<MarketEvent>,
    window: Duration,
    pred: F,
) -> usize
where
    F: Fn(&MarketEvent) -> bool,
{
    let mut count = 0;
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => {
                if pred(&event) {
                    count += 1;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return count,
        }
    }
}

#[tokio::test]
async fn resubscribes_in_order_after_reconnect() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<(usize, String)>();

    tokio::spawn(async move {
        // Session 0: collect the subscribe frames, then drop the
        // connection abruptly. Session 1: collect and stay up.
        for session in 0..2usize {
            let mut ws = accept_session(&listener).await;
            let mut seen = 0;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = frames_tx.send((session, text.as_str().to_string()));
                    seen += 1;
                    if session == 0 && seen == 2 {
                        break;
                    }
                }
            }
        }
    });

    let client = MarketDataClient::new(format!("ws://{addr}"), fast_policy());
    let mut events = client.events();

    client.subscribe("BTCUSDT").unwrap();
    client.subscribe("ETHUSDT").unwrap();
    // Duplicate subscription must not produce a second frame.
    client.subscribe("BTCUSDT").unwrap();
    client.connect().unwrap();

    wait_for(&mut events, "first connect", |e| {
        matches!(e, MarketEvent::Connected)
    })
    .await;

    let mut first_session = Vec::new();
    for _ in 0..2 {
        let (session, frame) = tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
            .await
            .expect("timed out waiting for subscribe frame")
            .expect("server task ended");
        assert_eq!(session, 0);
        first_session.push(serde_json::from_str::<serde_json::Value>(&frame).unwrap());
    }
    assert_eq!(first_session[0]["action"], "subscribe");
    assert_eq!(first_session[0]["tradingPair"], "BTCUSDT");
    assert_eq!(first_session[1]["tradingPair"], "ETHUSDT");

    // The server dropped us; the client must reconnect and replay both
    // subscriptions in original order, exactly once each.
    wait_for(&mut events, "disconnect", |e| {
        matches!(e, MarketEvent::Disconnected { .. })
    })
    .await;
    wait_for(&mut events, "reconnect", |e| {
        matches!(e, MarketEvent::Connected)
    })
    .await;

    let mut second_session = Vec::new();
    for _ in 0..2 {
        let (session, frame) = tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
            .await
            .expect("timed out waiting for replayed frame")
            .expect("server task ended");
        assert_eq!(session, 1);
        second_session.push(serde_json::from_str::<serde_json::Value>(&frame).unwrap());
    }
    assert_eq!(second_session[0]["tradingPair"], "BTCUSDT");
    assert_eq!(second_session[1]["tradingPair"], "ETHUSDT");

    // No third replay frame shows up.
    let extra = tokio::time::timeout(Duration::from_millis(200), frames_rx.recv()).await;
    assert!(extra.is_err(), "unexpected extra frame: {extra:?}");

    client.close().unwrap();
}

#[tokio::test]
async fn stale_and_malformed_frames_do_not_corrupt_the_book() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut ws = accept_session(&listener).await;
        // Wait for the subscribe command before streaming.
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Text(_)) {
                break;
            }
        }

        let frames = [
            r#"{"type": "info", "payload": "stream starting"}"#.to_string(),
            r#"{"tradingPair":"BTCUSDT","bids":[{"price":100,"quantity":2}],"asks":[{"price":101,"quantity":1}],"timestamp":1}"#.to_string(),
            // Stale frame: must be dropped without an event.
            r#"{"tradingPair":"BTCUSDT","bids":[{"price":50,"quantity":9}],"asks":[],"timestamp":0}"#.to_string(),
            // Malformed frame: degrades to a ParseError event.
            "not json".to_string(),
            // Zero quantity removes the bid level.
            r#"{"tradingPair":"BTCUSDT","bids":[{"price":100,"quantity":0}],"asks":[{"price":101,"quantity":1}],"timestamp":2}"#.to_string(),
        ];
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }

        // Hold the connection open until the client closes.
        while ws.next().await.is_some() {}
    });

    let client = MarketDataClient::new(format!("ws://{addr}"), fast_policy());
    let mut events = client.events();
    assert_ok!(client.subscribe("BTCUSDT"));
    assert_ok!(client.connect());

    let info = wait_for(&mut events, "info notice", |e| {
        matches!(e, MarketEvent::Info(_))
    })
    .await;
    assert!(matches!(info, MarketEvent::Info(text) if text == "stream starting"));

    let MarketEvent::Book(first) = wait_for(&mut events, "first book snapshot", |e| {
        matches!(e, MarketEvent::Book(_))
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(first.timestamp, 1);
    assert_eq!(first.bids.len(), 1);

    let parse_error = wait_for(&mut events, "parse error", |e| {
        matches!(e, MarketEvent::ParseError { .. })
    })
    .await;
    assert!(matches!(parse_error, MarketEvent::ParseError { raw, .. } if raw == "not json"));

    // The next snapshot skips the stale timestamp-0 frame entirely.
    let MarketEvent::Book(second) = wait_for(&mut events, "second book snapshot", |e| {
        matches!(e, MarketEvent::Book(_))
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(second.timestamp, 2);
    assert!(second.bids.is_empty());
    assert_eq!(second.asks.len(), 1);

    client.close().unwrap();
    wait_for(&mut events, "closed", |e| matches!(e, MarketEvent::Closed)).await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn close_from_idle_emits_exactly_one_closed_event() {
    let client = MarketDataClient::new("ws://127.0.0.1:1", fast_policy());
    let mut events = client.events();

    client.close().unwrap();
    client.close().unwrap();

    let closed = count_within(&mut events, Duration::from_millis(300), |e| {
        matches!(e, MarketEvent::Closed)
    })
    .await;
    assert_eq!(closed, 1);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn close_cancels_pending_reconnect_backoff() {
    // Grab a port with nothing listening so connects fail fast.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let policy = ReconnectPolicy {
        initial_backoff: Duration::from_secs(60),
        max_backoff: Duration::from_secs(60),
        max_retries: None,
    };
    let client = MarketDataClient::new(format!("ws://{addr}"), policy);
    let mut events = client.events();
    client.connect().unwrap();

    wait_for(&mut events, "failed connect", |e| {
        matches!(e, MarketEvent::Disconnected { .. })
    })
    .await;

    // The client now sits in a 60s backoff; close must take effect
    // immediately, not after the timer.
    client.close().unwrap();
    client.close().unwrap();

    wait_for(&mut events, "closed", |e| matches!(e, MarketEvent::Closed)).await;
    let extra_closed = count_within(&mut events, Duration::from_millis(300), |e| {
        matches!(e, MarketEvent::Closed)
    })
    .await;
    assert_eq!(extra_closed, 0);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn retry_cap_gives_up_with_exhausted_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let policy = ReconnectPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(10),
        max_retries: Some(2),
    };
    let client = MarketDataClient::new(format!("ws://{addr}"), policy);
    let mut events = client.events();
    client.connect().unwrap();

    let exhausted = wait_for(&mut events, "retries exhausted", |e| {
        matches!(e, MarketEvent::RetriesExhausted { .. })
    })
    .await;
    assert!(matches!(
        exhausted,
        MarketEvent::RetriesExhausted { attempts: 2 }
    ));

    wait_for(&mut events, "closed", |e| matches!(e, MarketEvent::Closed)).await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn subscriptions_survive_close_and_replay_on_fresh_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<(usize, String)>();

    tokio::spawn(async move {
        for session in 0..2usize {
            let mut ws = accept_session(&listener).await;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = frames_tx.send((session, text.as_str().to_string()));
                }
            }
        }
    });

    let client = MarketDataClient::new(format!("ws://{addr}"), fast_policy());
    let mut events = client.events();
    client.subscribe("BTCUSDT").unwrap();
    client.connect().unwrap();

    wait_for(&mut events, "first connect", |e| {
        matches!(e, MarketEvent::Connected)
    })
    .await;
    let (session, frame) = frames_rx.recv().await.expect("server task ended");
    assert_eq!(session, 0);
    assert!(frame.contains("BTCUSDT"));

    client.close().unwrap();
    wait_for(&mut events, "closed", |e| matches!(e, MarketEvent::Closed)).await;

    // A fresh connect starts a new session and replays the surviving
    // subscription set.
    client.connect().unwrap();
    wait_for(&mut events, "second connect", |e| {
        matches!(e, MarketEvent::Connected)
    })
    .await;

    let (session, frame) = tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
        .await
        .expect("timed out waiting for replayed subscribe")
        .expect("server task ended");
    assert_eq!(session, 1);
    assert!(frame.contains("BTCUSDT"));

    client.close().unwrap();
}

#[tokio::test]
async fn subscribe_while_open_sends_the_frame_immediately() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let mut ws = accept_session(&listener).await;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = frames_tx.send(text.as_str().to_string());
            }
        }
    });

    // Connect with an empty subscription set, then subscribe live.
    let client = MarketDataClient::new(format!("ws://{addr}"), fast_policy());
    let mut events = client.events();
    client.connect().unwrap();
    wait_for(&mut events, "connect", |e| matches!(e, MarketEvent::Connected)).await;

    client.subscribe("BTCUSDT").unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
        .await
        .expect("timed out waiting for subscribe frame")
        .expect("server task ended");
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["action"], "subscribe");
    assert_eq!(value["tradingPair"], "BTCUSDT");

    // A duplicate subscription on the open connection sends nothing.
    client.subscribe("BTCUSDT").unwrap();
    let extra = tokio::time::timeout(Duration::from_millis(200), frames_rx.recv()).await;
    assert!(extra.is_err(), "unexpected duplicate frame: {extra:?}");

    client.unsubscribe("BTCUSDT").unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
        .await
        .expect("timed out waiting for unsubscribe frame")
        .expect("server task ended");
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["action"], "unsubscribe");
    assert_eq!(value["tradingPair"], "BTCUSDT");

    // Unsubscribing an untracked pair sends nothing either.
    client.unsubscribe("BTCUSDT").unwrap();
    let extra = tokio::time::timeout(Duration::from_millis(200), frames_rx.recv()).await;
    assert!(extra.is_err(), "unexpected extra frame: {extra:?}");

    client.close().unwrap();
}

#[tokio::test]
async fn unsubscribe_while_open_resets_the_pair_ordering_key() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut ws = accept_session(&listener).await;
        // Answer the first subscribe with a high ordering key and the
        // resubscribe with a lower one.
        let mut subscribes = 0;
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["action"] != "subscribe" {
                continue;
            }
            subscribes += 1;
            let timestamp = if subscribes == 1 { 5 } else { 2 };
            let frame = format!(
                r#"{{"tradingPair":"BTCUSDT","bids":[{{"price":100,"quantity":1}}],"asks":[],"timestamp":{timestamp}}}"#
            );
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
    });

    let client = MarketDataClient::new(format!("ws://{addr}"), fast_policy());
    let mut events = client.events();
    client.connect().unwrap();
    wait_for(&mut events, "connect", |e| matches!(e, MarketEvent::Connected)).await;

    client.subscribe("BTCUSDT").unwrap();
    let MarketEvent::Book(first) = wait_for(&mut events, "first book snapshot", |e| {
        matches!(e, MarketEvent::Book(_))
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(first.timestamp, 5);

    // Unsubscribing discards the pair's book state, so after
    // resubscribing an update with an older key is not stale.
    client.unsubscribe("BTCUSDT").unwrap();
    client.subscribe("BTCUSDT").unwrap();

    let MarketEvent::Book(second) = wait_for(&mut events, "post-resubscribe snapshot", |e| {
        matches!(e, MarketEvent::Book(_))
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(second.timestamp, 2);

    client.close().unwrap();
}

#[tokio::test]
async fn frames_from_a_superseded_connection_are_ignored() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        // First connection: take the subscribe, then hold the socket open
        // without reading so the client's close handshake sits unprocessed,
        // and push one more book frame after the client has moved on.
        let mut ws = accept_session(&listener).await;
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Text(_)) {
                break;
            }
        }
        closed_rx.await.expect("test dropped the close signal");
        let late = r#"{"tradingPair":"BTCUSDT","bids":[{"price":999,"quantity":9}],"asks":[],"timestamp":99}"#;
        ws.send(Message::Text(late.into())).await.unwrap();

        // Second connection: serve the real book.
        let mut ws = accept_session(&listener).await;
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Text(_)) {
                break;
            }
        }
        let fresh = r#"{"tradingPair":"BTCUSDT","bids":[{"price":100,"quantity":1}],"asks":[],"timestamp":1}"#;
        ws.send(Message::Text(fresh.into())).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let client = MarketDataClient::new(format!("ws://{addr}"), fast_policy());
    let mut events = client.events();
    client.subscribe("BTCUSDT").unwrap();
    client.connect().unwrap();
    wait_for(&mut events, "first connect", |e| {
        matches!(e, MarketEvent::Connected)
    })
    .await;

    client.close().unwrap();
    wait_for(&mut events, "closed", |e| matches!(e, MarketEvent::Closed)).await;

    // Let the first connection's late frame reach the client before the
    // new session starts.
    closed_tx.send(()).expect("server task ended");
    tokio::time::sleep(Duration::from_millis(200)).await;

    client.connect().unwrap();
    let MarketEvent::Book(book) = wait_for(&mut events, "fresh book snapshot", |e| {
        matches!(e, MarketEvent::Book(_))
    })
    .await
    else {
        unreachable!()
    };
    // The late frame carried timestamp 99; had it been applied, the fresh
    // timestamp-1 update would have been dropped as stale and the book
    // would show the superseded ladder.
    assert_eq!(book.timestamp, 1);
    assert_eq!(book.bids[0].price, rust_decimal_macros::dec!(100));

    client.close().unwrap();
}
