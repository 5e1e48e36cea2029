//! Real-time order-book synchronization client.
//!
//! Keeps callers synchronized with a server-pushed order book over a
//! long-lived WebSocket connection: automatic reconnection with
//! exponential backoff, declarative subscriptions replayed after every
//! reconnect, and per-pair book reduction into always-consistent
//! snapshots. Order placement goes through a separate REST collaborator.
//!
//! Entry points: [`MarketDataClient`] for the stream,
//! [`rest::OrderApi`] + [`session::Session`] for authenticated orders,
//! [`config::fetch_config`] for environment-based setup.

pub mod book;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod rest;
pub mod session;

pub use client::MarketDataClient;
pub use error::{BookfeedError, Result};
