//! Synthetic market data feed generator.
//!
//! This crate provides the pieces used by the `market_sim` generator binary
//! and the `listen` and `player` tools:
//!
//! - `wire`: packed Add/Cancel packet layout with a leading sequence number
//! - `config`: generator tunables and their defaults
//! - `generator`: seeded order flow (price walk, live-order pool, counters)
//! - `feed`: burst/pause send loop over a pluggable `Transport`
//! - `net`: UDP sender and multicast receiver built on `socket2`
//! - `capture`: CRC-framed capture files of the emitted stream
//! - `tally`: running counts over a decoded stream
pub mod capture;
pub mod config;
pub mod feed;
pub mod generator;
pub mod net;
pub mod tally;
pub mod wire;

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .try_init();
}
