use anyhow::{bail, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::LOCALHOST;
pub const DEFAULT_PORT: u16 = 1234;

/// Tunables of the generator and its send loop.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Destination address (multicast group or unicast host).
    pub group: IpAddr,
    pub port: u16,
    /// Inclusive range of packets per burst.
    pub burst_min: u32,
    pub burst_max: u32,
    /// Initial price in cents.
    pub start_price: i32,
    pub price_floor: i32,
    /// Size of one price walk step in cents.
    pub tick: i32,
    /// Weights of the {-tick, 0, +tick} walk steps.
    pub walk_weights: [f64; 3],
    /// Chance of a cancel when at least one order is live.
    pub cancel_probability: f64,
    pub qty_min: u32,
    pub qty_max: u32,
    /// Inclusive range of the pause between bursts.
    pub sleep_min: Duration,
    pub sleep_max: Duration,
    /// Emit a progress line every this many packets.
    pub progress_every: u64,
    /// Multicast TTL, only applied when `group` is multicast.
    pub multicast_ttl: u32,
    pub multicast_loop: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            group: IpAddr::V4(DEFAULT_GROUP),
            port: DEFAULT_PORT,
            burst_min: 10,
            burst_max: 100,
            start_price: 10_000, // 100.00
            price_floor: 100,
            tick: 5,
            walk_weights: [0.3, 0.4, 0.3],
            cancel_probability: 0.2,
            qty_min: 1,
            qty_max: 100,
            sleep_min: Duration::from_millis(1),
            sleep_max: Duration::from_millis(10),
            progress_every: 1000,
            multicast_ttl: 1,
            multicast_loop: true,
        }
    }
}

impl FeedConfig {
    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.group, self.port)
    }

    /// Reject settings the generator cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.burst_min == 0 || self.burst_min > self.burst_max {
            bail!("invalid burst range [{}, {}]", self.burst_min, self.burst_max);
        }
        if self.qty_min == 0 || self.qty_min > self.qty_max {
            bail!("invalid quantity range [{}, {}]", self.qty_min, self.qty_max);
        }
        if self.sleep_min > self.sleep_max {
            bail!("invalid sleep range [{:?}, {:?}]", self.sleep_min, self.sleep_max);
        }
        if !(0.0..=1.0).contains(&self.cancel_probability) {
            bail!("cancel probability {} outside [0, 1]", self.cancel_probability);
        }
        if self.walk_weights.iter().any(|w| !w.is_finite() || *w < 0.0) || self.walk_weights.iter().sum::<f64>() <= 0.0 {
            bail!("invalid price walk weights {:?}", self.walk_weights);
        }
        if self.tick < 0 {
            bail!("price tick must not be negative, got {}", self.tick);
        }
        if self.price_floor > self.start_price {
            bail!("start price {} below floor {}", self.start_price, self.price_floor);
        }
        if self.progress_every == 0 {
            bail!("progress interval must be positive");
        }
        Ok(())
    }
}
