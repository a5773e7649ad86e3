//! Synthetic order flow.
//!
//! [`FeedGenerator`] owns all mutable state of the feed: the random source,
//! the walking price, the pool of live order ids and both counters. Each call
//! to [`FeedGenerator::next_packet`] performs one price step, decides between
//! Add and Cancel and returns the sequenced packet to transmit.
use crate::config::FeedConfig;
use crate::wire::{Event, Packet, Side};
use anyhow::{Context, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::time::Duration;

pub struct FeedGenerator<R: Rng> {
    rng: R,
    walk: WeightedIndex<f64>,
    tick: i32,
    price_floor: i32,
    cancel_probability: f64,
    qty: (u32, u32),
    burst: (u32, u32),
    sleep: (Duration, Duration),
    current_price: i32,
    live_orders: Vec<u64>,
    next_order_id: u64,
    next_seq: u64,
}

impl<R: Rng> FeedGenerator<R> {
    pub fn new(config: &FeedConfig, rng: R) -> Result<Self> {
        config.validate()?;
        let walk = WeightedIndex::new(config.walk_weights).context("price walk weights")?;
        Ok(Self {
            rng,
            walk,
            tick: config.tick,
            price_floor: config.price_floor,
            cancel_probability: config.cancel_probability,
            qty: (config.qty_min, config.qty_max),
            burst: (config.burst_min, config.burst_max),
            sleep: (config.sleep_min, config.sleep_max),
            current_price: config.start_price,
            live_orders: Vec::new(),
            next_order_id: 1,
            next_seq: 1,
        })
    }

    pub fn current_price(&self) -> i32 {
        self.current_price
    }

    /// Order ids added and not yet cancelled, in no particular order.
    pub fn live_orders(&self) -> &[u64] {
        &self.live_orders
    }

    /// Sequence number the next packet will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_seq
    }

    pub fn packets_emitted(&self) -> u64 {
        self.next_seq - 1
    }

    /// Draw how many packets the next burst sends.
    pub fn burst_size(&mut self) -> u32 {
        self.rng.gen_range(self.burst.0..=self.burst.1)
    }

    /// Draw the quiet gap that follows a burst.
    pub fn pause(&mut self) -> Duration {
        self.rng.gen_range(self.sleep.0..=self.sleep.1)
    }

    /// Move the price one walk step, never below the floor.
    pub fn step_price(&mut self) -> i32 {
        let step = [-self.tick, 0, self.tick][self.walk.sample(&mut self.rng)];
        self.current_price = self.current_price.saturating_add(step).max(self.price_floor);
        self.current_price
    }

    /// Produce the next packet and advance the sequence.
    pub fn next_packet(&mut self) -> Packet {
        let price = self.step_price();

        // Add is forced while nothing is live.
        let cancel = !self.live_orders.is_empty() && self.rng.gen_bool(self.cancel_probability);
        let event = if cancel {
            let idx = self.rng.gen_range(0..self.live_orders.len());
            let order_id = self.live_orders.swap_remove(idx);
            Event::Cancel { order_id }
        } else {
            let quantity = self.rng.gen_range(self.qty.0..=self.qty.1);
            let side = if self.rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let order_id = self.next_order_id;
            self.next_order_id += 1;
            self.live_orders.push(order_id);
            Event::Add { order_id, price, quantity, side }
        };

        let packet = Packet { seq: self.next_seq, event };
        self.next_seq += 1;
        packet
    }
}
