use crate::wire::{Event, Packet};
use std::collections::HashSet;

/// Running counts over a decoded packet stream.
///
/// Tracks which order ids are still live so a reader can report the pool
/// size the generator had at the end. Cancels for ids the tally never saw
/// (e.g. a listener that joined late) are counted separately.
#[derive(Debug, Default, Clone)]
pub struct StreamTally {
    pub packets: u64,
    pub adds: u64,
    pub cancels: u64,
    pub unknown_cancels: u64,
    pub first_seq: Option<u64>,
    pub last_seq: Option<u64>,
    pub last_price: Option<i32>,
    live: HashSet<u64>,
}

impl StreamTally {
    pub fn observe(&mut self, p: &Packet) {
        self.packets += 1;
        self.first_seq.get_or_insert(p.seq);
        self.last_seq = Some(p.seq);
        match p.event {
            Event::Add { order_id, price, .. } => {
                self.adds += 1;
                self.last_price = Some(price);
                self.live.insert(order_id);
            }
            Event::Cancel { order_id } => {
                self.cancels += 1;
                if !self.live.remove(&order_id) {
                    self.unknown_cancels += 1;
                }
            }
        }
    }

    pub fn live_orders(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, order_id: u64) -> bool {
        self.live.contains(&order_id)
    }
}
