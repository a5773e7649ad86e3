//! Packed binary layout of feed packets.
//!
//! Every packet starts with a `u64` sequence number followed by a one-byte
//! tag. Integers are little-endian and there is no padding between fields:
//!
//! ```text
//! Add:    [seq:u64]['A'][order_id:u64][price:i32][qty:u32][side:u8]   26 bytes
//! Cancel: [seq:u64]['C'][order_id:u64]                                17 bytes
//! ```
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub const TAG_ADD: u8 = b'A';
pub const TAG_CANCEL: u8 = b'C';

pub const SEQ_LEN: usize = 8;
pub const ADD_LEN: usize = SEQ_LEN + 1 + 8 + 4 + 4 + 1;
pub const CANCEL_LEN: usize = SEQ_LEN + 1 + 8;
/// Largest packet the feed produces.
pub const MAX_PACKET_LEN: usize = ADD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_byte(self) -> u8 {
        match self {
            Side::Buy => b'B',
            Side::Sell => b'S',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'B' => Some(Side::Buy),
            b'S' => Some(Side::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Add {
        order_id: u64,
        price: i32, // cents
        quantity: u32,
        side: Side,
    },
    Cancel {
        order_id: u64,
    },
}

impl Event {
    pub fn tag(&self) -> u8 {
        match self {
            Event::Add { .. } => TAG_ADD,
            Event::Cancel { .. } => TAG_CANCEL,
        }
    }

    pub fn order_id(&self) -> u64 {
        match *self {
            Event::Add { order_id, .. } | Event::Cancel { order_id } => order_id,
        }
    }
}

/// A sequenced event as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub seq: u64,
    pub event: Event,
}

impl Packet {
    pub fn encoded_len(&self) -> usize {
        match self.event {
            Event::Add { .. } => ADD_LEN,
            Event::Cancel { .. } => CANCEL_LEN,
        }
    }

    /// Append the packed encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.push(self.event.tag());
        match self.event {
            Event::Add { order_id, price, quantity, side } => {
                out.extend_from_slice(&order_id.to_le_bytes());
                out.extend_from_slice(&price.to_le_bytes());
                out.extend_from_slice(&quantity.to_le_bytes());
                out.push(side.as_byte());
            }
            Event::Cancel { order_id } => {
                out.extend_from_slice(&order_id.to_le_bytes());
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode exactly one packet; the buffer must hold nothing else.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SEQ_LEN + 1 {
            bail!("packet too short: {} bytes", bytes.len());
        }
        let mut off = 0usize;
        let read_u64 = |b: &[u8], o: &mut usize| -> u64 { let mut tmp = [0u8; 8]; tmp.copy_from_slice(&b[*o..*o + 8]); *o += 8; u64::from_le_bytes(tmp) };
        let read_u32 = |b: &[u8], o: &mut usize| -> u32 { let mut tmp = [0u8; 4]; tmp.copy_from_slice(&b[*o..*o + 4]); *o += 4; u32::from_le_bytes(tmp) };
        let read_i32 = |b: &[u8], o: &mut usize| -> i32 { let mut tmp = [0u8; 4]; tmp.copy_from_slice(&b[*o..*o + 4]); *o += 4; i32::from_le_bytes(tmp) };

        let seq = read_u64(bytes, &mut off);
        let tag = bytes[off];
        off += 1;
        let expected = match tag {
            TAG_ADD => ADD_LEN,
            TAG_CANCEL => CANCEL_LEN,
            other => bail!("unknown packet tag {:#04x}", other),
        };
        if bytes.len() != expected {
            bail!("packet tag '{}' expects {} bytes, got {}", tag as char, expected, bytes.len());
        }
        let event = if tag == TAG_ADD {
            let order_id = read_u64(bytes, &mut off);
            let price = read_i32(bytes, &mut off);
            let quantity = read_u32(bytes, &mut off);
            let side_byte = bytes[off];
            let Some(side) = Side::from_byte(side_byte) else {
                bail!("invalid side byte {:#04x} in add seq={}", side_byte, seq);
            };
            Event::Add { order_id, price, quantity, side }
        } else {
            Event::Cancel { order_id: read_u64(bytes, &mut off) }
        };
        Ok(Packet { seq, event })
    }
}
