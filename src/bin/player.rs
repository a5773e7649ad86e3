use anyhow::{bail, Context, Result};
use clap::Parser;
use market_sim::capture::{CaptureFrame, CaptureReader, CAPTURE_VERSION};
use market_sim::feed::Transport;
use market_sim::init_tracing;
use market_sim::net::UdpTransport;
use market_sim::tally::StreamTally;
use market_sim::wire::{Event, Packet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(about = "Verify, print or re-send a recorded feed capture")]
struct Args {
    /// Capture file to read (recorded .bin)
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Print every packet as it is read
    #[arg(long, default_value_t = false)]
    print: bool,

    /// Re-send the packets to this address
    #[arg(long)]
    target: Option<SocketAddr>,

    /// Replay speed multiplier for the recorded gaps (0 = as fast as possible)
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Multicast TTL when re-sending
    #[arg(long, default_value_t = 1)]
    ttl: u32,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    if !(args.speed >= 0.0 && args.speed.is_finite()) {
        bail!("speed must be a finite, non-negative number");
    }
    let mut rdr = CaptureReader::open(&args.input)?;
    let mut sender = match args.target {
        Some(t) => Some(UdpTransport::open_to(t, args.ttl, true)?),
        None => None,
    };

    let mut tally = StreamTally::default();
    let replay_start = Instant::now();
    let mut first_mono: Option<u128> = None;

    while let Some(frame) = rdr.next_frame()? {
        match frame {
            CaptureFrame::Header(h) => {
                if h.version != CAPTURE_VERSION {
                    warn!(version = h.version, "unexpected capture version");
                }
                eprintln!("Header: v{} dest={} seed={:?} created={}ns", h.version, h.destination, h.seed, h.created_unix_ns);
            }
            CaptureFrame::Packet(rec) => {
                let packet = Packet::decode(&rec.bytes)
                    .with_context(|| format!("frame {} (seq {})", rdr.frames_read() - 1, rec.seq))?;
                if packet.seq != rec.seq {
                    bail!("record seq {} does not match packet seq {}", rec.seq, packet.seq);
                }
                tally.observe(&packet);

                if args.print {
                    match packet.event {
                        Event::Add { order_id, price, quantity, side } => println!(
                            "seq={} ADD id={} px={} qty={} side={} t={}ns",
                            packet.seq, order_id, price, quantity, side.as_byte() as char, rec.mono_ns_from_start
                        ),
                        Event::Cancel { order_id } => println!(
                            "seq={} CANCEL id={} t={}ns",
                            packet.seq, order_id, rec.mono_ns_from_start
                        ),
                    }
                }

                if let Some(s) = sender.as_mut() {
                    if args.speed > 0.0 {
                        let base = *first_mono.get_or_insert(rec.mono_ns_from_start);
                        let offset_ns = (rec.mono_ns_from_start.saturating_sub(base) as f64 / args.speed) as u64;
                        let due = Duration::from_nanos(offset_ns);
                        let elapsed = replay_start.elapsed();
                        if due > elapsed {
                            std::thread::sleep(due - elapsed);
                        }
                    }
                    s.send(&rec.bytes)?;
                }
            }
        }
    }

    if let Some(t) = args.target {
        info!(%t, packets = tally.packets, "replay finished");
    }
    eprintln!(
        "Read {} frames. {} packets: {} adds, {} cancels, seq {:?}..{:?}, {} orders live, last px {:?}.",
        rdr.frames_read(),
        tally.packets,
        tally.adds,
        tally.cancels,
        tally.first_seq,
        tally.last_seq,
        tally.live_orders(),
        tally.last_price
    );
    Ok(())
}
