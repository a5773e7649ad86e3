use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use market_sim::init_tracing;
use market_sim::net::{bind_receiver, receive_packets};
use market_sim::tally::StreamTally;
use market_sim::wire::Event;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Receive the synthetic feed and print decoded packets")]
struct Args {
    /// Local address to bind
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Feed port
    #[arg(long, env = "FEED_PORT", default_value_t = 1234)]
    port: u16,

    /// Multicast group to join (ignored for unicast addresses)
    #[arg(long, env = "FEED_GROUP")]
    group: Option<IpAddr>,

    /// Exit after N decoded packets
    #[arg(long)]
    count: Option<u64>,

    /// Only print the summary
    #[arg(long, short = 'q', default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();
    let args = Args::parse();
    let bind = SocketAddr::new(args.bind, args.port);
    let socket = bind_receiver(bind, args.group)?;
    info!(%bind, "feed handler listening");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::Relaxed))
        .context("install Ctrl+C handler")?;

    let mut tally = StreamTally::default();
    let stats = receive_packets(&socket, &stop, args.count, |p, _src| {
        tally.observe(&p);
        if args.quiet {
            return;
        }
        match p.event {
            Event::Add { order_id, price, quantity, side } => {
                println!("[UDP] ADD seq={} id={} px={} qty={} side={}", p.seq, order_id, price, quantity, side.as_byte() as char);
            }
            Event::Cancel { order_id } => {
                println!("[UDP] CANCEL seq={} id={}", p.seq, order_id);
            }
        }
    })?;

    eprintln!(
        "Received {} datagrams ({} malformed): {} adds, {} cancels, {} live, seq {:?}..{:?}",
        stats.datagrams,
        stats.malformed,
        tally.adds,
        tally.cancels,
        tally.live_orders(),
        tally.first_seq,
        tally.last_seq
    );
    Ok(())
}
