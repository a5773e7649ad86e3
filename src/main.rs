use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use market_sim::capture::{default_capture_path, CaptureWriter};
use market_sim::config::FeedConfig;
use market_sim::feed::FeedRunner;
use market_sim::generator::FeedGenerator;
use market_sim::init_tracing;
use market_sim::net::UdpTransport;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(version, about = "Synthetic Add/Cancel order feed over UDP multicast")]
struct Args {
    /// Destination group or host
    #[arg(long, env = "FEED_GROUP", default_value = "127.0.0.1")]
    group: IpAddr,

    /// Destination port
    #[arg(long, env = "FEED_PORT", default_value_t = 1234)]
    port: u16,

    /// Smallest burst, in packets
    #[arg(long, env = "BURST_MIN", default_value_t = 10)]
    burst_min: u32,

    /// Largest burst, in packets
    #[arg(long, env = "BURST_MAX", default_value_t = 100)]
    burst_max: u32,

    /// Initial price in cents
    #[arg(long, env = "START_PRICE", default_value_t = 10_000)]
    start_price: i32,

    /// Price floor in cents
    #[arg(long, env = "PRICE_FLOOR", default_value_t = 100)]
    price_floor: i32,

    /// Price walk step in cents
    #[arg(long, env = "PRICE_TICK", default_value_t = 5)]
    tick: i32,

    /// Cancel probability while orders are live
    #[arg(long, env = "CANCEL_PROBABILITY", default_value_t = 0.2)]
    cancel_probability: f64,

    /// Shortest pause between bursts (microseconds)
    #[arg(long, env = "SLEEP_MIN_US", default_value_t = 1_000)]
    sleep_min_us: u64,

    /// Longest pause between bursts (microseconds)
    #[arg(long, env = "SLEEP_MAX_US", default_value_t = 10_000)]
    sleep_max_us: u64,

    /// Log progress every N packets
    #[arg(long, env = "PROGRESS_EVERY", default_value_t = 1000)]
    progress_every: u64,

    /// Seed for a reproducible stream; random when omitted
    #[arg(long, env = "FEED_SEED")]
    seed: Option<u64>,

    /// Stop after N bursts; runs until Ctrl+C when omitted
    #[arg(long, env = "FEED_BURSTS")]
    bursts: Option<u64>,

    /// Multicast TTL
    #[arg(long, env = "MCAST_TTL", default_value_t = 1)]
    ttl: u32,

    /// Disable multicast loopback
    #[arg(long, default_value_t = false)]
    no_loop: bool,

    /// Record every sent packet to a capture file
    #[arg(long, default_value_t = false)]
    capture: bool,

    /// Capture path; defaults to captures/feed_YYYY_MM_DD.bin
    #[arg(long, env = "CAPTURE_OUT")]
    out: Option<PathBuf>,
}

impl Args {
    fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            group: self.group,
            port: self.port,
            burst_min: self.burst_min,
            burst_max: self.burst_max,
            start_price: self.start_price,
            price_floor: self.price_floor,
            tick: self.tick,
            cancel_probability: self.cancel_probability,
            sleep_min: Duration::from_micros(self.sleep_min_us),
            sleep_max: Duration::from_micros(self.sleep_max_us),
            progress_every: self.progress_every,
            multicast_ttl: self.ttl,
            multicast_loop: !self.no_loop,
            ..FeedConfig::default()
        }
    }
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    init_tracing();
    let args = Args::parse();
    let config = args.feed_config();
    config.validate().context("invalid feed configuration")?;

    let rng = match args.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let generator = FeedGenerator::new(&config, rng)?;
    let transport = UdpTransport::open(&config)?;
    info!(dest = %transport.destination(), seed = ?args.seed, "market simulator started");
    info!("generating volatility and micro-bursts");

    let mut runner = FeedRunner::new(generator, transport, config.progress_every).with_max_bursts(args.bursts);
    if args.capture || args.out.is_some() {
        let path = args.out.clone().unwrap_or_else(default_capture_path);
        let capture = CaptureWriter::create(&path, config.destination().to_string(), args.seed)?;
        info!(?path, "capturing sent packets");
        runner = runner.with_capture(capture);
    }

    // Ctrl+C only raises the flag; the loop notices before the next packet.
    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::Relaxed))
        .context("install Ctrl+C handler")?;

    runner.run(&stop)?;
    let (stats, transport) = runner.finish()?;
    drop(transport);
    if stop.load(Ordering::Relaxed) {
        info!(packets = stats.packets, "simulation stopped");
    }
    Ok(())
}
