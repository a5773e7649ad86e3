use market_sim::capture::{CaptureFrame, CaptureReader, CaptureWriter};
use market_sim::config::FeedConfig;
use market_sim::feed::{FeedRunner, Transport};
use market_sim::generator::FeedGenerator;
use market_sim::net::{bind_receiver, receive_packets, UdpTransport};
use market_sim::tally::StreamTally;
use market_sim::wire::{Event, Packet};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::AtomicBool;

#[derive(Default)]
struct Recorder {
    sent: Vec<Vec<u8>>,
}

impl Transport for Recorder {
    fn send(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.sent.push(bytes.to_vec());
        Ok(())
    }
}

fn generator(config: &FeedConfig, seed: u64) -> FeedGenerator<ChaCha8Rng> {
    FeedGenerator::new(config, ChaCha8Rng::seed_from_u64(seed)).unwrap()
}

#[test]
fn seeded_bursts_account_for_every_packet() {
    let config = FeedConfig::default();
    let mut sink = Recorder::default();
    let mut runner = FeedRunner::new(generator(&config, 2024), &mut sink, config.progress_every).without_pacing();
    let stop = AtomicBool::new(false);

    let mut burst_total = 0u64;
    for _ in 0..40 {
        let n = runner.run_burst(&stop).unwrap();
        assert!((10..=100).contains(&n));
        burst_total += n as u64;
    }
    let stats = runner.stats();
    assert_eq!(stats.bursts, 40);
    assert_eq!(stats.packets, burst_total);
    drop(runner);
    assert_eq!(sink.sent.len() as u64, burst_total);

    let mut added = HashSet::new();
    let mut cancelled = HashSet::new();
    let mut last_order_id = 0;
    for (i, bytes) in sink.sent.iter().enumerate() {
        let p = Packet::decode(bytes).unwrap();
        assert_eq!(p.seq, i as u64 + 1);
        match p.event {
            Event::Add { order_id, price, quantity, .. } => {
                assert!(order_id > last_order_id);
                last_order_id = order_id;
                assert!(price >= config.price_floor);
                assert!((1..=100).contains(&quantity));
                added.insert(order_id);
            }
            Event::Cancel { order_id } => {
                assert!(added.contains(&order_id), "cancel before add of {order_id}");
                assert!(cancelled.insert(order_id), "{order_id} cancelled twice");
            }
        }
    }
}

#[test]
fn same_seed_replays_identical_wire_bytes() {
    let config = FeedConfig::default();
    let run = |seed| {
        let mut runner = FeedRunner::new(generator(&config, seed), Recorder::default(), config.progress_every)
            .without_pacing()
            .with_max_bursts(Some(10));
        runner.run(&AtomicBool::new(false)).unwrap();
        runner.finish().unwrap().1.sent
    };
    assert_eq!(run(77), run(77));
    assert_ne!(run(77), run(78));
}

#[test]
fn capture_mirrors_the_sent_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("feed.bin");
    let config = FeedConfig::default();

    let capture = CaptureWriter::create(&path, config.destination().to_string(), Some(5)).unwrap();
    let mut runner = FeedRunner::new(generator(&config, 5), Recorder::default(), config.progress_every)
        .without_pacing()
        .with_max_bursts(Some(8))
        .with_capture(capture);
    runner.run(&AtomicBool::new(false)).unwrap();
    let (stats, sink) = runner.finish().unwrap();

    let mut rdr = CaptureReader::open(&path).unwrap();
    match rdr.next_frame().unwrap() {
        Some(CaptureFrame::Header(h)) => {
            assert_eq!(h.destination, "127.0.0.1:1234");
            assert_eq!(h.seed, Some(5));
        }
        other => panic!("expected header, got {other:?}"),
    }
    let mut tally = StreamTally::default();
    let mut i = 0usize;
    for frame in rdr {
        let CaptureFrame::Packet(rec) = frame.unwrap() else { panic!("second header") };
        assert_eq!(rec.bytes, sink.sent[i]);
        let p = Packet::decode(&rec.bytes).unwrap();
        assert_eq!(p.seq, rec.seq);
        tally.observe(&p);
        i += 1;
    }
    assert_eq!(i as u64, stats.packets);
    assert_eq!(tally.adds, stats.adds);
    assert_eq!(tally.cancels, stats.cancels);
    assert_eq!(tally.unknown_cancels, 0);
}

#[test]
fn loopback_udp_delivers_decodable_packets() {
    let receiver = bind_receiver(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0), None).unwrap();
    let dest = receiver.local_addr().unwrap();

    let config = FeedConfig {
        group: dest.ip(),
        port: dest.port(),
        burst_min: 20,
        burst_max: 20,
        ..FeedConfig::default()
    };
    let transport = UdpTransport::open(&config).unwrap();
    assert_eq!(transport.destination(), dest);
    let mut runner = FeedRunner::new(generator(&config, 9), transport, config.progress_every)
        .without_pacing()
        .with_max_bursts(Some(1));
    let stats = runner.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(stats.packets, 20);

    let mut seqs = Vec::new();
    let listen = receive_packets(&receiver, &AtomicBool::new(false), Some(20), |p, _| seqs.push(p.seq)).unwrap();
    assert_eq!(listen.malformed, 0);
    assert_eq!(seqs, (1..=20).collect::<Vec<u64>>());
}

#[test]
fn listener_skips_garbage_datagrams() {
    let receiver = bind_receiver(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0), None).unwrap();
    let dest = receiver.local_addr().unwrap();
    let mut tx = UdpTransport::open_to(dest, 1, true).unwrap();
    tx.send(b"not a packet").unwrap();
    let good = Packet { seq: 1, event: Event::Cancel { order_id: 3 } };
    tx.send(&good.encode()).unwrap();

    let mut got = Vec::new();
    let stats = receive_packets(&receiver, &AtomicBool::new(false), Some(1), |p, _| got.push(p)).unwrap();
    assert_eq!(stats.datagrams, 2);
    assert_eq!(stats.malformed, 1);
    assert_eq!(got, vec![good]);
}
