//! The send loop.
//!
//! [`FeedRunner`] drives a [`FeedGenerator`] burst by burst: draw a burst
//! size, emit that many packets back to back through a [`Transport`], then
//! pause. The loop is single threaded; the only thing that crosses threads
//! is the stop flag, which is checked before every burst and every packet.
use crate::capture::CaptureWriter;
use crate::generator::FeedGenerator;
use crate::wire::{Event, MAX_PACKET_LEN};
use anyhow::Result;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{info, trace};

/// Best-effort datagram sink. An error is fatal to the run; nothing retries.
pub trait Transport {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub bursts: u64,
    pub packets: u64,
    pub adds: u64,
    pub cancels: u64,
    pub bytes: u64,
}

pub struct FeedRunner<R: Rng, T: Transport> {
    generator: FeedGenerator<R>,
    transport: T,
    capture: Option<CaptureWriter>,
    progress_every: u64,
    max_bursts: Option<u64>,
    pace: bool,
    stats: RunStats,
    buf: Vec<u8>,
}

impl<R: Rng, T: Transport> FeedRunner<R, T> {
    pub fn new(generator: FeedGenerator<R>, transport: T, progress_every: u64) -> Self {
        Self {
            generator,
            transport,
            capture: None,
            progress_every: progress_every.max(1),
            max_bursts: None,
            pace: true,
            stats: RunStats::default(),
            buf: Vec::with_capacity(MAX_PACKET_LEN),
        }
    }

    /// Copy every transmitted packet into a capture file.
    pub fn with_capture(mut self, capture: CaptureWriter) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Stop after this many bursts instead of running until interrupted.
    pub fn with_max_bursts(mut self, bursts: Option<u64>) -> Self {
        self.max_bursts = bursts;
        self
    }

    /// Skip the sleep between bursts. The pause is still drawn so the random
    /// stream matches a paced run with the same seed.
    pub fn without_pacing(mut self) -> Self {
        self.pace = false;
        self
    }

    pub fn generator(&self) -> &FeedGenerator<R> {
        &self.generator
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Run bursts until `stop` is raised or the burst limit is reached.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RunStats> {
        let started = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            if self.max_bursts.is_some_and(|n| self.stats.bursts >= n) {
                break;
            }
            self.run_burst(stop)?;
        }
        info!(
            bursts = self.stats.bursts,
            packets = self.stats.packets,
            adds = self.stats.adds,
            cancels = self.stats.cancels,
            live = self.generator.live_orders().len(),
            price = self.generator.current_price(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "feed finished"
        );
        Ok(self.stats)
    }

    /// Emit one burst followed by its pause; returns the packets sent.
    pub fn run_burst(&mut self, stop: &AtomicBool) -> Result<u32> {
        let size = self.generator.burst_size();
        let mut sent = 0u32;
        for _ in 0..size {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let packet = self.generator.next_packet();
            self.buf.clear();
            packet.encode_into(&mut self.buf);
            self.transport.send(&self.buf)?;
            if let Some(capture) = &self.capture {
                capture.record(packet.seq, &self.buf)?;
            }
            trace!(?packet, "sent");

            sent += 1;
            self.stats.packets += 1;
            self.stats.bytes += self.buf.len() as u64;
            match packet.event {
                Event::Add { .. } => self.stats.adds += 1,
                Event::Cancel { .. } => self.stats.cancels += 1,
            }
            if self.stats.packets % self.progress_every == 0 {
                info!(packets = self.stats.packets, price = self.generator.current_price(), "progress");
            }
        }
        self.stats.bursts += 1;

        let pause = self.generator.pause();
        if self.pace && !stop.load(Ordering::Relaxed) {
            std::thread::sleep(pause);
        }
        Ok(sent)
    }

    /// Flush the capture (if any) and hand back the transport.
    pub fn finish(self) -> Result<(RunStats, T)> {
        if let Some(capture) = self.capture {
            let path = capture.path().to_path_buf();
            let frames = capture.finish()?;
            info!(?path, frames, "capture written");
        }
        Ok((self.stats, self.transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::wire::Packet;
    use anyhow::bail;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[derive(Default)]
    struct Sink {
        sent: Vec<Vec<u8>>,
        fail_after: Option<usize>,
    }

    impl Transport for Sink {
        fn send(&mut self, bytes: &[u8]) -> Result<()> {
            if self.fail_after.is_some_and(|n| self.sent.len() >= n) {
                bail!("network is unreachable");
            }
            self.sent.push(bytes.to_vec());
            Ok(())
        }
    }

    fn runner(seed: u64, sink: Sink) -> FeedRunner<ChaCha8Rng, Sink> {
        let config = FeedConfig::default();
        let generator = FeedGenerator::new(&config, ChaCha8Rng::seed_from_u64(seed)).unwrap();
        FeedRunner::new(generator, sink, config.progress_every).without_pacing()
    }

    #[test]
    fn bounded_run_sends_every_burst() {
        let mut r = runner(8, Sink::default()).with_max_bursts(Some(5));
        let stats = r.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(stats.bursts, 5);
        assert_eq!(stats.packets, r.transport().sent.len() as u64);
        assert_eq!(stats.adds + stats.cancels, stats.packets);
        assert!((50..=500).contains(&stats.packets));
        let seqs: Vec<u64> = r.transport().sent.iter().map(|b| Packet::decode(b).unwrap().seq).collect();
        assert_eq!(seqs, (1..=stats.packets).collect::<Vec<_>>());
    }

    #[test]
    fn raised_stop_sends_nothing() {
        let mut r = runner(1, Sink::default());
        let stats = r.run(&AtomicBool::new(true)).unwrap();
        assert_eq!(stats, RunStats::default());
        assert!(r.transport().sent.is_empty());
    }

    #[test]
    fn send_error_is_fatal() {
        let mut r = runner(2, Sink { fail_after: Some(3), ..Sink::default() });
        let err = r.run(&AtomicBool::new(false)).unwrap_err();
        assert!(err.to_string().contains("unreachable"));
        assert_eq!(r.stats().packets, 3);
    }
}
