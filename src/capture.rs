//! On-disk capture of the emitted packet stream.
//!
//! A capture file is a sequence of frames, each laid out as
//! `[len:u32 LE][crc32:u32 LE][payload]` where `payload` is the bincode
//! encoding of a [`CaptureFrame`]. The first frame is a [`CaptureHeader`],
//! every following frame holds one packet exactly as it was put on the wire.
//!
//! Writing happens on a background thread fed by a bounded channel so the
//! send loop never touches the file system.
use anyhow::{anyhow, bail, Context, Result};
use crc32fast::Hasher as Crc32;
use crossbeam_channel::{bounded, Sender};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const CAPTURE_VERSION: u16 = 1;
const CHANNEL_CAPACITY: usize = 8192;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub version: u16,
    pub created_unix_ns: u128,
    pub destination: String,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub seq: u64,
    pub sent_unix_ns: u128,
    pub mono_ns_from_start: u128, // Instant since capture start
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CaptureFrame {
    Header(CaptureHeader),
    Packet(PacketRecord),
}

pub fn now_unix_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// `captures/feed_YYYY_MM_DD.bin`, local date when the offset is known.
pub fn default_capture_path() -> PathBuf {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let d = now.date();
    let mut p = PathBuf::from("captures");
    p.push(format!("feed_{}_{:02}_{:02}.bin", d.year(), d.month() as u8, d.day()));
    p
}

pub fn write_frame<W: Write>(w: &mut W, frame: &CaptureFrame) -> Result<()> {
    let payload = bincode::serialize(frame)?;
    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let len = payload.len() as u32;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&crc.to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(())
}

fn writer_thread(out: PathBuf, rx: crossbeam_channel::Receiver<CaptureFrame>) -> Result<u64> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
        }
    }
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(&out)
        .with_context(|| format!("open capture {:?}", out))?;
    let mut w = BufWriter::with_capacity(1 << 20, file);
    let mut frames = 0u64;
    for frame in rx {
        write_frame(&mut w, &frame)?;
        frames += 1;
    }
    w.flush()?;
    Ok(frames)
}

/// Handle to a capture being written in the background.
pub struct CaptureWriter {
    tx: Option<Sender<CaptureFrame>>,
    handle: Option<JoinHandle<Result<u64>>>,
    start: Instant,
    path: PathBuf,
}

impl CaptureWriter {
    /// Create (truncate) `path` and queue the header frame.
    pub fn create(path: impl AsRef<Path>, destination: String, seed: Option<u64>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (tx, rx) = bounded::<CaptureFrame>(CHANNEL_CAPACITY);
        let out = path.clone();
        let handle = std::thread::Builder::new()
            .name("capture-writer".into())
            .spawn(move || writer_thread(out, rx))
            .context("spawn capture writer")?;
        let header = CaptureFrame::Header(CaptureHeader {
            version: CAPTURE_VERSION,
            created_unix_ns: now_unix_ns(),
            destination,
            seed,
        });
        tx.send(header).map_err(|_| anyhow!("capture writer exited before header"))?;
        Ok(Self { tx: Some(tx), handle: Some(handle), start: Instant::now(), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue one transmitted packet.
    pub fn record(&self, seq: u64, bytes: &[u8]) -> Result<()> {
        let Some(tx) = &self.tx else { bail!("capture already finished") };
        let rec = PacketRecord {
            seq,
            sent_unix_ns: now_unix_ns(),
            mono_ns_from_start: self.start.elapsed().as_nanos(),
            bytes: bytes.to_vec(),
        };
        if tx.send(CaptureFrame::Packet(rec)).is_err() {
            bail!("capture writer for {:?} stopped", self.path);
        }
        Ok(())
    }

    /// Close the channel, wait for the writer and return the frame count.
    pub fn finish(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        drop(self.tx.take());
        match self.handle.take() {
            Some(h) => h.join().map_err(|_| anyhow!("capture writer panicked"))?,
            None => Ok(0),
        }
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("capture {:?}: {e:#}", self.path);
        }
    }
}

/// Sequential reader over a capture stream with CRC verification.
pub struct CaptureReader<R: Read> {
    rdr: R,
    frames: usize,
}

impl CaptureReader<std::io::BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {:?}", path))?;
        Ok(Self::new(std::io::BufReader::new(f)))
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(rdr: R) -> Self {
        Self { rdr, frames: 0 }
    }

    /// Frames successfully read so far.
    pub fn frames_read(&self) -> usize {
        self.frames
    }

    /// Next frame, `None` at a clean end of stream.
    pub fn next_frame(&mut self) -> Result<Option<CaptureFrame>> {
        let mut len_buf = [0u8; 4];
        match self.rdr.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut crc_buf = [0u8; 4];
        self.rdr.read_exact(&mut crc_buf).with_context(|| format!("truncated frame {}", self.frames))?;
        let crc_on_file = u32::from_le_bytes(crc_buf);
        let mut payload = vec![0u8; len];
        self.rdr.read_exact(&mut payload).with_context(|| format!("truncated frame {}", self.frames))?;

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let crc_calc = hasher.finalize();
        if crc_calc != crc_on_file {
            bail!("CRC mismatch at frame {}: file={:#x}, calc={:#x}", self.frames, crc_on_file, crc_calc);
        }
        let frame: CaptureFrame = bincode::deserialize(&payload).context("bincode decode")?;
        self.frames += 1;
        Ok(Some(frame))
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = Result<CaptureFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header() -> CaptureFrame {
        CaptureFrame::Header(CaptureHeader {
            version: CAPTURE_VERSION,
            created_unix_ns: 0,
            destination: "127.0.0.1:1234".into(),
            seed: Some(1),
        })
    }

    #[test]
    fn frames_read_back_in_order() {
        let mut buf = Vec::new();
        let rec = CaptureFrame::Packet(PacketRecord { seq: 1, sent_unix_ns: 5, mono_ns_from_start: 6, bytes: vec![1, 2, 3] });
        write_frame(&mut buf, &header()).unwrap();
        write_frame(&mut buf, &rec).unwrap();

        let mut r = CaptureReader::new(Cursor::new(buf));
        assert_eq!(r.next_frame().unwrap(), Some(header()));
        assert_eq!(r.next_frame().unwrap(), Some(rec));
        assert_eq!(r.next_frame().unwrap(), None);
        assert_eq!(r.frames_read(), 2);
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &header()).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        let err = CaptureReader::new(Cursor::new(buf)).next_frame().unwrap_err();
        assert!(err.to_string().contains("CRC mismatch at frame 0"));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &header()).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(CaptureReader::new(Cursor::new(buf)).next_frame().is_err());
    }

    #[test]
    fn default_path_lives_under_captures() {
        let p = default_capture_path();
        assert!(p.starts_with("captures"));
        assert_eq!(p.extension().and_then(|e| e.to_str()), Some("bin"));
    }
}
