//! UDP plumbing for the feed: the sending side used by the generator and the
//! receiving side used by the listener.
use crate::config::FeedConfig;
use crate::feed::Transport;
use crate::wire::{Packet, MAX_PACKET_LEN};
use anyhow::{bail, Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a blocking receive waits before re-checking the stop flag.
pub const RECV_POLL: Duration = Duration::from_millis(200);

/// Connectionless sender bound to an ephemeral local port.
pub struct UdpTransport {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpTransport {
    pub fn open(config: &FeedConfig) -> Result<Self> {
        Self::open_to(config.destination(), config.multicast_ttl, config.multicast_loop)
    }

    pub fn open_to(dest: SocketAddr, ttl: u32, multicast_loop: bool) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(dest), Type::DGRAM, Some(Protocol::UDP))
            .context("create UDP socket")?;
        let bind_addr: SocketAddr = match dest {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        socket.bind(&bind_addr.into()).with_context(|| format!("bind {}", bind_addr))?;

        if dest.ip().is_multicast() {
            match dest {
                SocketAddr::V4(_) => {
                    socket.set_multicast_ttl_v4(ttl)?;
                    socket.set_multicast_loop_v4(multicast_loop)?;
                }
                SocketAddr::V6(_) => {
                    socket.set_multicast_hops_v6(ttl)?;
                    socket.set_multicast_loop_v6(multicast_loop)?;
                }
            }
            info!(%dest, ttl, multicast_loop, "multicast sender configured");
        }
        Ok(Self { socket: socket.into(), dest })
    }

    pub fn destination(&self) -> SocketAddr {
        self.dest
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let n = self.socket.send_to(bytes, self.dest).with_context(|| format!("send to {}", self.dest))?;
        if n != bytes.len() {
            bail!("short datagram to {}: {} of {} bytes", self.dest, n, bytes.len());
        }
        Ok(())
    }
}

/// Bind the feed port, joining `group` when it is a multicast address.
pub fn bind_receiver(bind: SocketAddr, group: Option<IpAddr>) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))
        .context("create UDP socket")?;
    socket.set_reuse_address(true)?;
    socket.bind(&bind.into()).with_context(|| format!("bind {}", bind))?;

    match group {
        Some(IpAddr::V4(g)) if g.is_multicast() => {
            socket.join_multicast_v4(&g, &Ipv4Addr::UNSPECIFIED).with_context(|| format!("join {}", g))?;
            info!(group = %g, "joined multicast group");
        }
        Some(IpAddr::V6(g)) if g.is_multicast() => {
            socket.join_multicast_v6(&g, 0).with_context(|| format!("join {}", g))?;
            info!(group = %g, "joined multicast group");
        }
        _ => {}
    }
    socket.set_read_timeout(Some(RECV_POLL))?;
    Ok(socket.into())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ListenStats {
    pub datagrams: u64,
    pub decoded: u64,
    pub malformed: u64,
}

/// Receive and decode datagrams until `stop` is set or `limit` packets have
/// been decoded. Undecodable datagrams are logged and skipped.
pub fn receive_packets<F>(socket: &UdpSocket, stop: &AtomicBool, limit: Option<u64>, mut on_packet: F) -> Result<ListenStats>
where
    F: FnMut(Packet, SocketAddr),
{
    let mut stats = ListenStats::default();
    // Room for one oversized datagram so trailing bytes are detected.
    let mut buf = [0u8; 2048];
    debug_assert!(buf.len() > MAX_PACKET_LEN);

    while !stop.load(Ordering::Relaxed) {
        if limit.is_some_and(|n| stats.decoded >= n) {
            break;
        }
        let (n, src) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
            Err(e) => return Err(e).context("receive datagram"),
        };
        stats.datagrams += 1;
        match Packet::decode(&buf[..n]) {
            Ok(p) => {
                stats.decoded += 1;
                on_packet(p, src);
            }
            Err(e) => {
                stats.malformed += 1;
                warn!(%src, len = n, "dropping datagram: {e:#}");
            }
        }
    }
    debug!(?stats, "receive loop finished");
    Ok(stats)
}
