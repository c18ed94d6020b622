use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;

use super::utils::choose_address;
use crate::config::Module;
use crate::context::ProbeContext;
use crate::error::{ProbeError, report};
use crate::logger::ProbeLogger;
use crate::sink::{PHASE_LABEL, ResultSink};

pub const PROBE_ICMP_DURATION_METRIC: &str = "probe_icmp_duration_seconds";
pub const PROBE_ICMP_REPLY_HOP_LIMIT_METRIC: &str = "probe_icmp_reply_hop_limit";

const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

struct IcmpSocket {
    fd: AsyncFd<Socket>,
    /// Raw sockets see the IPv4 header and keep our echo identifier;
    /// datagram sockets get neither.
    raw: bool,
    v6: bool,
}

impl IcmpSocket {
    /// Opens a raw ICMP socket, or the unprivileged datagram kind when raw
    /// sockets are not permitted.
    fn open(ip: IpAddr, logger: &ProbeLogger) -> io::Result<Self> {
        let (domain, protocol, v6) = match ip {
            IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, false),
            IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, true),
        };
        let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
            Ok(socket) => (socket, true),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                logger.debug(format_args!("Raw ICMP socket not permitted, trying datagram socket"));
                (Socket::new(domain, Type::DGRAM, Some(protocol))?, false)
            }
            Err(err) => return Err(err),
        };
        socket.set_nonblocking(true)?;
        Ok(IcmpSocket {
            fd: AsyncFd::new(socket)?,
            raw,
            v6,
        })
    }

    async fn send_to(&self, packet: &[u8], dst: &SockAddr) -> io::Result<()> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send_to(packet, dst)) {
                Ok(result) => return result.map(|_| ()),
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            let read = guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(buf)
            });
            match read {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|chunk| match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => u16::from_be_bytes([*hi, 0]) as u32,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Builds an echo request. The kernel fills in the ICMPv6 checksum.
fn echo_request(v6: bool, id: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(8 + payload.len());
    packet.push(if v6 { ICMPV6_ECHO_REQUEST } else { ICMPV4_ECHO_REQUEST });
    packet.push(0);
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(payload);
    if !v6 {
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// Our echo reply, as seen on one socket read.
#[derive(Debug, PartialEq)]
struct EchoReply {
    hop_limit: Option<u8>,
}

/// Checks whether `datagram` answers our request. `check_id` is off for
/// datagram sockets, where the kernel rewrites the identifier.
fn parse_reply(
    datagram: &[u8],
    with_ip_header: bool,
    v6: bool,
    check_id: Option<u16>,
    seq: u16,
    payload: &[u8],
) -> Option<EchoReply> {
    let (icmp, hop_limit) = if with_ip_header {
        let header_len = ((*datagram.first()? & 0x0f) as usize) * 4;
        (datagram.get(header_len..)?, datagram.get(8).copied())
    } else {
        (datagram, None)
    };
    if icmp.len() < 8 {
        return None;
    }
    let reply_type = if v6 { ICMPV6_ECHO_REPLY } else { ICMPV4_ECHO_REPLY };
    if icmp[0] != reply_type || icmp[6..8] != seq.to_be_bytes() || &icmp[8..] != payload {
        return None;
    }
    if let Some(id) = check_id {
        if icmp[4..6] != id.to_be_bytes() {
            return None;
        }
    }
    Some(EchoReply { hop_limit })
}

async fn ping(
    socket: &IcmpSocket,
    ip: IpAddr,
    packet: &[u8],
    id: u16,
    seq: u16,
    payload: &[u8],
) -> Result<EchoReply, ProbeError> {
    let dst = SockAddr::from(SocketAddr::new(ip, 0));
    socket.send_to(packet, &dst).await?;

    let with_ip_header = socket.raw && !socket.v6;
    let check_id = socket.raw.then_some(id);
    let mut buf = vec![0u8; 65536];
    loop {
        let n = socket.recv(&mut buf).await?;
        if let Some(reply) = parse_reply(&buf[..n], with_ip_header, socket.v6, check_id, seq, payload) {
            return Ok(reply);
        }
    }
}

/// Sends one ICMP echo request to `target` and waits for the matching
/// reply under the probe deadline.
pub async fn probe_icmp(
    ctx: &ProbeContext,
    target: &str,
    module: &Module,
    sink: &mut ResultSink,
    logger: &ProbeLogger,
) -> bool {
    let config = &module.icmp;

    let ip = match choose_address(ctx, target, config.ip_protocol, config.ip_protocol_fallback, sink, logger).await {
        Ok(ip) => ip,
        Err(err) => {
            logger.error(format_args!("Error resolving address err={}", report(&err)));
            return false;
        }
    };

    let socket = match IcmpSocket::open(ip, logger) {
        Ok(socket) => socket,
        Err(err) => {
            logger.error(format_args!("Error opening ICMP socket err={}", err));
            return false;
        }
    };

    let id = std::process::id() as u16;
    let seq = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.subsec_nanos() >> 8) as u16)
        .unwrap_or_default();
    let payload: Vec<u8> = (0..config.payload_size).map(|i| (i % 256) as u8).collect();
    let packet = echo_request(socket.v6, id, seq, &payload);

    logger.info(format_args!(
        "Sending ICMP echo request ip={} raw={} payload_size={}",
        ip, socket.raw, config.payload_size
    ));
    let started = Instant::now();
    let result = ctx.run(ping(&socket, ip, &packet, id, seq, &payload)).await;
    let reply = match result.and_then(|r| r) {
        Ok(reply) => reply,
        Err(err) => {
            logger.error(format_args!("Error waiting for ICMP echo reply err={}", report(&err)));
            return false;
        }
    };
    sink.set_labeled(
        PROBE_ICMP_DURATION_METRIC,
        &[(PHASE_LABEL, "rtt")],
        started.elapsed().as_secs_f64(),
    );
    if let Some(hop_limit) = reply.hop_limit {
        sink.set(PROBE_ICMP_REPLY_HOP_LIMIT_METRIC, hop_limit as f64);
    }
    logger.info(format_args!("Found matching reply packet"));
    true
}
