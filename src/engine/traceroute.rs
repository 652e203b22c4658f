//! UDP-probe / ICMP-response traceroute engine.
//!
//! A probe datagram goes out with a stepped TTL while a separate ICMP
//! socket listens for the time-exceeded (or destination-unreachable)
//! response that names the hop.

use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pnet_packet::icmp::IcmpTypes;
use pnet_packet::icmpv6::Icmpv6Types;
use pnet_packet::ip::IpNextHeaderProtocols;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::clock::microtime;
use crate::error::{Error, Result};
use crate::model::{TracerouteItem, TracerouteResult};
use crate::net::{resolve, Family};

const BUFFER_SIZE: usize = 65536;
/// Classic traceroute destination port.
const PROBE_PORT: u16 = 33434;
/// Probe datagram payload length.
const PROBE_LEN: usize = 40;
/// Pause before each probe.
const PROBE_PACING: Duration = Duration::from_millis(1);

pub type TracerouteCallback = Box<dyn FnMut(u16, SocketAddr, f64) + Send>;

/// TTL-stepping traceroute engine.
pub struct Traceroute {
    cancel: Arc<AtomicBool>,
    callback: Option<TracerouteCallback>,
    last_result: Option<TracerouteResult>,
}

impl Default for Traceroute {
    fn default() -> Self {
        Self::new()
    }
}

impl Traceroute {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            callback: None,
            last_result: None,
        }
    }

    /// Install the per-hop callback `(ttl, hop_address, rtt_seconds)`.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u16, SocketAddr, f64) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Cooperative cancellation flag, observed before each TTL.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Result of the most recent successful run.
    pub fn last_result(&self) -> Option<&TracerouteResult> {
        self.last_result.as_ref()
    }

    /// Probe every TTL from 1 to `max_ttl`, waiting up to `timeout` seconds
    /// per hop, stopping early once the destination itself answers.
    ///
    /// Hops that never answer stay in the result with `stat == 0`.
    pub fn exec(&mut self, target: &str, family: Family, max_ttl: u16, timeout: f64) -> Result<()> {
        let (domain, proto) = match family {
            Family::V4 => (Domain::IPV4, Protocol::ICMPV4),
            Family::V6 => (Domain::IPV6, Protocol::ICMPV6),
            Family::Any => return Err(Error::Family),
        };

        let icmp = Socket::new(domain, Type::DGRAM, Some(proto))?;
        icmp.set_read_timeout(Some(Duration::from_secs_f64(timeout.max(1e-6))))?;

        let dest = resolve(target, PROBE_PORT, family)?[0];
        let udp = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        self.cancel.store(false, Ordering::Relaxed);

        let payload: Vec<u8> = (0..PROBE_LEN).map(|i| (i & 0xff) as u8).collect();
        let mut recv_buf = [MaybeUninit::<u8>::uninit(); BUFFER_SIZE];
        let mut items = Vec::with_capacity(max_ttl as usize);

        for ttl in 1..=max_ttl {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            let mut item = TracerouteItem {
                ttl,
                stat: -1,
                sent: 0.0,
                recv: 0.0,
                saddr: None,
            };

            let hop_limit = match family {
                Family::V6 => udp.set_unicast_hops_v6(ttl as u32),
                _ => udp.set_ttl(ttl as u32),
            };
            if hop_limit.is_err() {
                items.push(item);
                continue;
            }
            thread::sleep(PROBE_PACING);

            let t0 = microtime();
            if udp.send_to(&payload, &SockAddr::from(dest)).is_err() {
                items.push(item);
                continue;
            }
            item.stat = 0;
            item.sent = t0;

            match recv_hop_response(&icmp, family, &mut recv_buf) {
                Some((saddr, t1)) => {
                    item.stat = 1;
                    item.recv = t1;
                    item.saddr = Some(saddr);
                    if let Some(cb) = self.callback.as_mut() {
                        cb(ttl, saddr, t1 - t0);
                    }
                    let reached = saddr.ip() == dest.ip();
                    items.push(item);
                    if reached {
                        break;
                    }
                }
                None => {
                    debug!(ttl, "no hop response within timeout");
                    items.push(item);
                }
            }
        }

        self.last_result = Some(TracerouteResult { items });
        Ok(())
    }
}

/// Wait for one ICMP datagram and validate it for `family`; returns the hop
/// source address and the receive time.
fn recv_hop_response(
    socket: &Socket,
    family: Family,
    buf: &mut [MaybeUninit<u8>; BUFFER_SIZE],
) -> Option<(SocketAddr, f64)> {
    let (len, from) = socket.recv_from(buf).ok()?;
    let t1 = microtime();
    let from = from.as_socket()?;
    let bytes = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
    let valid = match family {
        Family::V4 => from.is_ipv4() && valid_icmp4_response(bytes),
        Family::V6 => from.is_ipv6() && valid_icmp6_response(bytes),
        Family::Any => false,
    };
    valid.then_some((from, t1))
}

/// IPv4: a 20-byte no-options header carrying ICMP time-exceeded or
/// destination-unreachable.
fn valid_icmp4_response(buf: &[u8]) -> bool {
    buf.len() >= 24
        && buf[0] == 0x45
        && buf[9] == IpNextHeaderProtocols::Icmp.0
        && (buf[20] == IcmpTypes::TimeExceeded.0 || buf[20] == IcmpTypes::DestinationUnreachable.0)
}

/// ICMPv6 arrives without its IP header; the type byte leads.
fn valid_icmp6_response(buf: &[u8]) -> bool {
    buf.len() >= 24
        && (buf[0] == Icmpv6Types::TimeExceeded.0 || buf[0] == Icmpv6Types::DestinationUnreachable.0)
}
