//! ICMP echo probe engine.
//!
//! A single event loop interleaves sending and receiving: probes go out at
//! the configured cadence while replies are matched back to their slot by
//! identifier and sequence number, so a late reply to probe 0 can arrive
//! while probe 5 is being sent.

use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pnet_packet::icmp::IcmpTypes;
use pnet_packet::icmpv6::Icmpv6Types;
use rand::Rng;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, trace};

use crate::checksum::checksum;
use crate::clock::microtime;
use crate::error::{Error, Result};
use crate::model::{PingItem, PingResult};
use crate::net::{resolve, Family};

/// Receive buffer, large enough for any reply the kernel hands us.
const BUFFER_SIZE: usize = 65536;
/// Echo header: type, code, checksum, identifier, sequence.
const ICMP_HEADER_LEN: usize = 8;

pub type PingCallback = Box<dyn FnMut(u16, f64) + Send>;

/// ICMP echo (ping) engine.
///
/// Owns one ICMP socket for its address family and the result of its most
/// recent run.
pub struct Ping {
    socket: Socket,
    family: Family,
    cancel: Arc<AtomicBool>,
    callback: Option<PingCallback>,
    last_result: Option<PingResult>,
}

impl Ping {
    /// Open an ICMP socket for `family`.
    ///
    /// Linux and the BSDs use a raw socket (requires CAP_NET_RAW or root);
    /// elsewhere an unprivileged ICMP datagram socket is used, as on macOS.
    pub fn open(family: Family) -> Result<Self> {
        let socket = match family {
            Family::V4 => Socket::new(Domain::IPV4, icmp_socket_type(), Some(Protocol::ICMPV4))?,
            Family::V6 => Socket::new(Domain::IPV6, icmp_socket_type(), Some(Protocol::ICMPV6))?,
            Family::Any => return Err(Error::Family),
        };
        Ok(Self {
            socket,
            family,
            cancel: Arc::new(AtomicBool::new(false)),
            callback: None,
            last_result: None,
        })
    }

    /// Install the per-reply callback `(seq, rtt_seconds)`.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u16, f64) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Cooperative cancellation flag; setting it ends the run at the next
    /// loop iteration with whatever has been measured so far.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Result of the most recent successful run.
    pub fn last_result(&self) -> Option<&PingResult> {
        self.last_result.as_ref()
    }

    /// Send `n` echo probes carrying `payload_size` bytes at `interval`
    /// second cadence, then wait up to `timeout` seconds for trailing
    /// replies.
    ///
    /// Unanswered probes do not fail the run; each item's `stat` carries the
    /// per-probe outcome.
    pub fn exec(
        &mut self,
        target: &str,
        payload_size: usize,
        n: usize,
        interval: f64,
        timeout: f64,
    ) -> Result<()> {
        if ICMP_HEADER_LEN + payload_size > BUFFER_SIZE {
            return Err(Error::PayloadTooLarge(payload_size));
        }
        let dest = resolve(target, 0, self.family)?[0];
        self.cancel.store(false, Ordering::Relaxed);

        let mut items = vec![PingItem::default(); n];
        let mut recv_buf = [MaybeUninit::<u8>::uninit(); BUFFER_SIZE];

        let t0 = microtime();
        let mut nsent = 0usize;
        let mut nrecv = 0usize;
        let mut done = false;

        while !done && !self.cancel.load(Ordering::Relaxed) {
            let t1 = microtime();

            if nsent < n && interval * (nsent as f64) < t1 - t0 {
                let ident: u16 = rand::thread_rng().gen();
                let packet = build_echo_request(self.family, ident, nsent as u16, payload_size);
                let sent_at = microtime();
                if let Err(e) = self.socket.send_to(&packet, &SockAddr::from(dest)) {
                    debug!(error = %e, "echo send failed, ending run");
                    break;
                }
                items[nsent] = PingItem {
                    stat: 0,
                    ident,
                    sent: sent_at,
                    recv: 0.0,
                };
                nsent += 1;
            }

            let t1 = microtime();
            let gto = if nsent < n {
                let gto = interval * nsent as f64 - (t1 - t0);
                if gto <= 0.0 {
                    // The next probe is already due.
                    continue;
                }
                gto
            } else {
                (interval * n as f64 - (t1 - t0) + timeout).max(0.0)
            };

            // The poll step: bound the blocking receive by `gto`.
            self.socket.set_read_timeout(Some(poll_timeout(gto)))?;
            let (len, from) = match self.socket.recv_from(&mut recv_buf) {
                Ok(r) => r,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    if interval * n as f64 + timeout < microtime() - t0 {
                        done = true;
                    }
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "receive failed, ending run");
                    break;
                }
            };
            let now = microtime();

            let Some(from) = from.as_socket() else {
                continue;
            };
            if from.ip() != dest.ip() {
                trace!(%from, "reply from unexpected source dropped");
                continue;
            }
            let buf = unsafe { std::slice::from_raw_parts(recv_buf.as_ptr() as *const u8, len) };
            let Some((seq, ident)) = parse_echo_reply(self.family, buf) else {
                continue;
            };
            let idx = seq as usize;
            if idx >= items.len() || items[idx].stat < 0 || items[idx].ident != ident {
                trace!(seq, ident, "stale or unmatched reply dropped");
                continue;
            }

            if let Some(cb) = self.callback.as_mut() {
                cb(seq, now - items[idx].sent);
            }
            items[idx].stat += 1;
            items[idx].recv = now;
            nrecv += 1;
            if nrecv >= n {
                done = true;
            }
        }

        self.last_result = Some(PingResult { items });
        Ok(())
    }
}

#[cfg(any(target_os = "linux", target_os = "freebsd", target_os = "netbsd"))]
fn icmp_socket_type() -> Type {
    Type::RAW
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd", target_os = "netbsd")))]
fn icmp_socket_type() -> Type {
    Type::DGRAM
}

fn poll_timeout(gto: f64) -> Duration {
    Duration::from_secs_f64(gto.max(1e-6))
}

/// Build an echo request: 8-byte header, patterned payload, checksum over
/// the whole packet.
fn build_echo_request(family: Family, ident: u16, seq: u16, payload_size: usize) -> Vec<u8> {
    let mut packet = vec![0u8; ICMP_HEADER_LEN + payload_size];
    packet[0] = match family {
        Family::V6 => Icmpv6Types::EchoRequest.0,
        _ => IcmpTypes::EchoRequest.0,
    };
    packet[1] = 0;
    packet[4..6].copy_from_slice(&ident.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    for i in ICMP_HEADER_LEN..packet.len() {
        packet[i] = (i % 0xff) as u8;
    }
    // Stored in native order so the packet sums to zero; the kernel
    // recomputes it for ICMPv6.
    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_ne_bytes());
    packet
}

/// Extract `(seq, ident)` from an echo reply, or `None` when the datagram
/// is not a well-formed reply for this family.
fn parse_echo_reply(family: Family, buf: &[u8]) -> Option<(u16, u16)> {
    let icmp = match family {
        Family::V6 => buf,
        _ => {
            // The kernel hands us the IP header; its length lives in the low
            // nibble of the first byte, in 4-byte words.
            let ihl = (*buf.first()? & 0x0f) as usize * 4;
            buf.get(ihl..)?
        }
    };
    if icmp.len() < ICMP_HEADER_LEN {
        return None;
    }
    let expected = match family {
        Family::V6 => Icmpv6Types::EchoReply.0,
        _ => IcmpTypes::EchoReply.0,
    };
    if icmp[0] != expected || icmp[1] != 0 {
        return None;
    }
    let ident = u16::from_be_bytes([icmp[4], icmp[5]]);
    let seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    Some((seq, ident))
}
