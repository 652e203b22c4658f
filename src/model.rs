//! Measurement result and progress types.
//!
//! Each engine retains the result of its most recent successful run;
//! replacing it on the next run releases the previous one.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// One echo probe slot, indexed by sequence number.
///
/// `stat` is `-1` before the probe is sent, `0` once sent and awaiting a
/// reply (or timed out), and the number of matching replies otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingItem {
    pub stat: i32,
    /// ICMP identifier chosen for this probe.
    pub ident: u16,
    /// Send wall time, seconds.
    pub sent: f64,
    /// Receive wall time of the latest matching reply, seconds.
    pub recv: f64,
}

impl Default for PingItem {
    fn default() -> Self {
        Self {
            stat: -1,
            ident: 0,
            sent: 0.0,
            recv: 0.0,
        }
    }
}

/// Echo time series for one run, one item per sequence number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub items: Vec<PingItem>,
}

/// One attempted TTL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracerouteItem {
    pub ttl: u16,
    /// `-1` probe not sent, `0` sent without a response, `1` hop recorded.
    pub stat: i32,
    /// Probe send wall time, seconds.
    pub sent: f64,
    /// Response wall time, seconds.
    pub recv: f64,
    /// Router that answered for this TTL.
    pub saddr: Option<SocketAddr>,
}

/// Hops in TTL order, truncated once the destination answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracerouteResult {
    pub items: Vec<TracerouteItem>,
}

/// One download trace sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HttpGetItem {
    /// Wall time, seconds.
    pub tm: f64,
    /// Request bytes whose write has returned.
    pub tx: u64,
    /// Response bytes received so far.
    pub rx: u64,
}

/// Download trace: header/content lengths plus the dense sample sequence.
///
/// Two synthetic samples bracket the body: one at request start and one
/// right after the response header arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpGetResult {
    /// Response header length; the end-of-header sentinel's final LF is not
    /// counted.
    pub header_len: usize,
    /// `Content-Length` announced by the server, `-1` when absent or
    /// invalid.
    pub content_len: i64,
    pub items: Vec<HttpGetItem>,
}

/// One upload trace sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HttpPostItem {
    /// Wall time, seconds.
    pub tm: f64,
    /// Bytes from writes that had already returned when the current write
    /// was issued.
    pub tx: u64,
    /// Response bytes received so far.
    pub rx: u64,
    /// Bytes handed to the kernel, the in-flight write included.
    pub buffered_tx: u64,
}

/// Upload trace, shaped like [`HttpGetResult`] with the buffered counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpPostResult {
    pub header_len: usize,
    pub content_len: i64,
    pub items: Vec<HttpPostItem>,
}

/// Snapshot handed to the GET progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HttpGetProgress {
    pub header_len: usize,
    pub content_len: i64,
    /// Wall time the request started.
    pub started: f64,
    /// Wall time of this snapshot.
    pub now: f64,
    pub tx: u64,
    pub rx: u64,
}

/// Snapshot handed to the POST progress callback.
///
/// Until the response header arrives `header_len` is `0` and `content_len`
/// is `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HttpPostProgress {
    pub header_len: usize,
    pub content_len: i64,
    pub started: f64,
    pub now: f64,
    pub buffered_tx: u64,
    pub tx: u64,
    pub rx: u64,
}
