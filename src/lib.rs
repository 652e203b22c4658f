//! Active network measurement probes.
//!
//! Three blocking engines, each producing a per-event time series plus a
//! bounded-frequency progress callback:
//!
//! - [`Ping`] — ICMP echo probes sent at a cadence from a single event
//!   loop that interleaves sending with reply matching.
//! - [`Traceroute`] — TTL-stepped UDP probes correlated with the ICMP
//!   time-exceeded responses that name each hop.
//! - [`HttpGet`] / [`HttpPost`] — minimal HTTP/1.1 over a plain TCP
//!   stream, recording a dense throughput trace while the body moves.
//!
//! The shared kernel underneath is a URL parser, an HTTP header parser, a
//! resolution/connect helper and a wall-clock timebase. Engines retain the
//! result of their most recent run; cancellation is cooperative through the
//! atomic flag each engine hands out.

pub mod checksum;
pub mod clock;
pub mod engine;
pub mod error;
pub mod header;
pub mod model;
pub mod net;
pub mod url;

pub use engine::http::{HttpGet, HttpPost};
pub use engine::ping::Ping;
pub use engine::traceroute::Traceroute;
pub use error::{Error, Result};
pub use net::Family;
