//! Measurement engines.
//!
//! Every engine is blocking and single-threaded: one `exec` call drives one
//! run to completion, invoking the registered callback as measurements
//! arrive. Cancellation is cooperative through the `Arc<AtomicBool>` each
//! engine hands out; the flag is observed at the top of the probe loop.

pub mod http;
pub mod ping;
pub mod traceroute;
