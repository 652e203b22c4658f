//! Name resolution and TCP stream establishment shared by the engines.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Address family selector for resolution and socket setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    V4,
    V6,
    /// Accept whichever family resolution yields first.
    Any,
}

impl Family {
    pub(crate) fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
            Family::Any => true,
        }
    }
}

/// Resolve `host:port` and keep the candidates matching `family`, in
/// resolution order. `host` may be a name, a dotted quad, or an IPv6
/// literal with or without brackets.
pub fn resolve(host: &str, port: u16, family: Family) -> Result<Vec<SocketAddr>> {
    let target = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let addrs: Vec<SocketAddr> = target
        .to_socket_addrs()
        .map_err(|_| Error::Resolve(host.to_owned()))?
        .filter(|a| family.accepts(a))
        .collect();
    if addrs.is_empty() {
        return Err(Error::Resolve(host.to_owned()));
    }
    Ok(addrs)
}

/// Connect a TCP stream to the first reachable candidate and apply the
/// receive timeout. Fails when resolution fails or every candidate refuses
/// the connection.
pub fn connect_stream(
    host: &str,
    port: u16,
    family: Family,
    recv_timeout: Duration,
) -> Result<TcpStream> {
    let addrs = resolve(host, port, family)?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                stream.set_read_timeout(Some(recv_timeout))?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .map(Error::Socket)
        .unwrap_or_else(|| Error::Resolve(host.to_owned())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn resolves_literals_per_family() {
        let v4 = resolve("127.0.0.1", 80, Family::V4).unwrap();
        assert!(v4.iter().all(|a| a.is_ipv4()));

        let v6 = resolve("::1", 80, Family::V6).unwrap();
        assert!(v6.iter().all(|a| a.is_ipv6()));

        assert!(resolve("127.0.0.1", 80, Family::V6).is_err());
    }

    #[test]
    fn bracketed_v6_literals_are_accepted() {
        let addrs = resolve("[::1]", 8080, Family::Any).unwrap();
        assert_eq!(addrs[0].port(), 8080);
    }

    #[test]
    fn connects_to_first_reachable_candidate() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream =
            connect_stream("127.0.0.1", port, Family::V4, Duration::from_secs(5)).unwrap();
        assert!(stream.read_timeout().unwrap().is_some());
    }
}
