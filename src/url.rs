//! URL decomposition for the RFC 1738/3986 subset the engines understand.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A decomposed URL.
///
/// `scheme` and `host` are always present after a successful parse; every
/// other component is optional. An IPv6 literal host keeps its brackets.
/// A URL ending at the authority has `path == None`; a trailing `/` yields
/// `path == Some("")`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<String>,
    pub path: Option<String>,
    pub query: Option<String>,
    pub fragment: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn is_scheme_char(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'+' || c == b'-' || c == b'.'
}

/// Parse `scheme://[user[:pass]@]host[:port][/path][?query][#fragment]`.
///
/// The scheme is folded to lowercase. Fails on a missing `:` delimiter, an
/// empty or invalid scheme, a missing `//`, userinfo without a terminating
/// `@`, or an empty host.
pub fn parse_url(url: &str) -> Result<ParsedUrl> {
    let colon = url
        .find(':')
        .ok_or(Error::InvalidUrl("missing scheme delimiter"))?;
    let scheme_part = &url[..colon];
    if scheme_part.is_empty() {
        return Err(Error::InvalidUrl("empty scheme"));
    }
    if !scheme_part.bytes().all(is_scheme_char) {
        return Err(Error::InvalidUrl("invalid scheme character"));
    }
    let scheme = scheme_part.to_ascii_lowercase();

    let mut rest = url[colon + 1..]
        .strip_prefix("//")
        .ok_or(Error::InvalidUrl("missing authority"))?;

    // Userinfo is present when '@' occurs before the first '/'.
    let mut username = None;
    let mut password = None;
    let has_userinfo = rest
        .bytes()
        .take_while(|&c| c != b'/')
        .any(|c| c == b'@');
    if has_userinfo {
        let end = rest
            .find(|c| c == ':' || c == '@')
            .unwrap_or(rest.len());
        username = Some(rest[..end].to_owned());
        rest = &rest[end..];
        if let Some(after) = rest.strip_prefix(':') {
            let end = after.find('@').unwrap_or(after.len());
            password = Some(after[..end].to_owned());
            rest = &after[end..];
        }
        rest = rest
            .strip_prefix('@')
            .ok_or(Error::InvalidUrl("userinfo without '@'"))?;
    }

    // Host: a bracketed IPv6 literal runs to ']' inclusive, anything else to
    // the port or path delimiter.
    let host_end = if rest.starts_with('[') {
        match rest.find(']') {
            Some(p) => p + 1,
            None => rest.len(),
        }
    } else {
        rest.find(|c| c == ':' || c == '/').unwrap_or(rest.len())
    };
    if host_end == 0 {
        return Err(Error::InvalidUrl("empty host"));
    }
    let host = rest[..host_end].to_owned();
    rest = &rest[host_end..];

    let mut port = None;
    if let Some(after) = rest.strip_prefix(':') {
        let end = after.find('/').unwrap_or(after.len());
        port = Some(after[..end].to_owned());
        rest = &after[end..];
    }

    let mut path = None;
    let mut query = None;
    let mut fragment = None;
    if !rest.is_empty() {
        rest = rest
            .strip_prefix('/')
            .ok_or(Error::InvalidUrl("expected '/' after authority"))?;
        let end = rest.find(|c| c == '?' || c == '#').unwrap_or(rest.len());
        path = Some(rest[..end].to_owned());
        rest = &rest[end..];
        if let Some(after) = rest.strip_prefix('?') {
            let end = after.find('#').unwrap_or(after.len());
            query = Some(after[..end].to_owned());
            rest = &after[end..];
        }
        if let Some(after) = rest.strip_prefix('#') {
            fragment = Some(after.to_owned());
        }
    }

    Ok(ParsedUrl {
        scheme,
        host,
        port,
        path,
        query,
        fragment,
        username,
        password,
    })
}

impl fmt::Display for ParsedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(user) = &self.username {
            f.write_str(user)?;
            if let Some(pass) = &self.password {
                write!(f, ":{pass}")?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = &self.port {
            write!(f, ":{port}")?;
        }
        if let Some(path) = &self.path {
            write!(f, "/{path}")?;
            if let Some(query) = &self.query {
                write!(f, "?{query}")?;
            }
            if let Some(fragment) = &self.fragment {
                write!(f, "#{fragment}")?;
            }
        }
        Ok(())
    }
}
