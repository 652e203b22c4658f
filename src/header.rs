//! HTTP/1.x header tokenizer and parser.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A parsed start line plus its attribute list.
///
/// For a response the same three fields hold `version`, `status` and
/// `reason` in that order; the tokenizer does not care which it is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub method: String,
    pub uri: String,
    pub version: String,
    /// Attribute fields in insertion order. Keys compare case-insensitively.
    pub attrs: Vec<(String, String)>,
}

impl HttpHeader {
    /// Case-insensitive attribute lookup, first match wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// `Content-Length` as a signed byte count.
    ///
    /// A missing attribute, a negative value or trailing garbage all yield
    /// `-1`.
    pub fn content_length(&self) -> i64 {
        match self.get("Content-Length") {
            Some(v) => v.parse::<i64>().ok().filter(|&n| n >= 0).unwrap_or(-1),
            None => -1,
        }
    }
}

/// Parse a request or response header, start line through the blank-line
/// terminator. The buffer may extend past the header; trailing bytes are
/// ignored.
pub fn parse_header(buf: &[u8]) -> Result<HttpHeader> {
    let (method, rest) = eat_by_space(buf);
    let (uri, rest) = eat_by_space(rest);
    let (version, rest) = eat_by_newline(rest);
    let attrs = parse_attrs(rest)?;
    Ok(HttpHeader {
        method,
        uri,
        version,
        attrs,
    })
}

fn is_ctl(c: u8) -> bool {
    c < 32 || c >= 127
}

fn lossy(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf).into_owned()
}

/// Take a token terminated by a single space; CR, LF and NUL also end it.
fn eat_by_space(buf: &[u8]) -> (String, &[u8]) {
    let mut pos = 0;
    let mut sep = 0;
    while pos < buf.len() {
        match buf[pos] {
            b' ' => {
                sep = 1;
                break;
            }
            b'\r' | b'\n' | 0 => break,
            _ => pos += 1,
        }
    }
    (lossy(&buf[..pos]), &buf[pos + sep..])
}

/// Take a token terminated by LF or CRLF; NUL also ends it.
fn eat_by_newline(buf: &[u8]) -> (String, &[u8]) {
    let mut pos = 0;
    let mut sep = 0;
    while pos < buf.len() {
        if buf[pos] == b'\n' {
            sep = 1;
            break;
        }
        if buf[pos] == b'\r' && pos + 1 < buf.len() && buf[pos + 1] == b'\n' {
            sep = 2;
            break;
        }
        if buf[pos] == 0 {
            break;
        }
        pos += 1;
    }
    (lossy(&buf[..pos]), &buf[pos + sep..])
}

/// Like [`eat_by_newline`] but a NUL in an attribute value is a parse error.
fn eat_value_line(buf: &[u8]) -> Result<(String, &[u8])> {
    let mut pos = 0;
    let mut sep = 0;
    while pos < buf.len() {
        if buf[pos] == b'\n' {
            sep = 1;
            break;
        }
        if buf[pos] == b'\r' && pos + 1 < buf.len() && buf[pos + 1] == b'\n' {
            sep = 2;
            break;
        }
        if buf[pos] == 0 {
            return Err(Error::MalformedHeader);
        }
        pos += 1;
    }
    Ok((lossy(&buf[..pos]), &buf[pos + sep..]))
}

fn parse_attrs(mut buf: &[u8]) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    while !buf.is_empty() {
        // A blank line ends the header.
        if buf[0] == b'\n' {
            break;
        }
        if buf[0] == b'\r' && buf.len() > 1 && buf[1] == b'\n' {
            break;
        }

        // Key runs to ':'; control bytes are not allowed in keys.
        let mut pos = 0;
        let mut sep = 0;
        while pos < buf.len() {
            if buf[pos] == b':' {
                sep = 1;
                break;
            }
            if is_ctl(buf[pos]) {
                return Err(Error::MalformedHeader);
            }
            pos += 1;
        }
        let key = lossy(&buf[..pos]).trim_end_matches(' ').to_owned();
        buf = &buf[pos + sep..];

        while buf.first() == Some(&b' ') {
            buf = &buf[1..];
        }

        // Value, with folded continuation lines joined by a single space.
        let mut value = String::new();
        loop {
            let (segment, rest) = eat_value_line(buf)?;
            if value.is_empty() {
                value = segment;
            } else {
                value.push(' ');
                value.push_str(&segment);
            }
            buf = rest;
            match buf.first() {
                Some(&b' ') | Some(&b'\t') => buf = &buf[1..],
                _ => break,
            }
        }
        attrs.push((key, value));
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize(hdr: &HttpHeader) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", hdr.method, hdr.uri, hdr.version);
        for (k, v) in &hdr.attrs {
            out.push_str(&format!("{k}: {v}\r\n"));
        }
        out.push_str("\r\n");
        out.into_bytes()
    }

    #[test]
    fn request_with_folded_continuation() {
        let hdr = parse_header(
            b"GET / HTTP/1.1\r\nHost: a\r\n X-Cont: b\r\nContent-Length: 5\r\n\r\n",
        )
        .unwrap();
        assert_eq!(hdr.method, "GET");
        assert_eq!(hdr.uri, "/");
        assert_eq!(hdr.version, "HTTP/1.1");
        assert_eq!(
            hdr.attrs,
            vec![
                ("Host".to_owned(), "a X-Cont: b".to_owned()),
                ("Content-Length".to_owned(), "5".to_owned()),
            ]
        );
    }

    #[test]
    fn response_start_line_uses_the_same_fields() {
        let hdr = parse_header(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n").unwrap();
        assert_eq!(hdr.method, "HTTP/1.1");
        assert_eq!(hdr.uri, "200");
        assert_eq!(hdr.version, "OK");
        assert_eq!(hdr.content_length(), 10);
    }

    #[test]
    fn lf_only_line_endings_are_accepted() {
        let hdr = parse_header(b"GET / HTTP/1.1\nHost: a\n\n").unwrap();
        assert_eq!(hdr.get("host"), Some("a"));
    }

    #[test]
    fn content_length_edge_cases() {
        let hdr = parse_header(b"GET / HTTP/1.1\r\nFoo: 1\r\nContent-Length: 123\r\n\r\n").unwrap();
        assert_eq!(hdr.content_length(), 123);

        let hdr = parse_header(b"GET / HTTP/1.1\r\nContent-Length: -1\r\n\r\n").unwrap();
        assert_eq!(hdr.content_length(), -1);

        let hdr = parse_header(b"GET / HTTP/1.1\r\nContent-Length: 1x\r\n\r\n").unwrap();
        assert_eq!(hdr.content_length(), -1);

        let hdr = parse_header(b"GET / HTTP/1.1\r\ncontent-length: 7\r\n\r\n").unwrap();
        assert_eq!(hdr.content_length(), 7);

        let hdr = parse_header(b"GET / HTTP/1.1\r\nFoo: 1\r\n\r\n").unwrap();
        assert_eq!(hdr.content_length(), -1);
    }

    #[test]
    fn trailing_spaces_in_keys_are_trimmed() {
        let hdr = parse_header(b"GET / HTTP/1.1\r\nHost  : a\r\n\r\n").unwrap();
        assert_eq!(hdr.attrs[0].0, "Host");
        assert_eq!(hdr.get("Host"), Some("a"));
    }

    #[test]
    fn control_bytes_in_keys_fail() {
        assert!(parse_header(b"GET / HTTP/1.1\r\nBad\x01Key: a\r\n\r\n").is_err());
    }

    #[test]
    fn reparse_of_serialized_form_is_stable() {
        let input: &[u8] =
            b"GET /x HTTP/1.1\r\nHost: a\r\n cont\r\nAccept: */*\r\nContent-Length: 5\r\n\r\n";
        let once = parse_header(input).unwrap();
        let twice = parse_header(&serialize(&once)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_attribute_value() {
        let hdr = parse_header(b"GET / HTTP/1.1\r\nEmpty:\r\nNext: v\r\n\r\n").unwrap();
        assert_eq!(hdr.get("Empty"), Some(""));
        assert_eq!(hdr.get("Next"), Some("v"));
    }
}
