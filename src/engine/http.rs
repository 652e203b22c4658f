//! HTTP GET/POST throughput measurement engines.
//!
//! Both engines speak the minimum of HTTP/1.1 a throughput probe needs: one
//! request, `Connection: close`, body terminated by connection close.
//! Chunked or compressed transfer is out of scope.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::microtime;
use crate::error::{Error, Result};
use crate::header::parse_header;
use crate::model::{
    HttpGetItem, HttpGetProgress, HttpGetResult, HttpPostItem, HttpPostProgress, HttpPostResult,
};
use crate::net::{connect_stream, Family};
use crate::url::{parse_url, ParsedUrl};

/// Receive timeout applied to the measurement stream.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
/// Response header read granularity.
const HEADER_CHUNK: usize = 4096;
/// Body streaming buffer.
const BODY_CHUNK: usize = 65536;
/// Trace buffers grow in units of this many items.
const ITEMS_RESERVE_UNIT: usize = 4096;
/// User agent rendered into every request.
const USER_AGENT: &str = "NetBench/0.1";
/// Synthesized upload body type.
const CONTENT_TYPE: &str = "application/octet-stream";
/// Longest uri/host rendered into a request head.
const FIELD_CLAMP: usize = 1024;
/// Longest measurement id rendered into a request head.
const MID_CLAMP: usize = 100;

pub type HttpGetCallback = Box<dyn FnMut(&HttpGetProgress) + Send>;
pub type HttpPostCallback = Box<dyn FnMut(&HttpPostProgress) + Send>;

/// HTTP GET (download) measurement engine.
pub struct HttpGet {
    mid: String,
    cbfreq: f64,
    callback: Option<HttpGetCallback>,
    cancel: Arc<AtomicBool>,
    last_result: Option<HttpGetResult>,
}

impl HttpGet {
    /// `measurement_id` is echoed to the server in `X-Measurement-Id` so
    /// client traces can be correlated with server logs.
    pub fn new(measurement_id: &str) -> Self {
        Self {
            mid: measurement_id.to_owned(),
            cbfreq: 0.0,
            callback: None,
            cancel: Arc::new(AtomicBool::new(false)),
            last_result: None,
        }
    }

    /// Install the progress callback, invoked at most once per `cbfreq`
    /// seconds while the body streams.
    pub fn set_callback<F>(&mut self, callback: F, cbfreq: f64)
    where
        F: FnMut(&HttpGetProgress) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self.cbfreq = cbfreq;
    }

    /// Cooperative cancellation flag, observed once per receive.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Result of the most recent successful run.
    pub fn last_result(&self) -> Option<&HttpGetResult> {
        self.last_result.as_ref()
    }

    /// Download `url` for at most `duration` seconds, recording one trace
    /// item per receive.
    pub fn exec(&mut self, url: &str, family: Family, duration: f64) -> Result<()> {
        let purl = parse_url(url)?;
        let mut stream = open_measurement_stream(&purl, family)?;
        self.cancel.store(false, Ordering::Relaxed);

        let uri = request_uri(&purl);
        let req = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nX-Measurement-Id: {}\r\nConnection: close\r\n\r\n",
            clamp(&uri, FIELD_CLAMP),
            clamp(&purl.host, FIELD_CLAMP),
            USER_AGENT,
            clamp(&self.mid, MID_CLAMP),
        );

        let mut items = Vec::with_capacity(ITEMS_RESERVE_UNIT);
        let mut tx: u64 = 0;
        let mut rx: u64 = 0;

        let t0 = microtime();
        items.push(HttpGetItem { tm: t0, tx, rx });

        let nw = stream.write(req.as_bytes())?;
        if nw != req.len() {
            return Err(Error::ShortWrite {
                written: nw,
                expected: req.len(),
            });
        }
        tx += nw as u64;

        let (header_bytes, header_len, body_prefix) = read_response_header(&mut stream)?;
        let t1 = microtime();
        rx += (header_len + body_prefix.len()) as u64;

        let header = parse_header(&header_bytes)?;
        let content_len = header.content_length();
        debug!(header_len, content_len, "response header received");

        items.push(HttpGetItem { tm: t1, tx, rx });
        let mut progress = HttpGetProgress {
            header_len,
            content_len,
            started: t0,
            now: t1,
            tx,
            rx,
        };
        if let Some(cb) = self.callback.as_mut() {
            cb(&progress);
        }

        // Stream the body, one trace item per receive.
        let mut chunk = [0u8; BODY_CHUNK];
        let mut prevtm = t1;
        let mut curtm = t1;
        while !self.cancel.load(Ordering::Relaxed) {
            let n = match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            curtm = microtime();
            rx += n as u64;

            push_item(&mut items, HttpGetItem { tm: curtm, tx, rx });

            progress.now = curtm;
            progress.rx = rx;
            if curtm - prevtm >= self.cbfreq {
                if let Some(cb) = self.callback.as_mut() {
                    cb(&progress);
                }
                prevtm = curtm;
            }
            if curtm - t0 > duration {
                break;
            }
        }
        if curtm > prevtm {
            if let Some(cb) = self.callback.as_mut() {
                cb(&progress);
            }
        }

        stream.shutdown(Shutdown::Both).ok();
        self.last_result = Some(HttpGetResult {
            header_len,
            content_len,
            items,
        });
        Ok(())
    }
}

/// HTTP POST (upload) measurement engine.
///
/// The upload body is synthesized, not supplied: byte `i` of the body is
/// `i % 0xff`.
pub struct HttpPost {
    mid: String,
    cbfreq: f64,
    callback: Option<HttpPostCallback>,
    cancel: Arc<AtomicBool>,
    last_result: Option<HttpPostResult>,
}

impl HttpPost {
    pub fn new(measurement_id: &str) -> Self {
        Self {
            mid: measurement_id.to_owned(),
            cbfreq: 0.0,
            callback: None,
            cancel: Arc::new(AtomicBool::new(false)),
            last_result: None,
        }
    }

    /// Install the progress callback, invoked at most once per `cbfreq`
    /// seconds while the body streams.
    pub fn set_callback<F>(&mut self, callback: F, cbfreq: f64)
    where
        F: FnMut(&HttpPostProgress) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self.cbfreq = cbfreq;
    }

    /// Cooperative cancellation flag, observed once per write.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Result of the most recent successful run.
    pub fn last_result(&self) -> Option<&HttpPostResult> {
        self.last_result.as_ref()
    }

    /// Upload `size` synthesized bytes to `url` within `duration` seconds,
    /// then read back the server's response.
    ///
    /// A connection closed mid-upload ends the run as a partial success
    /// with the trace recorded so far; a write error fails it.
    pub fn exec(&mut self, url: &str, family: Family, size: usize, duration: f64) -> Result<()> {
        let purl = parse_url(url)?;
        let mut stream = open_measurement_stream(&purl, family)?;
        self.cancel.store(false, Ordering::Relaxed);

        let uri = request_uri(&purl);
        let req = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nX-Measurement-Id: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            clamp(&uri, FIELD_CLAMP),
            clamp(&purl.host, FIELD_CLAMP),
            USER_AGENT,
            clamp(&self.mid, MID_CLAMP),
            CONTENT_TYPE,
            size,
        );

        let mut items = Vec::with_capacity(ITEMS_RESERVE_UNIT);
        let mut tx: u64 = 0;
        let mut buffered_tx: u64 = 0;
        let mut rx: u64 = 0;

        let t0 = microtime();
        items.push(HttpPostItem {
            tm: t0,
            tx,
            rx,
            buffered_tx,
        });

        let nw = stream.write(req.as_bytes())?;
        if nw != req.len() {
            return Err(Error::ShortWrite {
                written: nw,
                expected: req.len(),
            });
        }
        buffered_tx += nw as u64;
        tx += nw as u64;

        let mut progress = HttpPostProgress {
            header_len: 0,
            content_len: -1,
            started: t0,
            now: t0,
            buffered_tx,
            tx,
            rx,
        };

        // Stream the synthesized body. `buffered_tx` advances as each write
        // returns; `tx` trails by the write in flight and catches up when
        // the upload ends.
        let mut sent_body = 0usize;
        let mut prevtm = t0;
        while sent_body < size && !self.cancel.load(Ordering::Relaxed) {
            let now = microtime();
            if now - t0 > duration {
                break;
            }
            let chunk_len = (size - sent_body).min(BODY_CHUNK);
            let chunk = body_chunk(sent_body, chunk_len);
            tx = buffered_tx;
            let n = match stream.write(&chunk) {
                Ok(0) => {
                    debug!(sent_body, size, "upload cut short, keeping partial trace");
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Socket(e)),
            };
            sent_body += n;
            buffered_tx += n as u64;

            let now = microtime();
            push_item(
                &mut items,
                HttpPostItem {
                    tm: now,
                    tx,
                    rx,
                    buffered_tx,
                },
            );
            progress.now = now;
            progress.buffered_tx = buffered_tx;
            progress.tx = tx;
            if now - prevtm >= self.cbfreq {
                if let Some(cb) = self.callback.as_mut() {
                    cb(&progress);
                }
                prevtm = now;
            }
        }
        // Every issued write has returned by now.
        tx = buffered_tx;

        let (header_bytes, header_len, body_prefix) = read_response_header(&mut stream)?;
        let t1 = microtime();
        rx += (header_len + body_prefix.len()) as u64;

        let header = parse_header(&header_bytes)?;
        let content_len = header.content_length();
        debug!(header_len, content_len, "response header received");

        push_item(
            &mut items,
            HttpPostItem {
                tm: t1,
                tx,
                rx,
                buffered_tx,
            },
        );
        progress.header_len = header_len;
        progress.content_len = content_len;
        progress.now = t1;
        progress.buffered_tx = buffered_tx;
        progress.tx = tx;
        progress.rx = rx;
        if let Some(cb) = self.callback.as_mut() {
            cb(&progress);
        }

        // Drain the response body to EOF.
        let mut chunk = [0u8; BODY_CHUNK];
        let mut prevtm = t1;
        let mut curtm = t1;
        while !self.cancel.load(Ordering::Relaxed) {
            let n = match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            curtm = microtime();
            rx += n as u64;
            push_item(
                &mut items,
                HttpPostItem {
                    tm: curtm,
                    tx,
                    rx,
                    buffered_tx,
                },
            );
            progress.now = curtm;
            progress.rx = rx;
            if curtm - prevtm >= self.cbfreq {
                if let Some(cb) = self.callback.as_mut() {
                    cb(&progress);
                }
                prevtm = curtm;
            }
            if curtm - t0 > duration {
                break;
            }
        }
        if curtm > prevtm {
            if let Some(cb) = self.callback.as_mut() {
                cb(&progress);
            }
        }

        stream.shutdown(Shutdown::Both).ok();
        self.last_result = Some(HttpPostResult {
            header_len,
            content_len,
            items,
        });
        Ok(())
    }
}

/// Validate the scheme, pick the port and connect with the measurement
/// receive timeout applied.
fn open_measurement_stream(purl: &ParsedUrl, family: Family) -> Result<TcpStream> {
    if !purl.scheme.eq_ignore_ascii_case("http") {
        return Err(Error::UnsupportedScheme(purl.scheme.clone()));
    }
    let port = match purl.port.as_deref() {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| Error::Resolve(format!("{}:{}", purl.host, p)))?,
        None => 80,
    };
    connect_stream(&purl.host, port, family, SOCKET_TIMEOUT)
}

/// `"/" + path + "?" + query`; an absent path yields `"/"`.
fn request_uri(purl: &ParsedUrl) -> String {
    let path = purl.path.as_deref().unwrap_or("");
    match purl.query.as_deref() {
        Some(query) => format!("/{path}?{query}"),
        None => format!("/{path}"),
    }
}

/// Clamp a request field to `max` bytes without splitting a character.
fn clamp(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Synthesized upload payload: byte `i` of the body is `i % 0xff`.
fn body_chunk(offset: usize, len: usize) -> Vec<u8> {
    (offset..offset + len).map(|i| (i % 0xff) as u8).collect()
}

/// Append a trace item, growing the buffer in [`ITEMS_RESERVE_UNIT`] steps.
/// When the growth allocation fails the item is dropped and measurement
/// continues.
fn push_item<T>(items: &mut Vec<T>, item: T) {
    if items.len() == items.capacity() && items.try_reserve(ITEMS_RESERVE_UNIT).is_err() {
        return;
    }
    items.push(item);
}

/// Scan for the end-of-header sentinel (CR?LF CR?LF).
///
/// Returns `(header_len, body_start)`: `header_len` excludes the sentinel's
/// final LF and `body_start` sits just past it.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut nl = 0;
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            nl += 1;
        } else if buf[i] == b'\r' && i + 1 < buf.len() && buf[i + 1] == b'\n' {
            i += 1;
            nl += 1;
        } else {
            nl = 0;
        }
        if nl == 2 {
            return Some((i, i + 1));
        }
        i += 1;
    }
    None
}

/// Read until the end-of-header sentinel. Returns the raw header bytes
/// (sentinel included), the accounted header length, and any body bytes
/// read past the boundary.
fn read_response_header(stream: &mut TcpStream) -> Result<(Vec<u8>, usize, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; HEADER_CHUNK];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => return Err(Error::Timeout),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // Any other failed read here means the header never completed.
            Err(_) => return Err(Error::Timeout),
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some((header_len, body_start)) = find_header_end(&buf) {
            let body = buf.split_off(body_start);
            return Ok((buf, header_len, body));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn request_uri_forms() {
        let mut purl = parse_url("http://example.com").unwrap();
        assert_eq!(request_uri(&purl), "/");

        purl = parse_url("http://example.com/a/b?x=1#f").unwrap();
        assert_eq!(request_uri(&purl), "/a/b?x=1");

        purl = parse_url("http://example.com/").unwrap();
        assert_eq!(request_uri(&purl), "/");
    }

    #[test]
    fn clamp_respects_char_boundaries() {
        assert_eq!(clamp("abcdef", 4), "abcd");
        assert_eq!(clamp("abc", 4), "abc");
        // 'é' is two bytes; clamping inside it backs off.
        assert_eq!(clamp("aé", 2), "a");
    }

    #[test]
    fn header_end_excludes_the_final_lf() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nABCDEFGHIJ";
        assert_eq!(find_header_end(buf), Some((38, 39)));
        assert_eq!(&buf[39..], b"ABCDEFGHIJ");

        // LF-only endings collapse the sentinel.
        assert_eq!(find_header_end(b"a\n\nbody"), Some((2, 3)));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\npartial"), None);
    }

    #[test]
    fn body_chunk_pattern() {
        let chunk = body_chunk(250, 10);
        for (j, &b) in chunk.iter().enumerate() {
            assert_eq!(b, ((250 + j) % 0xff) as u8);
        }
    }

    fn serve_once(response: &'static [u8]) -> (u16, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if find_header_end(&request).is_some() {
                    break;
                }
            }
            stream.write_all(response).unwrap();
            stream.shutdown(Shutdown::Both).ok();
            request
        });
        (port, handle)
    }

    #[test]
    fn get_measures_a_fixed_response() -> anyhow::Result<()> {
        let (port, server) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nABCDEFGHIJ");

        let mut engine = HttpGet::new("TESTID");
        let url = format!("http://127.0.0.1:{port}/file?x=1");
        engine.exec(&url, Family::V4, 5.0).context("download failed")?;

        let result = engine.last_result().context("no result retained")?;
        assert_eq!(result.header_len, 38);
        assert_eq!(result.content_len, 10);
        assert_eq!(result.items[0].tx, 0);
        assert_eq!(result.items[0].rx, 0);
        assert_eq!(result.items.last().unwrap().rx, 48);
        for pair in result.items.windows(2) {
            assert!(pair[1].tm >= pair[0].tm);
            assert!(pair[1].tx >= pair[0].tx);
            assert!(pair[1].rx >= pair[0].rx);
        }

        let request = String::from_utf8(server.join().unwrap())?;
        assert!(request.starts_with("GET /file?x=1 HTTP/1.1\r\n"));
        assert!(request.contains("\r\nHost: 127.0.0.1\r\n"));
        assert!(request.contains("\r\nUser-Agent: NetBench/0.1\r\n"));
        assert!(request.contains("\r\nX-Measurement-Id: TESTID\r\n"));
        assert!(request.contains("\r\nConnection: close\r\n"));
        Ok(())
    }

    #[test]
    fn get_reports_progress_through_the_callback() {
        let (port, server) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc");

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut engine = HttpGet::new("TESTID");
        engine.set_callback(
            move |p: &HttpGetProgress| {
                sink.lock().unwrap().push(*p);
            },
            0.0,
        );
        engine
            .exec(&format!("http://127.0.0.1:{port}/"), Family::V4, 5.0)
            .unwrap();
        server.join().unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| p.header_len == 37 && p.content_len == 3));
        assert!(seen[0].rx >= 37);
        assert!(seen.windows(2).all(|w| w[1].now >= w[0].now));
    }

    #[test]
    fn get_rejects_non_http_schemes() {
        let mut engine = HttpGet::new("TESTID");
        let err = engine
            .exec("https://example.com/", Family::Any, 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme(_)));
        assert!(engine.last_result().is_none());
    }

    #[test]
    fn get_treats_early_close_as_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            // Swallow the request head, then close without responding.
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
        });

        let mut engine = HttpGet::new("TESTID");
        let err = engine
            .exec(&format!("http://127.0.0.1:{port}/"), Family::V4, 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(engine.last_result().is_none());
        server.join().unwrap();
    }

    #[test]
    fn post_streams_the_patterned_body() -> anyhow::Result<()> {
        const UPLOAD: usize = 1024;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if let Some((_, body_start)) = find_header_end(&request) {
                    if request.len() - body_start >= UPLOAD {
                        break;
                    }
                }
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .unwrap();
            stream.shutdown(Shutdown::Both).ok();
            request
        });

        let mut engine = HttpPost::new("TESTID");
        let url = format!("http://127.0.0.1:{port}/upload");
        engine.exec(&url, Family::V4, UPLOAD, 5.0).context("upload failed")?;

        let request = server.join().unwrap();
        let (_, body_start) = find_header_end(&request).context("request head incomplete")?;
        let head = String::from_utf8_lossy(&request[..body_start]);
        assert!(head.starts_with("POST /upload HTTP/1.1\r\n"));
        assert!(head.contains("\r\nContent-Type: application/octet-stream\r\n"));
        assert!(head.contains(&format!("\r\nContent-Length: {UPLOAD}\r\n")));

        let body = &request[body_start..];
        assert_eq!(body.len(), UPLOAD);
        assert!(body.iter().enumerate().all(|(i, &b)| b == (i % 0xff) as u8));

        let result = engine.last_result().context("no result retained")?;
        assert_eq!(result.content_len, 2);
        let last = result.items.last().context("empty trace")?;
        assert_eq!(last.buffered_tx, request.len() as u64);
        assert_eq!(last.tx, last.buffered_tx);
        assert_eq!(last.rx, result.header_len as u64 + 2);
        for pair in result.items.windows(2) {
            assert!(pair[1].tm >= pair[0].tm);
            assert!(pair[1].tx >= pair[0].tx);
            assert!(pair[1].buffered_tx >= pair[0].buffered_tx);
            assert!(pair[1].buffered_tx >= pair[1].tx);
        }
        Ok(())
    }
}
