//! Memcached text protocol
//!
//! Requests are single lines; storage requests carry a data block:
//!
//! ```text
//! set <key> <flags> <exptime> <bytes>\r\n<data>\r\n  -> STORED
//! get <key>\r\n      -> VALUE <key> <flags> <bytes>\r\n<data>\r\n END
//! delete <key>\r\n   -> DELETED | NOT_FOUND
//! touch <key> <t>\r\n -> TOUCHED | NOT_FOUND
//! stats\r\n          -> STAT <name> <value> ... END
//! ```

use std::io::BufRead;

use kvbridge_core::{Error, Result};

use crate::backends::net::{closed_by_server, Reply, Wire};

/// Longest key the server accepts.
pub const MAX_KEY_LENGTH: usize = 250;

/// Reject keys the text protocol cannot carry.
pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(Error::invalid_argument(format!(
            "memcached keys must be 1 to {} bytes long",
            MAX_KEY_LENGTH
        )));
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::invalid_argument(format!(
            "memcached key '{}' contains whitespace or control characters",
            key
        )));
    }
    Ok(())
}

/// Largest data block accepted in a `VALUE` reply.
pub const MAX_VALUE_LEN: usize = 512 * 1024 * 1024;

/// Largest exptime the server reads as relative seconds; bigger values are
/// absolute unix times.
pub const MAX_RELATIVE_EXPTIME: i64 = 60 * 60 * 24 * 30;

/// The exptime that makes an item expire `ttl` seconds after `now`.
pub fn exptime_for(ttl: i64, now: i64) -> i64 {
    if ttl > MAX_RELATIVE_EXPTIME {
        now.saturating_add(ttl)
    } else {
        ttl
    }
}

/// Seconds left for an item stored with `exptime`, `0` meaning never.
pub fn ttl_of(exptime: i64, now: i64) -> i64 {
    if exptime > MAX_RELATIVE_EXPTIME {
        (exptime - now).max(0)
    } else {
        exptime
    }
}

/// One reply line without its CRLF; server error lines are the inner error.
pub fn read_line<R: BufRead>(src: &mut R) -> Reply<String> {
    let line = read_raw_line(src)?;
    Ok(check_error(&line).map(|_| line))
}

fn read_raw_line<R: BufRead>(src: &mut R) -> Result<String> {
    let mut line = String::new();
    let n = src.read_line(&mut line)?;
    if n == 0 {
        return Err(closed_by_server());
    }
    if !line.ends_with("\r\n") {
        return Err(protocol("reply line not terminated by CRLF"));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

/// Map `ERROR`, `CLIENT_ERROR` and `SERVER_ERROR` lines to errors.
fn check_error(line: &str) -> Result<()> {
    if line == "ERROR" || line.starts_with("ERROR ") {
        return Err(Error::native("server does not know this command"));
    }
    if line.starts_with("CLIENT_ERROR") || line.starts_with("SERVER_ERROR") {
        return Err(Error::native(line.to_string()));
    }
    Ok(())
}

fn protocol(message: &str) -> Error {
    Error::native(format!("protocol error: {}", message))
}

/// Lines up to (not including) the terminating `END`.
pub fn read_until_end<R: BufRead>(src: &mut R) -> Reply<Vec<String>> {
    let mut lines = Vec::new();
    loop {
        let line = match read_line(src)? {
            Ok(line) => line,
            Err(e) => return Ok(Err(e)),
        };
        if line == "END" {
            return Ok(Ok(lines));
        }
        lines.push(line);
    }
}

/// Parse a `get` reply: zero or one `VALUE` block followed by `END`.
pub fn read_value<R: BufRead>(src: &mut R) -> Reply<Option<String>> {
    let header = match read_line(src)? {
        Ok(header) => header,
        Err(e) => return Ok(Err(e)),
    };
    if header == "END" {
        return Ok(Ok(None));
    }
    let mut parts = header.split(' ');
    if parts.next() != Some("VALUE") {
        return Err(protocol(&format!("unexpected reply: {}", header)));
    }
    let len = parts
        .nth(2)
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| protocol(&format!("malformed VALUE line: {}", header)))?;
    if len > MAX_VALUE_LEN {
        return Err(protocol(&format!("value length {} over limit", len)));
    }
    let total = len
        .checked_add(2)
        .ok_or_else(|| protocol("value length overflow"))?;
    let mut data = vec![0u8; total];
    src.read_exact(&mut data)?;
    if &data[len..] != b"\r\n" {
        return Err(protocol("data block not terminated by CRLF"));
    }
    data.truncate(len);
    let end = read_raw_line(src)?;
    if end != "END" {
        return Err(protocol(&format!("expected END, got {}", end)));
    }
    Ok(Ok(Some(String::from_utf8_lossy(&data).into_owned())))
}

/// `STAT name value` lines to pairs.
pub fn parse_stats(lines: &[String]) -> Vec<(String, String)> {
    lines
        .iter()
        .filter_map(|line| {
            let rest = line.strip_prefix("STAT ")?;
            let (name, value) = rest.split_once(' ')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// One `lru_crawler metadump` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpEntry {
    /// Decoded key
    pub key: String,
    /// Absolute unix expiry, `-1` for none
    pub exp: i64,
}

/// Parse `key=<urlencoded> exp=<ts> la=... ...` lines.
pub fn parse_metadump(lines: &[String]) -> Vec<DumpEntry> {
    lines
        .iter()
        .filter_map(|line| {
            let mut key = None;
            let mut exp = -1;
            for field in line.split(' ') {
                if let Some(k) = field.strip_prefix("key=") {
                    key = Some(percent_decode(k));
                } else if let Some(e) = field.strip_prefix("exp=") {
                    exp = e.parse().unwrap_or(-1);
                }
            }
            key.map(|key| DumpEntry { key, exp })
        })
        .collect()
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Request/response helpers over an open socket.
impl Wire {
    /// Send a request line and read the one-line reply.
    pub(crate) fn request(&mut self, line: &str) -> Result<String> {
        self.send(format!("{}\r\n", line).as_bytes())?;
        let reply = read_line(&mut self.reader);
        self.track(reply)
    }

    /// Send a storage request with its data block.
    pub(crate) fn store(&mut self, verb: &str, key: &str, flags: u32, exptime: i64, data: &str) -> Result<String> {
        check_key(key)?;
        let request = format!(
            "{} {} {} {} {}\r\n{}\r\n",
            verb,
            key,
            flags,
            exptime,
            data.len(),
            data
        );
        self.send(request.as_bytes())?;
        let reply = read_line(&mut self.reader);
        self.track(reply)
    }

    /// `get` one key.
    pub(crate) fn fetch(&mut self, key: &str) -> Result<Option<String>> {
        check_key(key)?;
        self.send(format!("get {}\r\n", key).as_bytes())?;
        let reply = read_value(&mut self.reader);
        self.track(reply)
    }

    /// Send a request whose reply ends with `END`.
    pub(crate) fn listing(&mut self, line: &str) -> Result<Vec<String>> {
        self.send(format!("{}\r\n", line).as_bytes())?;
        let reply = read_until_end(&mut self.reader);
        self.track(reply)
    }
}
