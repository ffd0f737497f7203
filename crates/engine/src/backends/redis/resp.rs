//! RESP2 frames
//!
//! ```text
//! +OK\r\n                     simple string
//! -ERR message\r\n            error
//! :42\r\n                     integer
//! $5\r\nhello\r\n             bulk string ($-1 is nil)
//! *2\r\n$1\r\na\r\n:1\r\n     array (*-1 is nil)
//! ```
//!
//! Commands go out as arrays of bulk strings.

use std::io::BufRead;

use kvbridge_core::{Error, NValue, Result};

use crate::backends::net::closed_by_server;

/// Nesting guard for hostile replies.
const MAX_DEPTH: usize = 64;

/// Largest bulk string accepted, the server's default `proto-max-bulk-len`.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// One decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `+`
    Simple(String),
    /// `-`
    Error(String),
    /// `:`
    Integer(i64),
    /// `$`, `None` for nil
    Bulk(Option<Vec<u8>>),
    /// `*`, `None` for nil
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Convert to a reply value; `-ERR` frames become errors.
    pub fn into_value(self) -> Result<NValue> {
        match self {
            Frame::Simple(s) => Ok(NValue::String(s)),
            Frame::Error(message) => Err(Error::native(message)),
            Frame::Integer(i) => Ok(NValue::Integer(i)),
            Frame::Bulk(None) | Frame::Array(None) => Ok(NValue::Null),
            Frame::Bulk(Some(bytes)) => Ok(NValue::String(String::from_utf8_lossy(&bytes).into_owned())),
            Frame::Array(Some(items)) => items
                .into_iter()
                .map(Frame::into_value)
                .collect::<Result<Vec<_>>>()
                .map(NValue::Array),
        }
    }
}

/// Encode a command as an array of bulk strings.
pub fn encode_command<S: AsRef<str>>(args: &[S]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        let arg = arg.as_ref().as_bytes();
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read one complete frame.
///
/// Errors mean the frame could not be read whole; an `-ERR` reply is
/// returned as [`Frame::Error`].
pub fn read_frame<R: BufRead>(src: &mut R) -> Result<Frame> {
    read_nested(src, 0)
}

fn read_nested<R: BufRead>(src: &mut R, depth: usize) -> Result<Frame> {
    if depth > MAX_DEPTH {
        return Err(protocol("reply nested too deeply"));
    }
    let line = read_line(src)?;
    let (tag, rest) = line
        .split_first()
        .ok_or_else(|| protocol("empty reply line"))?;
    let rest = std::str::from_utf8(rest).map_err(|_| protocol("reply header is not UTF-8"))?;

    match tag {
        b'+' => Ok(Frame::Simple(rest.to_string())),
        b'-' => Ok(Frame::Error(rest.to_string())),
        b':' => Ok(Frame::Integer(parse_int(rest)?)),
        b'$' => {
            let len = parse_int(rest)?;
            if len < 0 {
                return Ok(Frame::Bulk(None));
            }
            let len = usize::try_from(len)
                .ok()
                .filter(|len| *len <= MAX_BULK_LEN)
                .ok_or_else(|| protocol(&format!("bulk length {} over limit", len)))?;
            let total = len
                .checked_add(2)
                .ok_or_else(|| protocol("bulk length overflow"))?;
            let mut data = vec![0u8; total];
            src.read_exact(&mut data)?;
            if &data[len..] != b"\r\n" {
                return Err(protocol("bulk string not terminated by CRLF"));
            }
            data.truncate(len);
            Ok(Frame::Bulk(Some(data)))
        }
        b'*' => {
            let len = parse_int(rest)?;
            if len < 0 {
                return Ok(Frame::Array(None));
            }
            let mut items = Vec::with_capacity(usize::try_from(len.min(1024)).unwrap_or(0));
            for _ in 0..len {
                items.push(read_nested(src, depth + 1)?);
            }
            Ok(Frame::Array(Some(items)))
        }
        other => Err(protocol(&format!("unknown reply type byte 0x{:02x}", other))),
    }
}

/// A line without its CRLF terminator.
fn read_line<R: BufRead>(src: &mut R) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let n = src.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(closed_by_server());
    }
    if !line.ends_with(b"\r\n") {
        return Err(protocol("reply line not terminated by CRLF"));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_int(text: &str) -> Result<i64> {
    text.parse()
        .map_err(|_| protocol(&format!("invalid integer '{}'", text)))
}

fn protocol(message: &str) -> Error {
    Error::native(format!("protocol error: {}", message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(bytes: &[u8]) -> Result<Frame> {
        read_frame(&mut Cursor::new(bytes))
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(
            encode_command(&["SET", "k", "hello world"]),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$11\r\nhello world\r\n".to_vec()
        );
    }

    #[test]
    fn test_scalar_frames() {
        assert_eq!(parse(b"+OK\r\n").unwrap(), Frame::Simple("OK".into()));
        assert_eq!(parse(b":-3\r\n").unwrap(), Frame::Integer(-3));
        assert_eq!(parse(b"$-1\r\n").unwrap(), Frame::Bulk(None));
        assert_eq!(parse(b"$0\r\n\r\n").unwrap(), Frame::Bulk(Some(Vec::new())));
        assert_eq!(
            parse(b"$4\r\na\r\nb\r\n").unwrap(),
            Frame::Bulk(Some(b"a\r\nb".to_vec()))
        );
    }

    #[test]
    fn test_scan_reply_shape() {
        let value = parse(b"*2\r\n$2\r\n17\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n")
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(
            value,
            NValue::Array(vec![
                NValue::from("17"),
                NValue::Array(vec!["a".into(), "b".into()]),
            ])
        );
    }

    #[test]
    fn test_error_frame_becomes_native_failure() {
        let err = parse(b"-ERR unknown command\r\n").unwrap().into_value().unwrap_err();
        assert_eq!(err, Error::native("ERR unknown command"));
    }

    #[test]
    fn test_malformed_input() {
        assert!(parse(b"").is_err());
        assert!(parse(b"+OK\n").is_err());
        assert!(parse(b"?x\r\n").is_err());
        assert!(parse(b"$3\r\nabcd\r\n").is_err());
        assert!(parse(b"*2\r\n:1\r\n").is_err());
    }

    #[test]
    fn test_oversized_bulk_is_rejected() {
        let err = parse(b"$9223372036854775807\r\n").unwrap_err();
        assert_eq!(err.kind(), kvbridge_core::ErrorKind::NativeFailure);
        let over = format!("${}\r\n", MAX_BULK_LEN + 1);
        assert!(parse(over.as_bytes()).is_err());
    }

    #[test]
    fn test_eof_is_io_error() {
        assert_eq!(parse(b"").unwrap_err().kind(), kvbridge_core::ErrorKind::Io);
    }
}
