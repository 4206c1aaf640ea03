//! Meta protocol response parsing.
//!
//! Response frames:
//! - `HD\r\n` - stored / generic success
//! - `NS\r\n` - not stored
//! - `EX\r\n` - exists (compare failed)
//! - `NF\r\n` - not found
//! - `EN\r\n` - miss
//! - `VA <len> <flags>\r\n<data>\r\n` - value follows
//! - `ERROR`, `CLIENT_ERROR <msg>`, `SERVER_ERROR <msg>` - server errors

use crate::error::ParseError;

/// Maximum length of a response header line. Lines that run past this without
/// a terminator are treated as malformed rather than buffered forever.
pub const MAX_LINE_LEN: usize = 2048;

/// Sanity cap on a `VA` value length.
const MAX_VALUE_DATA_LEN: usize = 64 * 1024 * 1024;

/// The two-letter return code leading a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// `HD` - stored, or success for value-less commands.
    Stored,
    /// `NS` - not stored.
    NotStored,
    /// `EX` - item exists (conditional store failed).
    Exists,
    /// `NF` - not found.
    NotFound,
    /// `VA` - a value block follows.
    Value,
    /// `EN` - miss.
    Miss,
    /// `ERROR`, `CLIENT_ERROR` or `SERVER_ERROR` line.
    Error,
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReturnCode::Stored => "HD",
            ReturnCode::NotStored => "NS",
            ReturnCode::Exists => "EX",
            ReturnCode::NotFound => "NF",
            ReturnCode::Value => "VA",
            ReturnCode::Miss => "EN",
            ReturnCode::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A parsed response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The return code.
    pub code: ReturnCode,
    /// Flag tokens echoed after the code (after the length, for `VA`).
    pub flags: Vec<Vec<u8>>,
    /// The value block for `VA` frames. For [`ReturnCode::Error`] frames this
    /// carries the server's error text instead.
    pub value: Option<Vec<u8>>,
}

impl Response {
    /// Parse one response frame from `data`.
    ///
    /// Returns the parsed response and the number of bytes consumed. Returns
    /// [`ParseError::Incomplete`] without consuming anything when `data` does
    /// not yet hold a full frame.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        let line_end = match find_crlf(data) {
            Some(pos) => pos,
            None => {
                if data.len() > MAX_LINE_LEN {
                    return Err(ParseError::Protocol("header line too long"));
                }
                return Err(ParseError::Incomplete);
            }
        };
        if line_end > MAX_LINE_LEN {
            return Err(ParseError::Protocol("header line too long"));
        }

        let line = &data[..line_end];
        let mut tokens = line.split(|&b| b == b' ').filter(|t| !t.is_empty());
        let code = match tokens.next() {
            Some(b"HD") => ReturnCode::Stored,
            Some(b"NS") => ReturnCode::NotStored,
            Some(b"EX") => ReturnCode::Exists,
            Some(b"NF") => ReturnCode::NotFound,
            Some(b"EN") => ReturnCode::Miss,
            Some(b"VA") => return parse_value_frame(data, line_end, tokens),
            Some(b"ERROR") | Some(b"CLIENT_ERROR") | Some(b"SERVER_ERROR") => {
                let message = line.splitn(2, |&b| b == b' ').nth(1).map(|m| m.to_vec());
                return Ok((
                    Response {
                        code: ReturnCode::Error,
                        flags: Vec::new(),
                        value: message,
                    },
                    line_end + 2,
                ));
            }
            _ => return Err(ParseError::Protocol("unknown return code")),
        };

        let flags = tokens.map(|t| t.to_vec()).collect();
        Ok((
            Response {
                code,
                flags,
                value: None,
            },
            line_end + 2,
        ))
    }
}

/// Parse a `VA <len> <flags>\r\n<data>\r\n` frame. `tokens` is positioned
/// after the `VA` token.
fn parse_value_frame<'a>(
    data: &[u8],
    line_end: usize,
    mut tokens: impl Iterator<Item = &'a [u8]>,
) -> Result<(Response, usize), ParseError> {
    let len_token = tokens
        .next()
        .ok_or(ParseError::Protocol("VA missing length"))?;
    let len = parse_len(len_token)?;
    let flags: Vec<Vec<u8>> = tokens.map(|t| t.to_vec()).collect();

    let value_start = line_end + 2;
    let value_end = value_start + len;
    if data.len() < value_end + 2 {
        return Err(ParseError::Incomplete);
    }
    if &data[value_end..value_end + 2] != b"\r\n" {
        return Err(ParseError::Protocol("missing value terminator"));
    }

    Ok((
        Response {
            code: ReturnCode::Value,
            flags,
            value: Some(data[value_start..value_end].to_vec()),
        },
        value_end + 2,
    ))
}

/// Find \r\n in data, return position of \r
fn find_crlf(data: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = memchr::memchr(b'\r', &data[offset..]) {
        let pos = offset + pos;
        if pos + 1 < data.len() {
            if data[pos + 1] == b'\n' {
                return Some(pos);
            }
            offset = pos + 1;
        } else {
            return None;
        }
    }
    None
}

/// Parse a `VA` length from ASCII decimal.
fn parse_len(token: &[u8]) -> Result<usize, ParseError> {
    let len: usize = std::str::from_utf8(token)
        .map_err(|_| ParseError::InvalidNumber)?
        .parse()
        .map_err(|_| ParseError::InvalidNumber)?;
    if len > MAX_VALUE_DATA_LEN {
        return Err(ParseError::Protocol("value data too large"));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(code: ReturnCode) -> Response {
        Response {
            code,
            flags: Vec::new(),
            value: None,
        }
    }

    #[test]
    fn test_parse_stored() {
        let (resp, consumed) = Response::parse(b"HD\r\n").unwrap();
        assert_eq!(resp, simple(ReturnCode::Stored));
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_parse_not_stored() {
        let (resp, consumed) = Response::parse(b"NS\r\n").unwrap();
        assert_eq!(resp, simple(ReturnCode::NotStored));
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_parse_exists() {
        let (resp, _) = Response::parse(b"EX\r\n").unwrap();
        assert_eq!(resp.code, ReturnCode::Exists);
    }

    #[test]
    fn test_parse_not_found() {
        let (resp, _) = Response::parse(b"NF\r\n").unwrap();
        assert_eq!(resp.code, ReturnCode::NotFound);
    }

    #[test]
    fn test_parse_miss() {
        let (resp, _) = Response::parse(b"EN\r\n").unwrap();
        assert_eq!(resp.code, ReturnCode::Miss);
    }

    #[test]
    fn test_parse_flag_echo() {
        let (resp, consumed) = Response::parse(b"HD O99 t42\r\n").unwrap();
        assert_eq!(resp.code, ReturnCode::Stored);
        assert_eq!(resp.flags, vec![b"O99".to_vec(), b"t42".to_vec()]);
        assert_eq!(consumed, 12);
    }

    #[test]
    fn test_parse_value() {
        let data = b"VA 3\r\nfoo\r\n";
        let (resp, consumed) = Response::parse(data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(resp.code, ReturnCode::Value);
        assert_eq!(resp.value.as_deref(), Some(&b"foo"[..]));
        assert!(resp.flags.is_empty());
    }

    #[test]
    fn test_parse_value_with_flags() {
        let data = b"VA 5\r\nhello\r\n";
        let (resp, consumed) = Response::parse(data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(resp.value.as_deref(), Some(&b"hello"[..]));

        let data = b"VA 3 v t120\r\nfoo\r\n";
        let (resp, consumed) = Response::parse(data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(resp.flags, vec![b"v".to_vec(), b"t120".to_vec()]);
        assert_eq!(resp.value.as_deref(), Some(&b"foo"[..]));
    }

    #[test]
    fn test_parse_empty_value() {
        let data = b"VA 0\r\n\r\n";
        let (resp, consumed) = Response::parse(data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(resp.value.as_deref(), Some(&b""[..]));
    }

    #[test]
    fn test_parse_value_with_embedded_crlf() {
        let data = b"VA 7\r\nfo\r\nbar\r\n";
        let (resp, consumed) = Response::parse(data).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(resp.value.as_deref(), Some(&b"fo\r\nbar"[..]));
    }

    #[test]
    fn test_parse_incomplete_header() {
        assert!(matches!(Response::parse(b""), Err(ParseError::Incomplete)));
        assert!(matches!(Response::parse(b"H"), Err(ParseError::Incomplete)));
        assert!(matches!(
            Response::parse(b"HD\r"),
            Err(ParseError::Incomplete)
        ));
        assert!(matches!(
            Response::parse(b"VA 3"),
            Err(ParseError::Incomplete)
        ));
    }

    #[test]
    fn test_parse_incomplete_value() {
        assert!(matches!(
            Response::parse(b"VA 3\r\n"),
            Err(ParseError::Incomplete)
        ));
        assert!(matches!(
            Response::parse(b"VA 3\r\nfo"),
            Err(ParseError::Incomplete)
        ));
        assert!(matches!(
            Response::parse(b"VA 3\r\nfoo\r"),
            Err(ParseError::Incomplete)
        ));
    }

    #[test]
    fn test_parse_errors() {
        let (resp, _) = Response::parse(b"ERROR\r\n").unwrap();
        assert_eq!(resp.code, ReturnCode::Error);
        assert_eq!(resp.value, None);

        let (resp, _) = Response::parse(b"CLIENT_ERROR bad data chunk\r\n").unwrap();
        assert_eq!(resp.code, ReturnCode::Error);
        assert_eq!(resp.value.as_deref(), Some(&b"bad data chunk"[..]));

        let (resp, _) = Response::parse(b"SERVER_ERROR out of memory\r\n").unwrap();
        assert_eq!(resp.code, ReturnCode::Error);
        assert_eq!(resp.value.as_deref(), Some(&b"out of memory"[..]));
    }

    #[test]
    fn test_parse_unknown_code() {
        assert!(matches!(
            Response::parse(b"BOGUS\r\n"),
            Err(ParseError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_bad_value_length() {
        assert!(matches!(
            Response::parse(b"VA abc\r\nfoo\r\n"),
            Err(ParseError::InvalidNumber)
        ));
        assert!(matches!(
            Response::parse(b"VA -1\r\nfoo\r\n"),
            Err(ParseError::InvalidNumber)
        ));
        assert!(matches!(
            Response::parse(b"VA 999999999999\r\n"),
            Err(ParseError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_missing_value_terminator() {
        assert!(matches!(
            Response::parse(b"VA 3\r\nfooXX"),
            Err(ParseError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_line_too_long() {
        let mut data = vec![b'X'; MAX_LINE_LEN + 1];
        assert!(matches!(
            Response::parse(&data),
            Err(ParseError::Protocol(_))
        ));

        data.extend_from_slice(b"\r\n");
        assert!(matches!(
            Response::parse(&data),
            Err(ParseError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_consumes_exactly_one_frame() {
        let data = b"HD\r\nNF\r\n";
        let (resp, consumed) = Response::parse(data).unwrap();
        assert_eq!(resp.code, ReturnCode::Stored);
        assert_eq!(consumed, 4);

        let (resp, consumed) = Response::parse(&data[consumed..]).unwrap();
        assert_eq!(resp.code, ReturnCode::NotFound);
        assert_eq!(consumed, 4);
    }

    // Feeding a frame sequence one byte at a time must yield exactly the same
    // responses as feeding it whole, with nothing consumed early.
    #[test]
    fn test_parse_byte_at_a_time() {
        let stream = b"VA 3\r\nfoo\r\nHD\r\n";
        let mut buffer: Vec<u8> = Vec::new();
        let mut responses = Vec::new();

        for &byte in stream.iter() {
            buffer.push(byte);
            loop {
                match Response::parse(&buffer) {
                    Ok((resp, consumed)) => {
                        buffer.drain(..consumed);
                        responses.push(resp);
                    }
                    Err(e) => {
                        assert!(e.is_incomplete());
                        break;
                    }
                }
            }
        }

        assert!(buffer.is_empty());
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].code, ReturnCode::Value);
        assert_eq!(responses[0].value.as_deref(), Some(&b"foo"[..]));
        assert_eq!(responses[1].code, ReturnCode::Stored);
    }
}
