//! Incremental request head decoder.
//!
//! The decoder works directly on a connection's accumulation [`DynBuf`]. Bytes are
//! appended as they arrive; decoding succeeds once the buffer holds the blank line
//! that ends the head. Until then it reports `Ok(None)` and the caller waits for the
//! next segment, so a head split across any number of segments decodes exactly like
//! one delivered whole.
//!
//! On success the head is removed from the buffer, leaving only the body bytes that
//! arrived together with it.

use std::str;

use http::Method;
use tracing::trace;

use crate::buffer::DynBuf;
use crate::ensure;
use crate::protocol::{ParseError, RequestHead};
use crate::strings::{find, find_ci};

const CRLF: &[u8] = b"\r\n";
const HEAD_END: &[u8] = b"\r\n\r\n";

/// Method tokens are at least this long, the separating space is searched after it.
const METHOD_MIN_LEN: usize = 2;

const CONTENT_LENGTH: &[u8] = b"\r\ncontent-length:";
const AUTHORIZATION: &[u8] = b"\r\nauthorization:";

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestHeadDecoder;

impl RequestHeadDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Attempts to decode a request head from the start of `buf`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(head))` when the head was complete; it has been removed from `buf`
    /// - `Ok(None)` when more data is needed; `buf` is untouched
    /// - `Err(ParseError)` when the head is malformed
    pub fn decode(&mut self, buf: &mut DynBuf) -> Result<Option<RequestHead>, ParseError> {
        let Some(end) = find(buf.as_slice(), HEAD_END) else {
            trace!(buffered = buf.len(), "request head incomplete");
            return Ok(None);
        };

        let head_len = end + HEAD_END.len();
        let head = parse_head(&buf.as_slice()[..head_len])?;
        buf.remove_prefix(head_len)?;

        trace!(method = %head.method(), target = head.target(), content_length = head.content_length(), "parsed request head");
        Ok(Some(head))
    }
}

/// Parses a complete head, `head` ends with the blank line.
fn parse_head(head: &[u8]) -> Result<RequestHead, ParseError> {
    let line_end = find(head, CRLF).unwrap_or(0);
    let line = &head[..line_end];
    ensure!(line.len() > METHOD_MIN_LEN, ParseError::MissingRequestLine);

    let method_end = find(&line[METHOD_MIN_LEN..], b" ").ok_or(ParseError::MissingRequestLine)? + METHOD_MIN_LEN;
    let method = Method::from_bytes(&line[..method_end]).map_err(|_e| ParseError::InvalidMethod)?;

    let rest = &line[method_end + 1..];
    let target_end = find(rest, b" ").ok_or(ParseError::InvalidUri)?;
    let target = str::from_utf8(&rest[..target_end]).map_err(|_e| ParseError::InvalidUri)?;
    ensure!(!target.is_empty(), ParseError::InvalidUri);

    // header lookups start at the CRLF closing the request line so names only match at line starts
    let fields = &head[line_end..];

    let content_length = match header_value(fields, CONTENT_LENGTH) {
        Some(value) => {
            let value = str::from_utf8(value).map_err(|_e| ParseError::invalid_content_length("value is not utf-8"))?;
            value.parse::<u64>().map_err(|_e| ParseError::invalid_content_length(format!("value {value} is not u64")))?
        }
        None => 0,
    };

    let credentials = match header_value(fields, AUTHORIZATION) {
        Some(value) => {
            let value = str::from_utf8(value).map_err(|_e| ParseError::InvalidAuthorization)?;
            let token = value.split_once(' ').map_or(value, |(_scheme, token)| token.trim_start());
            Some(token.to_owned())
        }
        None => None,
    };

    Ok(RequestHead::new(method, target, content_length, credentials))
}

/// Finds `name` (which includes the leading CRLF and trailing colon) and returns its
/// value without surrounding spaces.
fn header_value<'a>(fields: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let start = find_ci(fields, name)? + name.len();
    let rest = &fields[start..];
    let end = find(rest, CRLF).unwrap_or(rest.len());
    Some(rest[..end].trim_ascii())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn crlf(text: &str) -> String {
        text.replace('\n', "\r\n")
    }

    fn buf_of(bytes: &[u8]) -> DynBuf {
        let mut buf = DynBuf::new();
        buf.append(bytes).unwrap();
        buf
    }

    #[test]
    fn from_curl() {
        let str = crlf(indoc! {r##"
        POST /api/fs/init.lua HTTP/1.1
        Host: 192.168.4.1
        User-Agent: curl/7.79.1
        Accept: */*
        Content-Length: 5
        Authorization: Basic dXNlcjpwYXNz

        hello"##});

        let mut buf = buf_of(str.as_bytes());
        let head = RequestHeadDecoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(head.method(), &Method::POST);
        assert_eq!(head.target(), "/api/fs/init.lua");
        assert_eq!(head.content_length(), 5);
        assert_eq!(head.credentials(), Some("dXNlcjpwYXNz"));
        assert_eq!(buf.as_slice(), b"hello");
    }

    #[test]
    fn partial_head_waits_for_more_data() {
        let mut buf = buf_of(b"GET /api/ping HTTP/1.1\r\nHost: x\r\n");
        assert_eq!(RequestHeadDecoder.decode(&mut buf), Ok(None));
        assert_eq!(buf.len(), 33);

        buf.append(b"\r\n").unwrap();
        let head = RequestHeadDecoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(head.target(), "/api/ping");
        assert_eq!(head.content_length(), 0);
        assert_eq!(head.credentials(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn fragmented_head_decodes_like_whole() {
        let request = crlf(indoc! {r##"
        PUT /api/fs/log.txt HTTP/1.1
        content-LENGTH:   12
        AUTHORIZATION: Basic abc

        hello world!"##});

        let whole = RequestHeadDecoder.decode(&mut buf_of(request.as_bytes())).unwrap().unwrap();

        let mut buf = DynBuf::new();
        let mut decoded = None;
        for byte in request.as_bytes() {
            buf.append(&[*byte]).unwrap();
            if decoded.is_none() {
                decoded = RequestHeadDecoder.decode(&mut buf).unwrap();
            }
        }

        assert_eq!(decoded, Some(whole));
        assert_eq!(buf.as_slice(), b"hello world!");
    }

    #[test]
    fn header_names_only_match_at_line_start() {
        let request = crlf(indoc! {r##"
        GET / HTTP/1.1
        X-Original-Content-Length: 99

        "##});
        let head = RequestHeadDecoder.decode(&mut buf_of(request.as_bytes())).unwrap().unwrap();
        assert_eq!(head.content_length(), 0);
    }

    #[test]
    fn authorization_without_scheme_is_kept_whole() {
        let mut buf = buf_of(b"GET / HTTP/1.1\r\nAuthorization: token\r\n\r\n");
        let head = RequestHeadDecoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(head.credentials(), Some("token"));
    }

    #[test]
    fn malformed_heads_are_rejected() {
        let mut buf = buf_of(b"\r\n\r\n");
        assert_eq!(RequestHeadDecoder.decode(&mut buf), Err(ParseError::MissingRequestLine));

        let mut buf = buf_of(b"GET\r\n\r\n");
        assert_eq!(RequestHeadDecoder.decode(&mut buf), Err(ParseError::MissingRequestLine));

        let mut buf = buf_of(b"GET /nohttpversion\r\n\r\n");
        assert_eq!(RequestHeadDecoder.decode(&mut buf), Err(ParseError::InvalidUri));

        let mut buf = buf_of(b"G(T / HTTP/1.1\r\n\r\n");
        assert_eq!(RequestHeadDecoder.decode(&mut buf), Err(ParseError::InvalidMethod));

        let mut buf = buf_of(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n");
        assert!(matches!(RequestHeadDecoder.decode(&mut buf), Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn body_with_zero_bytes_is_preserved() {
        let mut buf = buf_of(b"POST /api/flash/1000 HTTP/1.1\r\nContent-Length: 4\r\n\r\n\0\x01\0\x02");
        RequestHeadDecoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(buf.as_slice(), b"\0\x01\0\x02");
    }
}
