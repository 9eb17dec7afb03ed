//! Response head serialization.
//!
//! A response is written into the connection's [`DynBuf`] as the status line, the
//! fixed header set, an optional length header, an optional content type, the blank
//! line and finally an optional body. The `Content-Length` value is reserved as a
//! fixed-width placeholder and patched in once the body size is known, which lets
//! handlers stream a body of not-yet-known size straight into the buffer behind the
//! head.

use tracing::trace;

use crate::buffer::{BufferError, DynBuf};
use crate::protocol::ResponseStatus;
use crate::strings::find;

const FIXED_HEADERS: &[u8] = b"Access-Control-Allow-Origin:*\r\nAccess-Control-Allow-Credentials:true\r\nCache-control:no-cache\r\nConnection:close\r\n";
const CONTENT_LENGTH: &[u8] = b"Content-Length:";
const TRANSFER_ENCODING_CHUNKED: &[u8] = b"Transfer-Encoding:chunked\r\n";
const CONTENT_TYPE: &[u8] = b"Content-Type:";
const CRLF: &[u8] = b"\r\n";

/// Reserved for the decimal `Content-Length` value.
const LENGTH_PLACEHOLDER: &[u8] = b"{length}";
const LENGTH_FIELD_WIDTH: usize = LENGTH_PLACEHOLDER.len();

/// How the length of a response body is announced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyLength {
    /// No length header at all; the body ends when the connection closes.
    None,
    /// `Content-Length` with a value known up front.
    Fixed(u64),
    /// `Content-Length` whose value is patched in with [`patch_content_length`].
    Deferred,
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// Replaces the content of `buf` with a response head and optional body.
///
/// Returns the length of the head, i.e. the offset at which the body starts.
pub fn encode_response(
    buf: &mut DynBuf,
    status: ResponseStatus,
    content_type: Option<&str>,
    length: BodyLength,
    body: Option<&[u8]>,
) -> Result<usize, BufferError> {
    buf.free();
    buf.append(status.head())?;
    buf.append(FIXED_HEADERS)?;

    match length {
        BodyLength::None => {}
        BodyLength::Fixed(_) | BodyLength::Deferred => {
            buf.append(CONTENT_LENGTH)?;
            buf.append(LENGTH_PLACEHOLDER)?;
            buf.append(CRLF)?;
        }
        BodyLength::Chunked => buf.append(TRANSFER_ENCODING_CHUNKED)?,
    }

    if let Some(content_type) = content_type {
        buf.append(CONTENT_TYPE)?;
        buf.append(content_type.as_bytes())?;
        buf.append(CRLF)?;
    }

    if let BodyLength::Fixed(length) = length {
        patch_content_length(buf, length)?;
    }

    buf.append(CRLF)?;
    let head_len = buf.len();

    if let Some(body) = body {
        buf.append(body)?;
    }

    trace!(?status, ?length, head_len, "encoded response");
    Ok(head_len)
}

/// Writes `length` into the reserved `Content-Length` field of `buf`.
///
/// The value is right-aligned in an eight character field; wider values widen the
/// field. Without a reserved field this does nothing.
pub fn patch_content_length(buf: &mut DynBuf, length: u64) -> Result<(), BufferError> {
    let Some(offset) = find(buf.as_slice(), LENGTH_PLACEHOLDER) else {
        trace!("no content-length placeholder to patch");
        return Ok(());
    };

    let value = format!("{length:>LENGTH_FIELD_WIDTH$}");
    buf.replace(offset, LENGTH_PLACEHOLDER.len(), value.as_bytes())
}
