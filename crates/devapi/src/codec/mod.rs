//! Request decoding and response encoding over [`DynBuf`](crate::buffer::DynBuf)
//!
//! - Request handling:
//!   - [`RequestHeadDecoder`]: incrementally decodes the request head, tolerating
//!     arbitrary fragmentation
//!
//! - Response handling:
//!   - [`encode_response`]: status line, fixed headers, length or chunked
//!     announcement, content type and optional body
//!   - [`patch_content_length`]: fills in a deferred `Content-Length`
//!   - [`encode_chunk`] / [`encode_last_chunk`]: chunked transfer framing

mod chunked_encoder;
mod request_decoder;
mod response_encoder;

pub use chunked_encoder::{encode_chunk, encode_last_chunk};
pub use request_decoder::RequestHeadDecoder;
pub use response_encoder::{BodyLength, encode_response, patch_content_length};
