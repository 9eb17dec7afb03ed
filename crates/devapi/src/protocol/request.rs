//! Parsed request head.
//!
//! Only the parts the device API acts on survive parsing: the method, the request
//! target, the declared body length and the `Authorization` credential. Every other
//! header is ignored.

use http::Method;

/// The request line and the two interpreted headers of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    method: Method,
    target: String,
    content_length: u64,
    credentials: Option<String>,
}

impl RequestHead {
    pub fn new(method: Method, target: impl Into<String>, content_length: u64, credentials: Option<String>) -> Self {
        Self { method, target: target.into(), content_length, credentials }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as sent, query string included.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The request target without its query string, used for routing.
    pub fn path(&self) -> &str {
        self.target.split_once('?').map_or(self.target.as_str(), |(path, _query)| path)
    }

    /// Declared body size; zero when the request carried no `Content-Length`.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// The opaque token that followed the scheme in `Authorization`.
    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    pub fn into_parts(self) -> (Method, String, Option<String>) {
        (self.method, self.target, self.credentials)
    }
}
