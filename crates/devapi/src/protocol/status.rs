use http::StatusCode;
use tracing::warn;

/// The four statuses the device API can answer with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Ok,
    Unauthorized,
    NotFound,
    InternalError,
}

impl ResponseStatus {
    /// Maps a numeric code returned by a script callback.
    ///
    /// Codes without a representation are answered as an internal error.
    pub fn from_code(code: i64) -> Self {
        match code {
            200 => Self::Ok,
            401 => Self::Unauthorized,
            404 => Self::NotFound,
            500 => Self::InternalError,
            other => {
                warn!(code = other, "unsupported response status, answering 500");
                Self::InternalError
            }
        }
    }

    /// Status line, plus any header the status itself mandates.
    pub(crate) fn head(self) -> &'static [u8] {
        match self {
            Self::Ok => b"HTTP/1.1 200 OK\r\n",
            Self::Unauthorized => b"HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic\r\n",
            Self::NotFound => b"HTTP/1.1 404 Not Found\r\n",
            Self::InternalError => b"HTTP/1.1 500 Internal Error\r\n",
        }
    }
}

impl From<ResponseStatus> for StatusCode {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Ok => StatusCode::OK,
            ResponseStatus::Unauthorized => StatusCode::UNAUTHORIZED,
            ResponseStatus::NotFound => StatusCode::NOT_FOUND,
            ResponseStatus::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl TryFrom<StatusCode> for ResponseStatus {
    type Error = StatusCode;

    fn try_from(code: StatusCode) -> Result<Self, Self::Error> {
        match code {
            StatusCode::OK => Ok(Self::Ok),
            StatusCode::UNAUTHORIZED => Ok(Self::Unauthorized),
            StatusCode::NOT_FOUND => Ok(Self::NotFound),
            StatusCode::INTERNAL_SERVER_ERROR => Ok(Self::InternalError),
            other => Err(other),
        }
    }
}
