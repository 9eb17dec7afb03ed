use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection reset by peer")]
    Reset,

    #[error("network stack out of memory")]
    OutOfMemory,

    #[error("socket is not ready to close yet")]
    Busy,

    #[error("address or port unavailable: {reason}")]
    Unavailable { reason: String },
}

impl TransportError {
    pub fn unavailable<S: ToString>(str: S) -> Self {
        Self::Unavailable { reason: str.to_string() }
    }
}

/// One accepted TCP connection, as seen by the connection state machine.
///
/// The network layer reports progress back through the server's event entry points:
/// received segments, acknowledged (sent) bytes, peer close and errors.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Number of bytes [`write`](Transport::write) currently accepts.
    fn send_window(&self) -> usize;

    /// Queues `data` for sending; `data` never exceeds the advertised send window.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Acknowledges `len` received bytes, reopening the receive window.
    fn recved(&mut self, len: usize) {
        let _ = len;
    }

    /// Gracefully closes the connection.
    ///
    /// [`TransportError::Busy`] means the socket cannot close yet and the close must
    /// be attempted again later.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Drops the connection immediately.
    fn abort(&mut self);
}

/// The listening socket owned by a server instance.
pub trait Listener {
    fn close(&mut self) -> Result<(), TransportError>;

    fn abort(&mut self);
}

pub trait Network {
    type Listener: Listener;
    type Transport: Transport;

    fn listen(&mut self, port: u16) -> Result<Self::Listener, TransportError>;
}
