//! The server instance: listening socket, connection table and the state shared by
//! all connections.
//!
//! A [`Server`] does no I/O of its own. The host's network layer feeds it events
//! through [`accept`](Server::accept), [`on_receive`](Server::on_receive),
//! [`on_sent`](Server::on_sent), [`on_peer_closed`](Server::on_peer_closed) and
//! [`on_error`](Server::on_error), and every event runs to completion before the
//! call returns.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::buffer::BufferError;
use crate::connection::{ApiConnection, ConnectionId, ConnectionState, Context, SharedState};
use crate::platform::{HandleOf, Listener, ListenerOf, Network, Platform, ScriptEngine, Transport, TransportError, TransportOf};
use crate::protocol::{AcceptError, ConnectionError};
use crate::router::ApiRouter;

mod config;
mod log_buffer;

pub use config::{DEFAULT_LOG_CAPACITY, DEFAULT_PORT, ServerConfig, ServerConfigBuilder};
pub use log_buffer::LogBuffer;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("can't listen: {source}")]
    Listen {
        #[from]
        source: TransportError,
    },

    #[error("invalid route table: {source}")]
    Routes {
        #[from]
        source: matchit::InsertError,
    },
}

pub struct Server<P: Platform> {
    config: ServerConfig,
    platform: P,
    listener: Option<ListenerOf<P>>,
    router: ApiRouter,
    shared: SharedState<HandleOf<P>>,
    connections: HashMap<ConnectionId, ApiConnection<P>>,
    next_id: u64,
}

impl<P: Platform> Server<P> {
    /// Starts listening on the configured port.
    pub fn create(config: ServerConfig, mut platform: P) -> Result<Self, ServerError> {
        let router = ApiRouter::new()?;
        let listener = platform.network().listen(config.port())?;
        info!(port = config.port(), log_capacity = config.log_capacity(), auth = config.credentials().is_some(), "device api listening");

        let shared = SharedState {
            log: LogBuffer::new(config.log_capacity()),
            credentials: config.credentials().map(ToOwned::to_owned),
            callbacks: Vec::new(),
        };
        Ok(Self { config, platform, listener: Some(listener), router, shared, connections: HashMap::new(), next_id: 0 })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Appends to the log served by `/api/log`.
    pub fn log(&mut self, message: impl AsRef<[u8]>) -> Result<(), BufferError> {
        self.shared.log.push(message.as_ref())
    }

    /// Appends a callback to the chain; earlier callbacks are asked first.
    ///
    /// The server owns the handle from now on and releases it on [`close`](Self::close).
    pub fn on(&mut self, callback: HandleOf<P>) {
        if self.is_closed() {
            warn!("callback registered on a closed server, releasing it");
            self.platform.script().release(callback);
            return;
        }
        self.shared.callbacks.push(callback);
        debug!(callbacks = self.shared.callbacks.len(), "registered callback");
    }

    /// Stops listening, aborts every connection and releases every callback.
    ///
    /// Closing an already closed server does nothing.
    pub fn close(&mut self) {
        let Some(mut listener) = self.listener.take() else {
            return;
        };
        if let Err(e) = listener.close() {
            warn!(cause = %e, "can't close listener, aborting it");
            listener.abort();
        }

        let mut ctx = Context { platform: &mut self.platform, shared: &mut self.shared, router: &self.router };
        for (_, mut connection) in self.connections.drain() {
            connection.abort(&mut ctx);
        }
        for callback in self.shared.callbacks.drain(..) {
            self.platform.script().release(callback);
        }
        self.shared.log.clear();
        self.shared.credentials = None;
        info!("device api closed");
    }

    /// Registers a connection accepted by the listener.
    ///
    /// A refused connection is aborted; the listener and the other connections are
    /// unaffected.
    pub fn accept(&mut self, mut transport: TransportOf<P>) -> Result<ConnectionId, AcceptError> {
        if let Err(e) = self.check_capacity() {
            warn!(cause = %e, connections = self.connections.len(), "refusing connection");
            transport.abort();
            return Err(e);
        }

        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        self.connections.insert(id, ApiConnection::new(id, transport, self.config.buffer_limit()));
        debug!(%id, connections = self.connections.len(), "accepted connection");
        Ok(id)
    }

    fn check_capacity(&mut self) -> Result<(), AcceptError> {
        if self.is_closed() {
            return Err(AcceptError::Closed);
        }
        if let Some(max) = self.config.max_connections()
            && self.connections.len() >= max
        {
            return Err(AcceptError::TooManyConnections { max });
        }
        self.connections.try_reserve(1).map_err(|e| {
            error!(cause = %e, "connection table allocation failed");
            AcceptError::OutOfMemory
        })
    }

    /// Received data; `segments` are processed in order.
    pub fn on_receive<'s, I>(&mut self, id: ConnectionId, segments: I)
    where
        I: IntoIterator<Item = &'s [u8]>,
    {
        self.dispatch(id, "receive", |connection, ctx| connection.on_receive(ctx, segments));
    }

    /// The transport acknowledged `len` sent bytes.
    pub fn on_sent(&mut self, id: ConnectionId, len: usize) {
        self.dispatch(id, "sent", |connection, ctx| connection.on_sent(ctx, len));
    }

    /// The peer closed its side of the connection.
    pub fn on_peer_closed(&mut self, id: ConnectionId) {
        self.dispatch(id, "peer_closed", |connection, ctx| Ok(connection.on_peer_closed(ctx)));
    }

    /// The transport failed; the connection is dropped without touching it again.
    pub fn on_error(&mut self, id: ConnectionId) {
        self.dispatch(id, "error", |connection, ctx| {
            connection.on_error(ctx);
            Ok(ConnectionState::Closed)
        });
    }

    fn dispatch<F>(&mut self, id: ConnectionId, event: &'static str, f: F)
    where
        F: FnOnce(&mut ApiConnection<P>, &mut Context<'_, P>) -> Result<ConnectionState, ConnectionError>,
    {
        let Some(connection) = self.connections.get_mut(&id) else {
            warn!(%id, event, "event for unknown connection");
            return;
        };

        let mut ctx = Context { platform: &mut self.platform, shared: &mut self.shared, router: &self.router };
        let state = match f(connection, &mut ctx) {
            Ok(state) => state,
            Err(e) => {
                error!(%id, event, cause = %e, "connection failed, aborting");
                connection.abort(&mut ctx);
                ConnectionState::Closed
            }
        };

        if state == ConnectionState::Closed {
            self.connections.remove(&id);
            debug!(%id, connections = self.connections.len(), "removed connection");
        }
    }
}

impl<P: Platform> Drop for Server<P> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<P: Platform> std::fmt::Debug for Server<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("listening", &self.listener.is_some())
            .field("connections", &self.connections.len())
            .field("callbacks", &self.shared.callbacks.len())
            .finish_non_exhaustive()
    }
}
