//! Per-connection request/response state machine.
//!
//! An [`ApiConnection`] is driven entirely by the server's event entry points. It
//! never blocks: every event mutates the connection in place and returns, and the
//! next event picks up from the recorded [`Mode`](mode::Mode).

use std::fmt;

use crate::platform::Platform;
use crate::router::ApiRouter;
use crate::server::LogBuffer;

mod api_connection;
mod mode;
mod routes;

pub(crate) use api_connection::ApiConnection;

/// Identifies an accepted connection in the server's connection table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a connection is still in the server's table after an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Open,
    Closed,
}

/// Server state every connection reads or appends to.
#[derive(Debug)]
pub(crate) struct SharedState<H> {
    pub(crate) log: LogBuffer,
    pub(crate) credentials: Option<String>,
    pub(crate) callbacks: Vec<H>,
}

/// What a connection borrows from its server while handling one event.
pub(crate) struct Context<'a, P: Platform> {
    pub(crate) platform: &'a mut P,
    pub(crate) shared: &'a mut SharedState<crate::platform::HandleOf<P>>,
    pub(crate) router: &'a ApiRouter,
}
