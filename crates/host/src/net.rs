//! The TCP side of the host: a tokio listener and per-connection reader and writer
//! tasks that turn socket activity into server events.

use std::cell::Cell;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;

use bytes::Bytes;
use devapi::connection::ConnectionId;
use devapi::platform::{Listener, Network, Transport, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::Event;

/// Bytes a connection may have queued for its writer before the server has to wait
/// for a sent notification.
pub const SEND_WINDOW: usize = 16 * 1024;
const READ_SIZE: usize = 1460;
const BACKLOG: u32 = 16;

pub struct TokioNetwork {
    ip: IpAddr,
    events: UnboundedSender<Event>,
    local_addr: Rc<Cell<Option<SocketAddr>>>,
}

impl TokioNetwork {
    pub fn new(ip: IpAddr, events: UnboundedSender<Event>) -> Self {
        Self { ip, events, local_addr: Rc::default() }
    }

    /// The bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get()
    }

    fn bind(&self, port: u16) -> io::Result<TcpListener> {
        let addr = SocketAddr::new(self.ip, port);
        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(BACKLOG)
    }
}

impl std::fmt::Debug for TokioNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioNetwork").field("ip", &self.ip).field("local_addr", &self.local_addr.get()).finish_non_exhaustive()
    }
}

impl Network for TokioNetwork {
    type Listener = TokioListener;
    type Transport = TokioTransport;

    fn listen(&mut self, port: u16) -> Result<TokioListener, TransportError> {
        let listener = self.bind(port).map_err(|e| {
            error!(cause = %e, ip = %self.ip, port, "bind server error");
            TransportError::unavailable(e)
        })?;
        let local_addr = listener.local_addr().map_err(TransportError::unavailable)?;
        self.local_addr.set(Some(local_addr));
        info!(%local_addr, "start listening");

        let token = CancellationToken::new();
        tokio::task::spawn_local(accept_loop(listener, self.events.clone(), token.clone()));
        Ok(TokioListener { token })
    }
}

async fn accept_loop(listener: TcpListener, events: UnboundedSender<Event>, token: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, remote_addr) = match accepted {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };
        debug!(%remote_addr, "accepted tcp connection");
        if events.send(Event::Accepted(stream)).is_err() {
            break;
        }
    }
    debug!("listener stopped");
}

#[derive(Debug)]
pub struct TokioListener {
    token: CancellationToken,
}

impl Listener for TokioListener {
    fn close(&mut self) -> Result<(), TransportError> {
        self.token.cancel();
        Ok(())
    }

    fn abort(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug)]
enum Command {
    Write(Vec<u8>),
    Close,
}

/// The server's handle on one TCP connection.
///
/// Writes are queued to the connection's writer task; the send window shrinks by
/// what is queued and grows back as the writer drains it.
#[derive(Debug)]
pub struct TokioTransport {
    commands: UnboundedSender<Command>,
    in_flight: Rc<Cell<usize>>,
    token: CancellationToken,
}

impl TokioTransport {
    /// Splits `stream` into the transport handed to the server and the tasks that
    /// drive the socket once the server accepted it.
    pub fn new(stream: TcpStream) -> (Self, TransportTasks) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(cause = %e, "can't disable nagle");
        }
        let (reader, writer) = stream.into_split();
        let (commands, receiver) = unbounded_channel();
        let in_flight = Rc::new(Cell::new(0));
        let token = CancellationToken::new();

        let tasks =
            TransportTasks { reader, writer, commands: receiver, in_flight: Rc::clone(&in_flight), token: token.clone() };
        (Self { commands, in_flight, token }, tasks)
    }
}

/// The socket halves of an accepted connection, waiting for its id.
#[derive(Debug)]
pub struct TransportTasks {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    commands: UnboundedReceiver<Command>,
    in_flight: Rc<Cell<usize>>,
    token: CancellationToken,
}

impl TransportTasks {
    pub fn spawn(self, id: ConnectionId, events: &UnboundedSender<Event>) {
        tokio::task::spawn_local(read_loop(id, self.reader, events.clone(), self.token.clone()));
        tokio::task::spawn_local(write_loop(id, self.writer, self.commands, self.in_flight, events.clone(), self.token));
    }
}

impl Transport for TokioTransport {
    fn send_window(&self) -> usize {
        SEND_WINDOW.saturating_sub(self.in_flight.get())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.commands.send(Command::Write(data.to_vec())).map_err(|_e| TransportError::Reset)?;
        self.in_flight.set(self.in_flight.get() + data.len());
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.commands.send(Command::Close).map_err(|_e| TransportError::Reset)
    }

    fn abort(&mut self) {
        self.token.cancel();
    }
}

async fn read_loop(id: ConnectionId, mut reader: OwnedReadHalf, events: UnboundedSender<Event>, token: CancellationToken) {
    let mut buf = vec![0; READ_SIZE];
    loop {
        let read = tokio::select! {
            () = token.cancelled() => return,
            read = reader.read(&mut buf) => read,
        };
        let event = match read {
            Ok(0) => {
                trace!(%id, "peer closed");
                Event::PeerClosed(id)
            }
            Ok(len) => Event::Received(id, Bytes::copy_from_slice(&buf[..len])),
            Err(e) => {
                warn!(%id, cause = %e, "read failed");
                Event::Failed(id)
            }
        };
        let last = !matches!(event, Event::Received(..));
        if events.send(event).is_err() || last {
            return;
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut commands: UnboundedReceiver<Command>,
    in_flight: Rc<Cell<usize>>,
    events: UnboundedSender<Event>,
    token: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            () = token.cancelled() => return,
            command = commands.recv() => command,
        };
        match command {
            Some(Command::Write(data)) => {
                let written = writer.write_all(&data).await;
                in_flight.set(in_flight.get().saturating_sub(data.len()));
                if let Err(e) = written {
                    warn!(%id, cause = %e, "write failed");
                    token.cancel();
                    if events.send(Event::Failed(id)).is_err() {
                        trace!(%id, "server gone");
                    }
                    return;
                }
                if events.send(Event::Sent(id, data.len())).is_err() {
                    return;
                }
            }
            Some(Command::Close) => {
                if let Err(e) = writer.shutdown().await {
                    debug!(%id, cause = %e, "shutdown failed");
                }
                trace!(%id, "connection closed");
                token.cancel();
                return;
            }
            None => return,
        }
    }
}
