//! A desktop host for the `devapi` device management API
//!
//! The host drives the sans-io [`devapi::server::Server`] from a tokio
//! current-thread runtime:
//!
//! - TCP through tokio, one reader and one writer task per connection
//! - the device filesystem as a directory ([`fs::StdFileSystem`])
//! - flash as an image file ([`flash::FileFlash`])
//! - a native scripting environment with a few demo callbacks
//!   ([`script::NativeScripts`])
//!
//! Socket activity becomes [`Event`]s that a single loop applies to the server, so
//! the server itself never needs to be shared between tasks. Everything runs on a
//! [`tokio::task::LocalSet`].

use std::io;

use bytes::Bytes;
use devapi::connection::ConnectionId;
use devapi::server::{Server, ServerError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod config;
pub mod flash;
pub mod fs;
pub mod net;
pub mod platform;
pub mod script;

use config::HostConfig;
use net::TokioTransport;
use platform::HostPlatform;

/// Gives the old listener time to release the port before a restart binds it again.
const REBIND_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum HostError {
    #[error("invalid {name}: {value}")]
    Config { name: &'static str, value: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error(transparent)]
    Server {
        #[from]
        source: ServerError,
    },
}

/// Socket activity, applied to the server in arrival order.
#[derive(Debug)]
pub enum Event {
    Accepted(TcpStream),
    Received(ConnectionId, Bytes),
    Sent(ConnectionId, usize),
    PeerClosed(ConnectionId),
    Failed(ConnectionId),
    Restart,
}

/// Creates the platform and a listening server with the demo callbacks registered.
///
/// Every server gets its own event channel, so events of connections torn down by
/// a restart never reach the next server.
pub fn start(config: &HostConfig) -> Result<(Server<HostPlatform>, UnboundedReceiver<Event>), HostError> {
    let (events, inbox) = unbounded_channel();
    let platform = HostPlatform::new(config, events)?;
    let mut server = Server::create(config.server_config(), platform)?;

    for callback in [script::hello, script::whoami, script::count] {
        let handle = server.platform_mut().script.register(callback);
        server.on(handle);
    }
    if let Err(e) = server.log(format!("devapi-host {} started\n", env!("CARGO_PKG_VERSION"))) {
        warn!(cause = %e, "can't write startup log");
    }
    Ok((server, inbox))
}

/// Applies events to `server` until `shutdown` is cancelled.
pub async fn serve(
    config: HostConfig,
    mut server: Server<HostPlatform>,
    mut inbox: UnboundedReceiver<Event>,
    shutdown: CancellationToken,
) -> Result<(), HostError> {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = inbox.recv() => event,
        };
        let Some(event) = event else {
            break;
        };

        match event {
            Event::Accepted(stream) => {
                let (transport, tasks) = TokioTransport::new(stream);
                match server.accept(transport) {
                    Ok(id) => tasks.spawn(id, server.platform().events()),
                    Err(e) => debug!(cause = %e, "connection refused"),
                }
            }
            Event::Received(id, data) => server.on_receive(id, [&data[..]]),
            Event::Sent(id, len) => server.on_sent(id, len),
            Event::PeerClosed(id) => server.on_peer_closed(id),
            Event::Failed(id) => server.on_error(id),
            Event::Restart => {
                info!("restarting");
                server.close();
                tokio::time::sleep(REBIND_DELAY).await;
                (server, inbox) = start(&config)?;
            }
        }
    }

    info!("shutting down");
    server.close();
    Ok(())
}

/// Starts the server and serves it until `shutdown` is cancelled.
pub async fn run(config: HostConfig, shutdown: CancellationToken) -> Result<(), HostError> {
    let (server, inbox) = start(&config)?;
    serve(config, server, inbox, shutdown).await
}

#[cfg(test)]
pub(crate) fn test_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("devapi-host-{}-{name}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::task::LocalSet;

    use super::*;

    async fn roundtrip(addr: std::net::SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.replace('\n', "\r\n").as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn serves_over_tcp() {
        let dir = test_dir("serve");
        let config = HostConfig::from_lookup(|_| None)
            .unwrap()
            .with_addr("127.0.0.1:0".parse().unwrap())
            .with_root(dir.join("root"))
            .with_flash(dir.join("flash.bin"));

        LocalSet::new()
            .run_until(async move {
                let (server, inbox) = start(&config).unwrap();
                let addr = server.platform().network.local_addr().unwrap();
                let shutdown = CancellationToken::new();
                let serving = tokio::task::spawn_local(serve(config.clone(), server, inbox, shutdown.clone()));

                let ping = roundtrip(addr, "GET /api/ping HTTP/1.1\n\n").await;
                assert!(ping.starts_with("HTTP/1.1 200 OK\r\n"), "{ping}");

                let upload = roundtrip(addr, indoc! {"
                    POST /api/fs/hello.txt HTTP/1.1
                    Content-Length: 5

                    hello"})
                .await;
                assert!(upload.starts_with("HTTP/1.1 200 OK\r\n"), "{upload}");
                assert_eq!(std::fs::read(dir.join("root/hello.txt")).unwrap(), b"hello");

                std::fs::create_dir_all(dir.join("root/www")).unwrap();
                let dir_download = roundtrip(addr, "GET /api/fs/www HTTP/1.1\n\n").await;
                assert!(dir_download.starts_with("HTTP/1.1 404 Not Found\r\n"), "{dir_download}");
                assert!(!dir_download.contains("Content-Length"), "{dir_download}");
                let dir_static = roundtrip(addr, "GET /www HTTP/1.1\n\n").await;
                assert!(dir_static.starts_with("HTTP/1.1 404 Not Found\r\n"), "{dir_static}");

                let count = roundtrip(addr, "GET /count?n=2 HTTP/1.1\n\n").await;
                assert!(count.contains("Transfer-Encoding:chunked"), "{count}");
                assert!(count.ends_with("C\r\nline 1 of 2\n\r\nC\r\nline 2 of 2\n\r\n0\r\n\r\n"), "{count}");

                shutdown.cancel();
                serving.await.unwrap().unwrap();
            })
            .await;
    }
}
