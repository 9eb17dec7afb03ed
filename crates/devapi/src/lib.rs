//! A sans-io HTTP device management API for constrained devices
//!
//! This crate implements the request/response engine of a small HTTP/1.1 server
//! that exposes a device's filesystem, flash, log and scripting environment over
//! the network. It is written for targets with tens of kilobytes of heap: every
//! buffer grows to exactly the size it needs and every allocation is checked.
//!
//! The engine does no I/O itself. Sockets, files, flash and the scripting
//! environment are supplied by the host through the [`platform::Platform`] trait,
//! and the host's network layer drives the [`server::Server`] with events.
//!
//! # Features
//!
//! - One request per connection (`Connection: close`), no pipelining
//! - Request heads decoded incrementally from arbitrarily fragmented segments
//! - Streaming file uploads and downloads
//! - Streaming flash (OTA) writes and flash range reads
//! - Script execution and a chain of user callbacks, including chunked responses
//!   produced by a callback
//! - Optional credential check on the built-in routes
//! - A bounded log buffer served at `/api/log`
//!
//! # Example
//!
//! ```ignore
//! use devapi::server::{Server, ServerConfig};
//!
//! let config = ServerConfig::builder().port(80).credentials("dXNlcjpwYXNz").build();
//! let mut server = Server::create(config, platform)?;
//! server.on(led_callback);
//!
//! // from the network layer's callbacks
//! let id = server.accept(transport)?;
//! server.on_receive(id, [segment]);
//! server.on_sent(id, len);
//! ```
//!
//! # Routes
//!
//! | Route                               | Behavior                                           |
//! |-------------------------------------|----------------------------------------------------|
//! | `GET /api/fs`                       | JSON listing `{"name":size,...}`                   |
//! | `POST`/`PUT /api/fs/<path>`         | write / append the request body to a file          |
//! | `GET /api/fs/<path>`                | download a file                                    |
//! | `DELETE /api/fs/<path>`             | remove a file                                      |
//! | `/api/restart`                      | restart the device once the connection is closed   |
//! | `/api/log`                          | return and clear the log buffer                    |
//! | `/api/exec`                         | run the body as a script, answer with its results  |
//! | `POST /api/flash/<hex>`             | write the body to flash at an offset               |
//! | `GET /api/flash/<hex>,<hex>`        | read a flash range                                 |
//! | `/api/ping`, `/api/version`         | liveness and API version                           |
//! | `/`                                 | `index.html`, or a built-in page                   |
//! | anything else                       | callback chain, then static files, then 404        |
//!
//! # Architecture
//!
//! - [`buffer`]: the exact-size, fallible [`buffer::DynBuf`]
//! - [`strings`]: bounded and case-insensitive byte search
//! - [`codec`]: request head decoding and response encoding
//! - [`protocol`]: request, status and error types
//! - [`platform`]: the collaborator traits a host implements
//! - [`connection`]: the per-connection state machine
//! - [`server`]: the server instance and its event entry points
//!
//! # Error Handling
//!
//! - [`buffer::BufferError`]: allocation failures and out-of-range splices
//! - [`protocol::ParseError`]: malformed request heads
//! - [`protocol::ConnectionError`]: anything that ends a connection early; the
//!   connection is aborted and every resource it holds is released
//! - [`protocol::AcceptError`]: a refused connection

pub mod buffer;
pub mod codec;
pub mod connection;
pub mod platform;
pub mod protocol;
pub mod router;
pub mod server;
pub mod strings;

mod utils;
pub(crate) use utils::ensure;

#[cfg(test)]
pub(crate) mod test_support;
