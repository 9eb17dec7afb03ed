//! Protocol types shared by the codec and the connection state machine.
//!
//! - [`RequestHead`]: what survives parsing of a request head
//! - [`ResponseStatus`]: the closed set of statuses the device API answers with
//! - [`content_type`]: content types of the built-in routes and static files
//! - Errors: [`ConnectionError`] wraps every failure that ends a connection,
//!   [`ParseError`] covers malformed request heads and [`AcceptError`] refused
//!   connections

mod request;
pub use request::RequestHead;

mod status;
pub use status::ResponseStatus;

pub mod content_type;

mod error;
pub use error::AcceptError;
pub use error::ConnectionError;
pub use error::ParseError;
