//! The collaborators the device API runs on.
//!
//! The core never touches sockets, files or flash directly. A host supplies them
//! through [`Platform`]:
//!
//! - [`Network`], [`Listener`] and [`Transport`]: the TCP stack
//! - [`FileSystem`]: the device filesystem
//! - [`Flash`]: raw flash programming, wrapped by [`FlashWriteSession`]
//! - [`ScriptEngine`]: the scripting environment running `/api/exec` snippets and
//!   the registered callbacks
//! - [`Platform::schedule_restart`]: device restart

use std::time::Duration;

mod flash;
mod fs;
mod network;
mod script;

pub use flash::{Flash, FlashError, FlashWriteSession};
pub use fs::{DirEntry, FileSystem, OpenMode};
pub use network::{Listener, Network, Transport, TransportError};
pub use script::{ScriptEngine, ScriptError, ScriptResult, ScriptValue};

#[cfg(test)]
pub use network::MockTransport;

pub trait Platform {
    type Network: Network;
    type Fs: FileSystem;
    type Flash: Flash;
    type Script: ScriptEngine;

    fn network(&mut self) -> &mut Self::Network;

    fn fs(&mut self) -> &mut Self::Fs;

    fn flash(&mut self) -> &mut Self::Flash;

    fn script(&mut self) -> &mut Self::Script;

    /// Restarts the device once `delay` has elapsed.
    fn schedule_restart(&mut self, delay: Duration);
}

pub type TransportOf<P> = <<P as Platform>::Network as Network>::Transport;
pub type ListenerOf<P> = <<P as Platform>::Network as Network>::Listener;
pub type FileOf<P> = <<P as Platform>::Fs as FileSystem>::File;
pub type HandleOf<P> = <<P as Platform>::Script as ScriptEngine>::Handle;
pub type ValueOf<P> = ScriptValue<HandleOf<P>>;
