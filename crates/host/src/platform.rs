use std::io;
use std::time::Duration;

use devapi::platform::Platform;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, trace};

use crate::Event;
use crate::config::{FLASH_SIZE, HostConfig};
use crate::flash::FileFlash;
use crate::fs::StdFileSystem;
use crate::net::TokioNetwork;
use crate::script::NativeScripts;

/// Everything the device API runs on, backed by the host.
#[derive(Debug)]
pub struct HostPlatform {
    pub network: TokioNetwork,
    pub fs: StdFileSystem,
    pub flash: FileFlash,
    pub script: NativeScripts,
    events: UnboundedSender<Event>,
}

impl HostPlatform {
    pub fn new(config: &HostConfig, events: UnboundedSender<Event>) -> io::Result<Self> {
        Ok(Self {
            network: TokioNetwork::new(config.addr().ip(), events.clone()),
            fs: StdFileSystem::new(config.root())?,
            flash: FileFlash::open(config.flash(), FLASH_SIZE)?,
            script: NativeScripts::new(),
            events,
        })
    }

    /// Where this platform's connections report their activity.
    pub fn events(&self) -> &UnboundedSender<Event> {
        &self.events
    }
}

impl Platform for HostPlatform {
    type Network = TokioNetwork;
    type Fs = StdFileSystem;
    type Flash = FileFlash;
    type Script = NativeScripts;

    fn network(&mut self) -> &mut TokioNetwork {
        &mut self.network
    }

    fn fs(&mut self) -> &mut StdFileSystem {
        &mut self.fs
    }

    fn flash(&mut self) -> &mut FileFlash {
        &mut self.flash
    }

    fn script(&mut self) -> &mut NativeScripts {
        &mut self.script
    }

    /// Restarting the host means rebuilding the server from its configuration.
    fn schedule_restart(&mut self, delay: Duration) {
        info!(?delay, "restart scheduled");
        let events = self.events.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if events.send(Event::Restart).is_err() {
                trace!("server gone before restart");
            }
        });
    }
}
