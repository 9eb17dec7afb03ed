//! Host settings read from the environment.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use devapi::server::{DEFAULT_LOG_CAPACITY, ServerConfig};

use crate::HostError;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_ROOT: &str = "./data";
pub const DEFAULT_FLASH: &str = "./flash.bin";
pub const FLASH_SIZE: u32 = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    addr: SocketAddr,
    root: PathBuf,
    flash: PathBuf,
    credentials: Option<String>,
    log_capacity: usize,
}

impl HostConfig {
    /// `DEVAPI_ADDR`, `DEVAPI_ROOT`, `DEVAPI_FLASH`, `DEVAPI_CREDENTIALS` and
    /// `DEVAPI_LOG_CAPACITY`, each optional.
    pub fn from_env() -> Result<Self, HostError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HostError> {
        let addr = lookup("DEVAPI_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_owned());
        let addr = addr.parse().map_err(|_e| HostError::Config { name: "DEVAPI_ADDR", value: addr })?;

        let log_capacity = match lookup("DEVAPI_LOG_CAPACITY") {
            Some(value) => value.parse().map_err(|_e| HostError::Config { name: "DEVAPI_LOG_CAPACITY", value })?,
            None => DEFAULT_LOG_CAPACITY,
        };

        Ok(Self {
            addr,
            root: lookup("DEVAPI_ROOT").map_or_else(|| PathBuf::from(DEFAULT_ROOT), PathBuf::from),
            flash: lookup("DEVAPI_FLASH").map_or_else(|| PathBuf::from(DEFAULT_FLASH), PathBuf::from),
            credentials: lookup("DEVAPI_CREDENTIALS").filter(|credentials| !credentials.is_empty()),
            log_capacity,
        })
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_flash(mut self, flash: impl Into<PathBuf>) -> Self {
        self.flash = flash.into();
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Directory served as the device filesystem.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the emulated flash image.
    pub fn flash(&self) -> &Path {
        &self.flash
    }

    pub fn server_config(&self) -> ServerConfig {
        let builder = ServerConfig::builder().port(self.addr.port()).log_capacity(self.log_capacity);
        match &self.credentials {
            Some(credentials) => builder.credentials(credentials.clone()).build(),
            None => builder.build(),
        }
    }
}
