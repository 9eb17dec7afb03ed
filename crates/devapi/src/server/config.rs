pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Settings of one server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    port: u16,
    log_capacity: usize,
    credentials: Option<String>,
    buffer_limit: Option<usize>,
    max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bytes retained by the log buffer; zero disables it.
    pub fn log_capacity(&self) -> usize {
        self.log_capacity
    }

    /// The token every protected route expects in `Authorization`.
    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    /// Largest accumulation buffer a single connection may hold.
    pub fn buffer_limit(&self) -> Option<usize> {
        self.buffer_limit
    }

    pub fn max_connections(&self) -> Option<usize> {
        self.max_connections
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    port: u16,
    log_capacity: usize,
    credentials: Option<String>,
    buffer_limit: Option<usize>,
    max_connections: Option<usize>,
}

impl ServerConfigBuilder {
    fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            log_capacity: DEFAULT_LOG_CAPACITY,
            credentials: None,
            buffer_limit: None,
            max_connections: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn log_capacity(mut self, log_capacity: usize) -> Self {
        self.log_capacity = log_capacity;
        self
    }

    pub fn credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn buffer_limit(mut self, buffer_limit: usize) -> Self {
        self.buffer_limit = Some(buffer_limit);
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    pub fn build(self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            log_capacity: self.log_capacity,
            credentials: self.credentials,
            buffer_limit: self.buffer_limit,
            max_connections: self.max_connections,
        }
    }
}
