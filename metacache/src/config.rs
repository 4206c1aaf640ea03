//! Client configuration.

/// Default capacity of the request queue between callers and the connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default maximum value size in bytes (memcached default is 1MB).
pub const DEFAULT_MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Configuration for a single-endpoint client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Capacity of the bounded request queue. Producers suspend when full.
    pub queue_capacity: usize,
    /// Maximum accepted value size. Larger values are rejected before
    /// anything is written to the wire.
    pub max_value_size: usize,
    /// Enable TCP_NODELAY on the connection.
    pub tcp_nodelay: bool,
}

impl Config {
    /// Create a configuration for the given endpoint with default limits.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            tcp_nodelay: true,
        }
    }

    /// Set the request queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the maximum accepted value size.
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.max_value_size = size;
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    pub(crate) fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
