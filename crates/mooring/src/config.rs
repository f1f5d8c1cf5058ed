//! Configuration for sessions and the fan-in queue.

/// Configuration for a single session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum inbound line length in bytes (default: 1 MiB). Lines
    /// longer than this terminate the session.
    pub max_line_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl SessionConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum inbound line length.
    pub fn max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }
}

/// Configuration for the fan-in message queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue capacity (default: 64). How far the producer side may get
    /// ahead of the consumer; 0 requests synchronous handoff and is
    /// clamped to the channel minimum of 1.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

impl QueueConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}
