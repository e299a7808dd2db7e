use crate::error::{MuxError, Result};
use crate::frame::MAX_PAYLOAD;

/// Configuration for a muxio session.
///
/// # Examples
///
/// ```rust
/// use muxio::{Config, ConfigBuilder};
///
/// let config = Config::default();
/// assert_eq!(config.max_payload_size, 1024);
///
/// let config = ConfigBuilder::new()
///     .send_queue_size(128)
///     .build()
///     .expect("valid configuration");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Largest payload accepted in a decoded frame and the boundary at which
    /// writes are fragmented. The protocol fixes this at 1024; both peers
    /// must agree if it is changed.
    pub max_payload_size: usize,
    /// Capacity of the egress frame FIFO shared by all channels. Writers
    /// block once the queue is full, which is what bounds how far ahead one
    /// channel can run.
    pub send_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            send_queue_size: 64,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 {
            return Err(MuxError::Config(
                "max payload size cannot be 0".to_string(),
            ));
        }

        // payload_length is a u16 on the wire.
        if self.max_payload_size > u16::MAX as usize {
            return Err(MuxError::Config(format!(
                "max payload size cannot exceed {}",
                u16::MAX
            )));
        }

        if self.send_queue_size == 0 {
            return Err(MuxError::Config("send queue size cannot be 0".to_string()));
        }

        Ok(())
    }
}

/// Builder for creating custom `Config` instances.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    pub fn send_queue_size(mut self, size: usize) -> Self {
        self.config.send_queue_size = size;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
