//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `RCK_*` environment variables (e.g. `RCK_BIND_ADDR`,
//! `RCK_MAX_HEAP_BYTES`). Command-line flags are applied last by the
//! binary.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::network::protocol::MAX_MESSAGE_SIZE;

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RckConfig {
    /// Address the heap server listens on.
    pub bind_addr: SocketAddr,

    /// Maximum concurrent client connections.
    pub max_connections: usize,

    /// Largest accepted request body in bytes.
    pub max_message_size: u32,

    /// Upper bound on bytes held by live buffers, 0 for no bound.
    pub max_heap_bytes: usize,

    /// Shared library providing `LAPACKE_dgeqrf` for the execute hook.
    pub kernel_library: String,

    /// Try to load the execute kernel at startup.
    pub kernel_enabled: bool,
}

impl Default for RckConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            max_connections: 1024,
            max_message_size: MAX_MESSAGE_SIZE,
            max_heap_bytes: 0,
            kernel_library: "liblapacke.so".to_string(),
            kernel_enabled: true,
        }
    }
}

impl RckConfig {
    /// Load defaults, the optional file at `path` and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("RCK").try_parsing(true))
            .build()
            .context("failed to assemble configuration")?;

        let config: Self = settings
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Converts configuration to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            anyhow::bail!("max_connections must be at least 1");
        }
        if self.max_message_size == 0 {
            anyhow::bail!("max_message_size must be at least 1");
        }
        Ok(())
    }
}
