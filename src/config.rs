use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::smb2;
use crate::smb2::header::SMB2_HEADER_SIZE;
use crate::transport::MAX_FRAME_SIZE;

/// Largest READ or WRITE payload that still fits one frame together with
/// the header and the fixed READ/WRITE body.
pub const MAX_IO_SIZE: u32 = MAX_FRAME_SIZE - SMB2_HEADER_SIZE as u32 - 64;

/// Client tuning loaded from TOML. Every field has a default, so an empty
/// file is a valid configuration.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// TCP port used by `SmbClient::connect` when the address has none.
    pub port: u16,
    /// Per-request response timeout.
    pub request_timeout_ms: u64,
    /// Dialects offered in NEGOTIATE, e.g. `[0x0202, 0x0210, 0x0300]`.
    pub dialects: Vec<u16>,
    /// CreditRequest sent on every request.
    pub credits_requested: u16,
    /// Upper bound for a single READ, further capped by the server.
    pub max_read_size: u32,
    /// Upper bound for a single WRITE, further capped by the server.
    pub max_write_size: u32,
    /// OutputBufferLength for each QUERY_DIRECTORY page.
    pub query_directory_buffer_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            port: 445,
            request_timeout_ms: 30_000,
            dialects: vec![
                smb2::DIALECT_SMB_2_0_2,
                smb2::DIALECT_SMB_2_1,
                smb2::DIALECT_SMB_3_0,
                smb2::DIALECT_SMB_3_0_2,
            ],
            credits_requested: 64,
            max_read_size: 1024 * 1024,
            max_write_size: 1024 * 1024,
            query_directory_buffer_size: 64 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.dialects.is_empty() {
            return Err(Error::Config("No dialects configured".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".into()));
        }
        if self.max_read_size == 0 || self.max_write_size == 0 {
            return Err(Error::Config("max_read_size and max_write_size must be positive".into()));
        }
        if self.max_read_size > MAX_IO_SIZE || self.max_write_size > MAX_IO_SIZE {
            return Err(Error::Config(format!(
                "max_read_size and max_write_size may not exceed {} bytes",
                MAX_IO_SIZE
            )));
        }
        // Room for at least one FileIdBothDirectoryInformation entry
        if self.query_directory_buffer_size < 128 {
            return Err(Error::Config(format!(
                "query_directory_buffer_size {} is too small",
                self.query_directory_buffer_size
            )));
        }
        Ok(())
    }
}

/// Load and parse a TOML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ClientConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;
    ClientConfig::from_toml_str(&content).map_err(|e| match e {
        Error::Config(msg) => {
            Error::Config(format!("Failed to parse config file '{}': {}", path.display(), msg))
        }
        other => other,
    })
}
