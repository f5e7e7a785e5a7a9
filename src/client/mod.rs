//! Client side of the protocol: connection, session, share and handle.
//!
//! ```text
//! SmbClient ──connect──▶ Connection ──authenticate──▶ Session
//!     Session ──connect_share──▶ Share ──open──▶ FileHandle
//! ```

mod connection;
mod directory;
mod handle;
mod session;
mod share;

use std::net::SocketAddr;

use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::transport::{self, Transport};

pub use connection::Connection;
pub use directory::DirectoryListing;
pub use handle::FileHandle;
pub use session::{AuthenticationContext, SecurityProvider, Session};
pub use share::{normalize_path, OpenOptions, Share};

/// Entry point: holds the configuration and opens connections with it.
#[derive(Debug, Clone, Default)]
pub struct SmbClient {
    config: ClientConfig,
}

impl SmbClient {
    pub fn new(config: ClientConfig) -> Self {
        SmbClient { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect over TCP and negotiate.
    ///
    /// `server` is `host`, `host:port` or a socket address; without a port the
    /// configured one is used. The host part becomes the server name in UNC
    /// paths.
    pub async fn connect(&self, server: &str) -> Result<Connection> {
        let (host, addr) = self.resolve(server).await?;
        let timeout = self.config.request_timeout();
        let transport = transport::connect_tcp(addr, timeout).await?;
        info!(server = %host, %addr, "Connected");
        self.connect_with(transport, &host).await
    }

    /// Negotiate over an already established transport.
    pub async fn connect_with(
        &self,
        transport: impl Transport + 'static,
        server_name: &str,
    ) -> Result<Connection> {
        Connection::establish(
            Box::new(transport),
            self.config.clone(),
            server_name.to_string(),
        )
        .await
    }

    async fn resolve(&self, server: &str) -> Result<(String, SocketAddr)> {
        if let Ok(addr) = server.parse::<SocketAddr>() {
            return Ok((addr.ip().to_string(), addr));
        }
        let (host, port) = match server.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidArgument(format!("bad port in {:?}", server)))?;
                (host, port)
            }
            _ => (server.trim_matches(&['[', ']'][..]), self.config.port),
        };
        if host.is_empty() {
            return Err(Error::InvalidArgument("empty server name".into()));
        }

        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::Connection(format!("resolve {}: {}", host, e)))?
            .next()
            .ok_or_else(|| Error::Connection(format!("{} did not resolve", host)))?;
        debug!(server = host, %addr, "Resolved");
        Ok((host.to_string(), addr))
    }
}
