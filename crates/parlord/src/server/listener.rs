//! Listening sockets for the supported stream transports.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tracing::warn;

use crate::config::{Protocol, ServerConfig};

use super::ServerError;

/// Read half of an accepted connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an accepted connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An accepted connection, split into halves.
pub struct Accepted {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    /// Peer description for logging
    pub peer: String,
}

/// A bound listening socket.
pub enum ChatListener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl ChatListener {
    /// Binds the socket described by `config`.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        match config.protocol {
            Protocol::Tcp => {
                let listener = TcpListener::bind((config.address.as_str(), config.port))
                    .await
                    .map_err(|e| ServerError::Listen {
                        endpoint: config.endpoint(),
                        error: e.to_string(),
                    })?;
                Ok(Self::Tcp(listener))
            }
            Protocol::Unix => {
                let path = PathBuf::from(&config.address);
                let listener = bind_unix(&path).map_err(|e| ServerError::Listen {
                    endpoint: config.endpoint(),
                    error: e.to_string(),
                })?;
                Ok(Self::Unix { listener, path })
            }
        }
    }

    /// Accepts the next connection.
    pub async fn accept(&self) -> io::Result<Accepted> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                // Chat lines are small; don't hold them back
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                }
                let (reader, writer) = stream.into_split();
                Ok(Accepted {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    peer: addr.to_string(),
                })
            }
            Self::Unix { listener, path } => {
                let (stream, _addr) = listener.accept().await?;
                let (reader, writer) = stream.into_split();
                Ok(Accepted {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    peer: format!("unix:{}", path.display()),
                })
            }
        }
    }

    /// Returns the bound TCP address (None for Unix sockets).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            Self::Unix { .. } => None,
        }
    }

    /// Removes the socket file of a Unix listener.
    pub fn cleanup(&self) {
        if let Self::Unix { path, .. } = self {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(
                        socket = %path.display(),
                        error = %e,
                        "Failed to remove socket file"
                    );
                }
            }
        }
    }
}

/// Binds a Unix socket, replacing a stale socket file and creating the
/// parent directory if needed.
fn bind_unix(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    UnixListener::bind(path)
}
