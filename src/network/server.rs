//! TCP server for the RCK protocol

use super::connection::ConnectionHandler;
use super::protocol::MAX_MESSAGE_SIZE;
use crate::config::RckConfig;
use crate::service::HeapService;
use anyhow::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections
    pub max_connections: usize,

    /// Largest request or response body
    pub max_message_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            max_connections: 1024,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl From<&RckConfig> for ServerConfig {
    fn from(config: &RckConfig) -> Self {
        Self {
            bind_addr: config.bind_addr,
            max_connections: config.max_connections,
            max_message_size: config.max_message_size,
        }
    }
}

/// RCK protocol server
pub struct ProtocolServer {
    listener: TcpListener,
    config: ServerConfig,
    handler: Arc<ConnectionHandler>,
    connection_semaphore: Arc<Semaphore>,
}

impl ProtocolServer {
    /// Bind the listening socket
    ///
    /// Binding to port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn bind(config: ServerConfig, service: Arc<HeapService>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let handler = Arc::new(ConnectionHandler::new(service, config.max_message_size));
        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

        Ok(Self {
            listener,
            config,
            handler,
            connection_semaphore,
        })
    }

    /// Accept connections until the task is dropped
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// In-flight connections keep running on their own tasks.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("RCK server listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            // Acquire connection permit
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.connection_semaphore.clone().acquire_owned() => permit?,
            };

            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        tracing::debug!("Accepted connection from {}", addr);

                        if let Err(e) = handler.handle(stream).await {
                            tracing::error!("Connection error from {}: {}", addr, e);
                        }

                        // Permit automatically released when dropped
                        drop(permit);
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                    // Don't break the loop, keep accepting new connections
                }
            }
        }

        tracing::info!("RCK server stopped accepting connections");
        Ok(())
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get max connections
    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    /// Get available connection slots
    pub fn available_connections(&self) -> usize {
        self.connection_semaphore.available_permits()
    }
}
