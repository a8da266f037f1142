//! Client-side connector
//!
//! Resolves a hub address and opens a single framed connection to it.

use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::FramedConnection;
use crate::error::{AppError, AppResult};

/// Opens connections to a hub
#[derive(Debug, Clone, Default)]
pub struct Connector {
    config: ClientConfig,
}

impl Connector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to `host:port`
    ///
    /// Every resolved address is tried in order, each bounded by the
    /// configured timeout. Fails with `Resolve` if the host yields no
    /// address, or `ConnectFailed` once every candidate has been refused.
    pub async fn connect(&self, host: &str, port: u16) -> AppResult<FramedConnection> {
        let candidates: Vec<_> = lookup_host((host, port))
            .await
            .map_err(|e| AppError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .collect();

        if candidates.is_empty() {
            return Err(AppError::Resolve {
                host: host.to_string(),
                reason: "no addresses found".to_string(),
            });
        }

        let mut last_error = String::new();
        for addr in &candidates {
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(stream)) => {
                    info!(peer = %addr, "Connected");
                    return FramedConnection::new(stream, self.config.max_frame_size);
                }
                Ok(Err(e)) => {
                    debug!(peer = %addr, error = %e, "Connection attempt failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    debug!(peer = %addr, "Connection attempt timed out");
                    last_error = format!("timed out after {:?}", self.config.connect_timeout);
                }
            }
        }

        Err(AppError::ConnectFailed {
            target: format!("{host}:{port}"),
            attempts: candidates.len(),
            reason: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = Connector::default();
        let (connected, accepted) =
            tokio::join!(connector.connect("127.0.0.1", port), listener.accept());

        let connection = connected.unwrap();
        let (_, client_addr) = accepted.unwrap();
        assert_eq!(connection.peer_addr().port(), port);
        assert!(client_addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Reserve a port, then free it so nothing is listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Connector::default().connect("127.0.0.1", port).await;
        match result {
            Err(AppError::ConnectFailed {
                target, attempts, ..
            }) => {
                assert_eq!(target, format!("127.0.0.1:{port}"));
                assert_eq!(attempts, 1);
            }
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_unresolvable_host() {
        let result = Connector::default()
            .connect("no-such-host.invalid", 54000)
            .await;
        assert!(matches!(result, Err(AppError::Resolve { .. })));
    }

    #[test]
    fn test_connector_uses_config() {
        let connector = Connector::new(ClientConfig::default().with_port(6001));
        assert_eq!(connector.config().port, 6001);
    }
}
