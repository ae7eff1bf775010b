use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Reachability probe for a single host/port.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// `true` if the target accepted a connection. Failures carry no detail.
    async fn check(&self, host: &str, port: u16) -> bool;
}

/// Opens a TCP connection and closes it straight away.
///
/// Only proves that something accepted the handshake, not that the service
/// behind it is healthy.
#[derive(Debug, Clone, Default)]
pub struct TcpChecker {
    timeout_duration: Option<Duration>,
}

impl TcpChecker {
    /// Probe with whatever connect timeout the OS applies.
    pub fn new() -> Self {
        Self { timeout_duration: None }
    }

    pub fn with_timeout(timeout_seconds: u64) -> Self {
        Self { timeout_duration: Some(Duration::from_secs(timeout_seconds)) }
    }

    pub fn from_timeout(timeout_seconds: Option<u64>) -> Self {
        timeout_seconds.map(Self::with_timeout).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, host: &str, port: u16) -> bool {
        let connect = TcpStream::connect((host, port));

        let outcome = match self.timeout_duration {
            Some(limit) => match timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(host, port, "probe timed out");
                    return false;
                }
            },
            None => connect.await,
        };

        match outcome {
            // Dropping the stream closes it.
            Ok(_stream) => true,
            Err(e) => {
                debug!(host, port, error = %e, "probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_listening_port_is_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(TcpChecker::new().check("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn test_closed_port_is_down() {
        let port = closed_port().await;

        assert!(!TcpChecker::new().check("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn test_unknown_host_is_down() {
        let checker = TcpChecker::with_timeout(5);

        assert!(!checker.check("no-such-host.invalid", 80).await);
    }

    #[tokio::test]
    async fn test_repeated_probes_close_their_sockets() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let checker = TcpChecker::new();

        for _ in 0..20 {
            assert!(checker.check("127.0.0.1", port).await);

            let (mut accepted, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8];
            // EOF means the probe side already closed its end.
            assert_eq!(accepted.read(&mut buf).await.unwrap(), 0);
        }
    }
}
