use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::ServiceError;
use crate::monitoring::{SchedulePolicy, TcpChecker, WatchService};
use crate::session::{ClientSession, DialogueError, SessionEnd};

pub const BUSY_MESSAGE: &str = "Server too busy. Try later.";

/// Listens for clients and hands each one a [`ClientSession`].
pub struct MonitorServer {
    listener: TcpListener,
    service: Arc<WatchService>,
    client_slots: Arc<Semaphore>,
}

impl MonitorServer {
    /// Bind the listener and build the monitoring core.
    ///
    /// Failing to bind is the one fatal error of the service.
    pub async fn bind(config: &Config) -> Result<Self, ServiceError> {
        let raw = format!("{}:{}", config.server.bind, config.server.port);
        let addr: SocketAddr = raw.parse().map_err(|_| ServiceError::InvalidAddress(raw))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServiceError::Bind { addr, source })?;

        let max_clients = config.server.max_clients.max(1);
        let checker = Arc::new(TcpChecker::from_timeout(config.monitoring.probe_timeout_seconds));
        let policy = SchedulePolicy::from_seconds(config.monitoring.shared_interval_seconds);
        // Hosts never outnumber clients, so the probe pool gets the same size.
        let service = Arc::new(WatchService::new(checker, policy, max_clients));

        info!(%addr, max_clients, "monitor listening");
        Ok(Self { listener, service, client_slots: Arc::new(Semaphore::new(max_clients)) })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServiceError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn service(&self) -> Arc<WatchService> {
        self.service.clone()
    }

    /// Accept clients until `shutdown` resolves, then stop all monitoring.
    #[instrument(skip_all, name = "server")]
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServiceError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting clients");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(stream, addr),
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
            }
        }

        self.service.shutdown().await;
        Ok(())
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        let Ok(permit) = self.client_slots.clone().try_acquire_owned() else {
            warn!(%addr, "client limit reached, refusing connection");
            tokio::spawn(refuse(stream));
            return;
        };

        let session = ClientSession::new(self.service.clone());
        let id = session.id();
        info!(%addr, session = %id, "client connected");

        tokio::spawn(async move {
            match session.run(stream).await {
                Ok(SessionEnd::Quit) => info!(%addr, session = %id, "client quit"),
                Ok(SessionEnd::Hangup) => info!(%addr, session = %id, "client hung up"),
                Err(DialogueError::Disconnected) => {
                    debug!(%addr, session = %id, "client left before registering")
                }
                Err(e) => warn!(%addr, session = %id, error = %e, "session ended"),
            }
            drop(permit);
        });
    }
}

async fn refuse(mut stream: TcpStream) {
    let message = format!("{BUSY_MESSAGE}\n");
    if let Err(e) = stream.write_all(message.as_bytes()).await {
        debug!(error = %e, "failed to send refusal");
    }
    let _ = stream.shutdown().await;
}
