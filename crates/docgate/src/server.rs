//! Server orchestration

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use docgate_common::Config;
use docgate_compat::{DataApiServer, Gateway, MemoryBackend, WireServer};

/// DocGate server running both ingresses over one gateway
pub struct DocGateServer {
    gateway: Arc<Gateway>,
}

impl DocGateServer {
    pub fn new(config: Config) -> Self {
        info!("Using in-memory backend");
        let backend = Arc::new(MemoryBackend::new());
        Self {
            gateway: Arc::new(Gateway::new(config, backend)),
        }
    }

    /// Cancelling this token stops both listeners and interrupts in-flight
    /// commands
    pub fn shutdown_token(&self) -> CancellationToken {
        self.gateway.shutdown_token().clone()
    }

    /// Run until shutdown
    pub async fn run(&self) -> Result<()> {
        let config = self.gateway.config().clone();
        let reaper = self.gateway.spawn_cursor_reaper();

        let wire = if config.wire.enabled {
            let addr = format!("{}:{}", config.wire.host, config.wire.port);
            let server = WireServer::bind(Arc::clone(&self.gateway), &addr).await?;
            Some(tokio::spawn(server.serve()))
        } else {
            None
        };

        // actix-web runs its own system, so it gets a dedicated thread
        let data_api = if config.data_api.enabled {
            let gateway = Arc::clone(&self.gateway);
            let shutdown = self.shutdown_token();
            let (done_tx, done_rx) = oneshot::channel();
            std::thread::Builder::new()
                .name("docgate-data-api".to_string())
                .spawn(move || {
                    let system = actix_rt::System::new();
                    let result = system.block_on(async move {
                        DataApiServer::new(gateway)
                            .run(|addrs| info!(?addrs, "Data API ready"))
                            .await
                    });
                    if let Err(e) = &result {
                        error!("Data API server error: {}", e);
                        shutdown.cancel();
                    }
                    done_tx.send(result).ok();
                })?;
            Some(done_rx)
        } else {
            None
        };

        let mut failure = None;
        if let Some(handle) = wire {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failure = Some(anyhow::Error::from(e)),
                Err(e) => failure = Some(anyhow!("wire server task failed: {}", e)),
            }
            // A failed listener takes the other one down with it
            self.gateway.shutdown_token().cancel();
        }
        if let Some(done) = data_api {
            match done.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failure = failure.or(Some(anyhow::Error::from(e))),
                Err(_) => failure = failure.or(Some(anyhow!("Data API thread exited unexpectedly"))),
            }
        }

        self.gateway.shutdown_token().cancel();
        reaper.await.ok();

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
