//! Data API HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::{info, warn};

use docgate_common::error::{Error, Result};

use super::handlers;
use crate::gateway::Gateway;

/// Register the Data API routes on an app or scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health))
        .route("/metrics", web::get().to(handlers::metrics_text))
        .route("/action/{action}", web::post().to(handlers::action));
}

fn cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600);
    if origins.iter().any(|o| o == "*") {
        return cors.allow_any_origin();
    }
    origins.iter().fold(cors, |cors, origin| cors.allowed_origin(origin))
}

/// Data API server bound to the gateway shared with the wire listener
pub struct DataApiServer {
    gateway: Arc<Gateway>,
    addr: String,
}

impl DataApiServer {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let config = &gateway.config().data_api;
        let addr = format!("{}:{}", config.host, config.port);
        Self { gateway, addr }
    }

    /// Override the configured bind address
    #[must_use]
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Serve until the gateway shuts down.
    ///
    /// `on_bound` receives the listening addresses once the socket is open.
    /// Must run inside an actix system.
    pub async fn run<F>(self, on_bound: F) -> Result<()>
    where
        F: FnOnce(Vec<SocketAddr>),
    {
        let data = web::Data::from(Arc::clone(&self.gateway));
        let config = self.gateway.config().data_api.clone();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .wrap(cors(&config.cors_origins))
                .wrap(middleware::Logger::default())
                .wrap(middleware::Compress::default())
                .configure(configure)
        })
        .workers(self.gateway.config().data_api.workers.max(1))
        .disable_signals()
        .bind(&self.addr)
        .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", self.addr, e)))?;

        let addrs = server.addrs();
        info!("Data API listening on {:?}", addrs);
        on_bound(addrs);

        let server = server.run();
        let handle = server.handle();
        let shutdown = self.gateway.shutdown_token().clone();
        actix_rt::spawn(async move {
            shutdown.cancelled().await;
            handle.stop(true).await;
        });

        server.await.map_err(|e| {
            warn!("Data API server error: {}", e);
            Error::Io(e)
        })?;
        info!("Data API stopped");
        Ok(())
    }
}
