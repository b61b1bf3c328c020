//! The command engine shared by both ingresses

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bson::Bson;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use docgate_common::metrics::{self, CommandTimer};
use docgate_common::Config;

use crate::backend::Backend;
use crate::context::{RequestContext, SessionId};
use crate::cursor::CursorManager;
use crate::document::{as_whole_number, type_name};
use crate::encoder::CommandResponse;
use crate::error::{CommandError, ErrorKind};
use crate::registry::CommandRegistry;
use crate::request::CommandRequest;

/// Registry, backend and cursor table, passed explicitly to both servers
pub struct Gateway {
    registry: CommandRegistry,
    backend: Arc<dyn Backend>,
    cursors: Arc<CursorManager>,
    config: Config,
    shutdown: CancellationToken,
    next_session: AtomicU64,
}

impl Gateway {
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        Self {
            registry: CommandRegistry::new(),
            backend,
            cursors: Arc::new(CursorManager::new()),
            config,
            shutdown: CancellationToken::new(),
            next_session: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    #[must_use]
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    #[must_use]
    pub fn cursors(&self) -> &Arc<CursorManager> {
        &self.cursors
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Root token; cancelling it interrupts every in-flight request
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Start a client session. Its cursors are killed when it is dropped.
    pub fn open_session(&self) -> Session {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        Session {
            id,
            cancel: self.shutdown.child_token(),
            cursors: Arc::clone(&self.cursors),
        }
    }

    /// Context for one request within `session`, bounded by the configured
    /// default execution time
    #[must_use]
    pub fn request_context(&self, session: &Session) -> RequestContext {
        let ctx = RequestContext::new(session.id, session.cancel.child_token());
        match self.config.query.max_execution_time_ms {
            0 => ctx,
            ms => ctx.with_timeout(Duration::from_millis(ms)),
        }
    }

    /// Start the idle cursor reaper; it stops on shutdown
    pub fn spawn_cursor_reaper(&self) -> JoinHandle<()> {
        self.cursors.spawn_reaper(
            Duration::from_secs(self.config.cursor.reap_interval_secs.max(1)),
            Duration::from_secs(self.config.cursor.idle_timeout_secs),
            self.shutdown.clone(),
        )
    }

    /// Dispatch a normalized request to its handler.
    ///
    /// Never fails: every error becomes a failed [`CommandResponse`].
    pub async fn handle(&self, ctx: &RequestContext, request: &CommandRequest) -> CommandResponse {
        let span = info_span!(
            "command",
            name = %request.name,
            db = %request.database,
            ingress = request.ingress.as_str(),
            session = ctx.session,
        );

        async {
            let handler = self.registry.resolve(&request.name);
            let label = if handler.is_ok() { request.name.as_str() } else { "unknown" };
            let _timer = CommandTimer::new(label);

            let result = match handler {
                Ok(handler) => match max_time(request) {
                    Ok(Some(limit)) => handler.call(self, &ctx.clone().with_timeout(limit), request).await,
                    Ok(None) => handler.call(self, ctx, request).await,
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };

            metrics::record_command(label, request.ingress.as_str(), result.is_ok());
            match &result {
                Ok(_) => debug!("Command succeeded"),
                Err(err) => {
                    metrics::record_command_error(label, &err.code().name());
                    if err.kind() == ErrorKind::BackendError {
                        warn!(error = %err, "Command failed");
                    } else {
                        debug!(error = %err, "Command failed");
                    }
                }
            }

            CommandResponse::new(request, result)
        }
        .instrument(span)
        .await
    }
}

/// `maxTimeMS` option, if set and non-zero
fn max_time(request: &CommandRequest) -> Result<Option<Duration>, CommandError> {
    match request.command.get("maxTimeMS") {
        None | Some(Bson::Null) => Ok(None),
        Some(value) => match as_whole_number(value) {
            Some(0) => Ok(None),
            Some(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms.unsigned_abs()))),
            Some(_) => Err(CommandError::bad_value("maxTimeMS value must be non-negative")),
            None => Err(CommandError::type_mismatch(
                &format!("{}.maxTimeMS", request.name),
                type_name(value),
                "int",
            )),
        },
    }
}

/// A client session: one wire connection, or one Data API request
pub struct Session {
    id: SessionId,
    cancel: CancellationToken,
    cursors: Arc<CursorManager>,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Interrupt everything running in this session
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.cursors.kill_session(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::ErrorCode;
    use crate::request::Ingress;
    use bson::doc;

    fn gateway() -> Gateway {
        Gateway::new(Config::default(), Arc::new(MemoryBackend::new()))
    }

    fn request(raw: bson::Document) -> CommandRequest {
        CommandRequest::from_raw(raw, None, Ingress::OpMsg).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let gw = gateway();
        let session = gw.open_session();
        let ctx = gw.request_context(&session);
        let response = gw.handle(&ctx, &request(doc! { "frobnicate": 1, "$db": "test" })).await;
        let err = response.result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CommandNotFound);
    }

    #[tokio::test]
    async fn test_invalid_max_time() {
        let gw = gateway();
        let session = gw.open_session();
        let ctx = gw.request_context(&session);
        let response = gw
            .handle(&ctx, &request(doc! { "ping": 1, "$db": "test", "maxTimeMS": "soon" }))
            .await;
        assert_eq!(response.result.unwrap_err().code(), ErrorCode::TypeMismatch);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_requests() {
        let gw = gateway();
        let session = gw.open_session();
        let ctx = gw.request_context(&session);
        gw.shutdown_token().cancel();
        let response = gw
            .handle(&ctx, &request(doc! { "count": "c", "$db": "test" }))
            .await;
        assert_eq!(response.result.unwrap_err().code(), ErrorCode::Interrupted);
    }

    #[tokio::test]
    async fn test_dropping_session_kills_its_cursors() {
        let gw = gateway();
        let docs: Vec<_> = (0..10).map(|i| doc! { "_id": i }).collect();
        gw.backend().insert("test", "c", docs, true).await.unwrap();

        let session = gw.open_session();
        let other = gw.open_session();
        assert_ne!(session.id(), other.id());

        let ctx = gw.request_context(&session);
        let response = gw
            .handle(&ctx, &request(doc! { "find": "c", "$db": "test", "batchSize": 2 }))
            .await;
        assert!(response.result.is_ok());
        assert_eq!(gw.cursors().len(), 1);

        drop(other);
        assert_eq!(gw.cursors().len(), 1);
        drop(session);
        assert!(gw.cursors().is_empty());
    }
}
