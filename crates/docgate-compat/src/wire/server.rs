//! Wire protocol server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use docgate_common::error::{Error, Result};
use docgate_common::metrics;

use super::protocol::{parse_body, Frame, WireCodec};
use super::types::{OpCode, WireRequest};
use crate::encoder::CommandResponse;
use crate::error::CommandError;
use crate::gateway::{Gateway, Session};
use crate::request::{normalize_msg, normalize_query, Ingress};

const PROTOCOL: &str = "wire";

/// Listens for wire protocol clients and feeds their commands to the gateway
pub struct WireServer {
    gateway: Arc<Gateway>,
    listener: TcpListener,
}

impl WireServer {
    /// Bind the listener; port 0 picks a free port
    pub async fn bind(gateway: Arc<Gateway>, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(Self { gateway, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the gateway shuts down, then wait for open
    /// connections to finish
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!("Wire protocol server listening on {}", addr);

        let shutdown = self.gateway.shutdown_token().clone();
        let tracker = TaskTracker::new();
        let active = Arc::new(AtomicI64::new(0));

        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    metrics::record_connection(PROTOCOL);
                    let open = active.fetch_add(1, Ordering::Relaxed) + 1;
                    metrics::set_active_connections(PROTOCOL, open);

                    let gateway = Arc::clone(&self.gateway);
                    let active = Arc::clone(&active);
                    tracker.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, gateway).await {
                            warn!("Connection error from {}: {}", peer, e);
                        }
                        let open = active.fetch_sub(1, Ordering::Relaxed) - 1;
                        metrics::set_active_connections(PROTOCOL, open);
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    metrics::record_connection_error(PROTOCOL, "accept");
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        info!("Wire protocol server stopped");
        Ok(())
    }
}

/// Serve one client connection.
///
/// Commands on a connection run one at a time, in arrival order. A framing
/// error closes the connection; a body that fails to decode gets an error
/// reply.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, gateway: Arc<Gateway>) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, WireCodec::new(gateway.config().wire.max_message_size));
    let session = gateway.open_session();
    let shutdown = gateway.shutdown_token().clone();
    let mut next_request_id = 1i32;

    let span = info_span!("connection", %peer, session = session.id());
    async {
        debug!("Client connected");
        loop {
            let frame = tokio::select! {
                () = shutdown.cancelled() => break,
                frame = framed.next() => frame,
            };
            let frame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    metrics::record_connection_error(PROTOCOL, "framing");
                    return Err(e);
                }
                None => break,
            };

            let request_id = frame.header.request_id;
            let Some(response) = dispatch(&gateway, &session, frame).await else {
                continue;
            };
            let reply = response.encode_wire(next_request_id, request_id)?;
            next_request_id = next_request_id.wrapping_add(1);
            framed.send(reply).await?;
        }
        debug!("Client disconnected");
        Ok::<_, Error>(())
    }
    .instrument(span)
    .await
}

/// Decode and run one message; `None` when the client asked for no reply
async fn dispatch(gateway: &Gateway, session: &Session, frame: Frame) -> Option<CommandResponse> {
    let ingress = match frame.header.op_code {
        OpCode::OpQuery => Ingress::OpQuery,
        _ => Ingress::OpMsg,
    };

    let (request, more_to_come) = match parse_body(frame.header.op_code, &frame.body) {
        Ok(WireRequest::Msg(msg)) => {
            let more_to_come = msg.flags.more_to_come();
            (normalize_msg(msg), more_to_come)
        }
        Ok(WireRequest::Query(query)) => (normalize_query(query), false),
        Err(e) => {
            debug!(error = %e, "Undecodable message body");
            return Some(CommandResponse::rejected(ingress, CommandError::malformed(e.to_string())));
        }
    };

    let response = match request {
        Ok(request) => {
            let ctx = gateway.request_context(session);
            gateway.handle(&ctx, &request).await
        }
        Err(err) => CommandResponse::rejected(ingress, err),
    };
    (!more_to_come).then_some(response)
}
