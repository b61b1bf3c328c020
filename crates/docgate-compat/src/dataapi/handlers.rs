//! Data API request handlers

use actix_web::http::header::{ContentType, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use docgate_common::metrics;

use crate::encoder::{encode_json, JsonReply};
use crate::error::CommandError;
use crate::gateway::Gateway;
use crate::request::{normalize_json, DataApiAction};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_text() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::export_prometheus())
}

/// POST /action/{action}
///
/// Each call runs in its own session, so any cursor left open by the command
/// is released when the call returns.
pub async fn action(
    gateway: web::Data<Gateway>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let name = path.into_inner();
    let action = match name.parse::<DataApiAction>() {
        Ok(action) => action,
        Err(err) => return respond(JsonReply::error(&err)),
    };

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return respond(JsonReply::error(&CommandError::malformed(format!(
                "invalid JSON body: {}",
                e
            ))))
        }
    };

    let request = match normalize_json(action, payload) {
        Ok(request) => request,
        Err(err) => {
            debug!(action = %action, error = %err, "Rejected Data API request");
            return respond(JsonReply::error(&err));
        }
    };

    let session = gateway.open_session();
    let ctx = gateway.request_context(&session);
    let response = gateway.handle(&ctx, &request).await;
    respond(encode_json(action, &request, &response))
}

fn respond(reply: JsonReply) -> HttpResponse {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = HttpResponse::build(status);
    builder.insert_header(ContentType::json());
    if let Some(seconds) = reply.retry_after {
        builder.insert_header((RETRY_AFTER, seconds.to_string()));
    }
    builder.body(reply.body.to_string())
}
