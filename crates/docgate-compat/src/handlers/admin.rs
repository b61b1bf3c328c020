//! Handshake and diagnostic commands

use bson::{doc, Document};

use crate::context::RequestContext;
use crate::error::CommandError;
use crate::gateway::Gateway;
use crate::request::CommandRequest;

const SERVER_VERSION: &str = "7.0.0";
const VERSION_ARRAY: [i32; 4] = [7, 0, 0, 0];
const MIN_WIRE_VERSION: i32 = 0;
const MAX_WIRE_VERSION: i32 = 17;
const SESSION_TIMEOUT_MINUTES: i32 = 30;

fn limit(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn handshake(gw: &Gateway, ctx: &RequestContext, primary_field: &str) -> Document {
    let wire = &gw.config().wire;
    let mut reply = Document::new();
    reply.insert(primary_field, true);
    reply.extend(doc! {
        "maxBsonObjectSize": limit(wire.max_bson_object_size),
        "maxMessageSizeBytes": limit(wire.max_message_size),
        "maxWriteBatchSize": limit(wire.max_write_batch_size),
        "localTime": bson::DateTime::from_chrono(chrono::Utc::now()),
        "logicalSessionTimeoutMinutes": SESSION_TIMEOUT_MINUTES,
        "connectionId": i64::try_from(ctx.session).unwrap_or(i64::MAX),
        "minWireVersion": MIN_WIRE_VERSION,
        "maxWireVersion": MAX_WIRE_VERSION,
        "readOnly": false,
    });
    reply
}

pub async fn hello(
    gw: &Gateway,
    ctx: &RequestContext,
    _req: &CommandRequest,
) -> Result<Document, CommandError> {
    Ok(handshake(gw, ctx, "isWritablePrimary"))
}

/// Legacy handshake; also reachable as `ismaster`
pub async fn is_master(
    gw: &Gateway,
    ctx: &RequestContext,
    _req: &CommandRequest,
) -> Result<Document, CommandError> {
    Ok(handshake(gw, ctx, "ismaster"))
}

pub async fn ping(
    _gw: &Gateway,
    _ctx: &RequestContext,
    _req: &CommandRequest,
) -> Result<Document, CommandError> {
    Ok(Document::new())
}

pub async fn build_info(
    gw: &Gateway,
    _ctx: &RequestContext,
    _req: &CommandRequest,
) -> Result<Document, CommandError> {
    Ok(doc! {
        "version": SERVER_VERSION,
        "versionArray": VERSION_ARRAY.to_vec(),
        "gitVersion": env!("CARGO_PKG_VERSION"),
        "modules": [],
        "bits": 64,
        "debug": false,
        "maxBsonObjectSize": limit(gw.config().wire.max_bson_object_size),
    })
}

/// Sessions are implicit per connection; there is nothing to end
pub async fn end_sessions(
    _gw: &Gateway,
    _ctx: &RequestContext,
    _req: &CommandRequest,
) -> Result<Document, CommandError> {
    Ok(Document::new())
}
