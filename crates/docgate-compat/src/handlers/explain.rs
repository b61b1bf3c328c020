//! `explain`
//!
//! Only planning is reported (`queryPlanner` verbosity); the explained
//! command is never executed.

use bson::{doc, Bson, Document};

use super::{aggregate, count, find};
use crate::backend::Operation;
use crate::context::RequestContext;
use crate::error::{CommandError, ErrorCode, ErrorKind};
use crate::gateway::Gateway;
use crate::registry::Handler;
use crate::request::CommandRequest;

const SERVER_VERSION: &str = "7.0.0";

pub async fn handle(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let inner = match req.command.get("explain") {
        Some(Bson::Document(inner)) if !inner.is_empty() => inner.clone(),
        Some(Bson::Document(_)) => {
            return Err(CommandError::failed_to_parse("explain command requires a nested object"))
        }
        Some(other) => {
            return Err(CommandError::type_mismatch(
                "explain.explain",
                crate::document::type_name(other),
                "object",
            ))
        }
        None => return Err(super::missing_field("explain", "explain")),
    };

    let inner = CommandRequest::from_raw(inner, Some(req.database.clone()), req.ingress)?;
    let handler = gw.registry().resolve(&inner.name)?;
    if !handler.is_explainable() {
        return Err(CommandError::new(
            ErrorKind::UnsupportedCommand,
            ErrorCode::IllegalOperation,
            format!("Cannot explain cmd: {}", inner.name),
        ));
    }

    let (collection, operation) = match handler {
        Handler::Find => {
            let (collection, operation) = find::plan(&inner)?;
            (Some(collection), operation)
        }
        Handler::Count => {
            let (collection, operation) = count::plan(&inner)?;
            (Some(collection), operation)
        }
        _ => aggregate::plan(&inner)?,
    };

    explain_plan(gw, ctx, &inner, collection.as_deref(), &operation).await
}

/// Explain output for planned work on behalf of `req`
pub(crate) async fn explain_plan(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
    collection: Option<&str>,
    operation: &Operation,
) -> Result<Document, CommandError> {
    let planner = ctx
        .run(async {
            gw.backend()
                .explain(&req.database, collection, operation)
                .await
                .map_err(CommandError::from)
        })
        .await?;

    let wire = &gw.config().wire;
    Ok(doc! {
        "queryPlanner": planner,
        "explainVersion": "1",
        "command": req.command.clone(),
        "serverInfo": {
            "host": wire.host.clone(),
            "port": i32::from(wire.port),
            "version": SERVER_VERSION,
            "gitVersion": env!("CARGO_PKG_VERSION"),
        },
    })
}
