//! DocGate protocol compatibility engine
//!
//! Lets document database drivers and HTTP clients talk to a pluggable
//! storage backend:
//! - **Wire protocol**: OP_MSG commands, plus OP_QUERY for legacy handshakes
//! - **Data API**: JSON over HTTP, one endpoint per action
//!
//! Both ingresses normalize into the same [`CommandRequest`], which the
//! [`Gateway`] dispatches through its command registry. Handlers produce
//! protocol-neutral result documents that the encoder turns back into
//! wire replies or JSON bodies.
//!
//! # Usage
//!
//! ```rust,ignore
//! use docgate_compat::{DataApiServer, Gateway, MemoryBackend, WireServer};
//!
//! let gateway = Arc::new(Gateway::new(config, Arc::new(MemoryBackend::new())));
//!
//! // Drivers connect with mongodb://127.0.0.1:27017
//! let wire = WireServer::bind(gateway.clone(), "127.0.0.1:27017").await?;
//! tokio::spawn(wire.serve());
//!
//! // HTTP clients POST to http://127.0.0.1:8080/action/find
//! DataApiServer::new(gateway.clone()).run(|_| {}).await?;
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod context;
pub mod cursor;
pub mod dataapi;
pub mod document;
pub mod encoder;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod registry;
pub mod request;
pub mod wire;

pub use backend::{Backend, BackendError, DocumentStream, MemoryBackend, Operation};
pub use context::RequestContext;
pub use cursor::CursorManager;
pub use dataapi::DataApiServer;
pub use encoder::{encode_json, CommandResponse, JsonReply};
pub use error::{CommandError, ErrorCode, ErrorKind};
pub use gateway::{Gateway, Session};
pub use registry::{CommandRegistry, Handler};
pub use request::{CommandRequest, DataApiAction, Ingress};
pub use wire::WireServer;
