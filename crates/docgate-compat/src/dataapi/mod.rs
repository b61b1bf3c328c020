//! JSON/HTTP Data API ingress
//!
//! `POST /action/<name>` with a JSON body naming the database, collection and
//! action arguments. Values use relaxed Extended JSON in both directions.

mod handlers;
mod server;

pub use server::{configure, DataApiServer};
