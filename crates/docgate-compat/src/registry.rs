//! Command registry: command name to handler
//!
//! The table is built once at startup and only read afterwards.

use std::collections::HashMap;

use bson::Document;

use crate::context::RequestContext;
use crate::error::CommandError;
use crate::gateway::Gateway;
use crate::handlers;
use crate::request::CommandRequest;

/// Every supported command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    Aggregate,
    BuildInfo,
    Count,
    Create,
    Delete,
    Drop,
    EndSessions,
    Explain,
    Find,
    GetMore,
    Hello,
    Insert,
    IsMaster,
    KillCursors,
    ListCollections,
    ListDatabases,
    Ping,
}

impl Handler {
    /// Whether `explain` accepts this command
    #[must_use]
    pub fn is_explainable(self) -> bool {
        matches!(self, Handler::Find | Handler::Aggregate | Handler::Count)
    }

    pub async fn call(
        self,
        gw: &Gateway,
        ctx: &RequestContext,
        req: &CommandRequest,
    ) -> Result<Document, CommandError> {
        match self {
            Handler::Aggregate => handlers::aggregate::handle(gw, ctx, req).await,
            Handler::BuildInfo => handlers::admin::build_info(gw, ctx, req).await,
            Handler::Count => handlers::count::handle(gw, ctx, req).await,
            Handler::Create => handlers::ddl::create(gw, ctx, req).await,
            Handler::Delete => handlers::write::delete(gw, ctx, req).await,
            Handler::Drop => handlers::ddl::drop(gw, ctx, req).await,
            Handler::EndSessions => handlers::admin::end_sessions(gw, ctx, req).await,
            Handler::Explain => handlers::explain::handle(gw, ctx, req).await,
            Handler::Find => handlers::find::handle(gw, ctx, req).await,
            Handler::GetMore => handlers::cursor_ops::get_more(gw, ctx, req).await,
            Handler::Hello => handlers::admin::hello(gw, ctx, req).await,
            Handler::Insert => handlers::write::insert(gw, ctx, req).await,
            Handler::IsMaster => handlers::admin::is_master(gw, ctx, req).await,
            Handler::KillCursors => handlers::cursor_ops::kill_cursors(gw, ctx, req).await,
            Handler::ListCollections => handlers::ddl::list_collections(gw, ctx, req).await,
            Handler::ListDatabases => handlers::ddl::list_databases(gw, ctx, req).await,
            Handler::Ping => handlers::admin::ping(gw, ctx, req).await,
        }
    }
}

/// Case-sensitive command table
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Registry with every supported command and its aliases
    #[must_use]
    pub fn new() -> Self {
        let handlers = HashMap::from([
            ("aggregate", Handler::Aggregate),
            ("buildInfo", Handler::BuildInfo),
            ("buildinfo", Handler::BuildInfo),
            ("count", Handler::Count),
            ("create", Handler::Create),
            ("delete", Handler::Delete),
            ("drop", Handler::Drop),
            ("endSessions", Handler::EndSessions),
            ("explain", Handler::Explain),
            ("find", Handler::Find),
            ("getMore", Handler::GetMore),
            ("hello", Handler::Hello),
            ("insert", Handler::Insert),
            ("isMaster", Handler::IsMaster),
            ("ismaster", Handler::IsMaster),
            ("killCursors", Handler::KillCursors),
            ("listCollections", Handler::ListCollections),
            ("listDatabases", Handler::ListDatabases),
            ("ping", Handler::Ping),
        ]);
        Self { handlers }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).copied()
    }

    /// Like [`lookup`](Self::lookup), failing with `CommandNotFound`
    pub fn resolve(&self, name: &str) -> Result<Handler, CommandError> {
        self.lookup(name).ok_or_else(|| CommandError::command_not_found(name))
    }

    /// Registered names, aliases included, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ErrorKind};

    #[test]
    fn test_lookup_is_case_sensitive_with_aliases() {
        let registry = CommandRegistry::new();
        assert_eq!(registry.lookup("isMaster"), Some(Handler::IsMaster));
        assert_eq!(registry.lookup("ismaster"), Some(Handler::IsMaster));
        assert_eq!(registry.lookup("buildinfo"), Some(Handler::BuildInfo));
        assert_eq!(registry.lookup("FIND"), None);
        assert_eq!(registry.lookup("Find"), None);
    }

    #[test]
    fn test_unknown_command() {
        let err = CommandRegistry::new().resolve("frobnicate").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CommandNotFound);
        assert_eq!(err.kind(), ErrorKind::UnsupportedCommand);
        assert_eq!(err.message(), "no such command: 'frobnicate'");
    }

    #[test]
    fn test_explainable_commands() {
        let registry = CommandRegistry::new();
        let explainable: Vec<_> = registry
            .names()
            .into_iter()
            .filter(|name| registry.lookup(name).is_some_and(Handler::is_explainable))
            .collect();
        assert_eq!(explainable, vec!["aggregate", "count", "find"]);
        assert_eq!(registry.names().len(), 19);
    }
}
