//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::mirror::core::config::MirrorConfig;
use crate::mirror::core::errors::MirrorResult;
use crate::mirror::engine::core::MirrorEngine;
use crate::tools::dispatch::ToolDispatcher;

/// Shared application state.
pub struct AppState {
    /// Tool dispatcher over the mirror engine.
    pub dispatcher: Arc<ToolDispatcher>,
}

impl AppState {
    /// Wrap an existing engine.
    #[must_use]
    pub fn new(engine: Arc<MirrorEngine>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: Arc::new(ToolDispatcher::new(engine)),
        })
    }

    /// Open the mirror described by `config`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn from_config(config: MirrorConfig) -> MirrorResult<Arc<Self>> {
        let engine = Arc::new(MirrorEngine::open(config).await?);
        Ok(Self::new(engine))
    }

    /// Mirror engine behind the dispatcher.
    #[must_use]
    pub fn engine(&self) -> &Arc<MirrorEngine> {
        self.dispatcher.engine()
    }
}
