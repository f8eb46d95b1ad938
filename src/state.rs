//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the chat registry, the single owner of all chat and message
//! data. Nothing else in the process touches chat state directly.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::services::chat::ChatRegistry;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ChatRegistry>,
}

impl AppState {
    #[must_use]
    pub fn new(registry: ChatRegistry) -> Self {
        Self { registry: Arc::new(registry) }
    }

    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(ChatRegistry::new(config.max_chat_id_attempts))
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
