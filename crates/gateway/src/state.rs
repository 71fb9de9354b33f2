use std::sync::Arc;

use lectern_analysis::Analyzer;
use lectern_domain::config::Config;
use lectern_sessions::SessionRegistry;
use lectern_store::ArtifactStore;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ArtifactStore>,
    pub analyzer: Arc<dyn Analyzer>,
    pub registry: Arc<SessionRegistry>,
}
