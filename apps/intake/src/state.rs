use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::store::Store;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub store: Arc<dyn Store>,
    pub config: Config,
}
