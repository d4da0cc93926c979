//! Shared application state handed to every route.

use std::sync::Arc;
use workforge_runtime::ExecutionService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExecutionService>,
}
