pub mod config;
pub mod error;
pub mod guards;
pub mod models;
pub mod openapi;
pub mod repo;
pub mod session;

use std::sync::Arc;

// Re-export commonly used items for tests / external users
pub use guards::{CurrentUser, Denied, Guard, GuardLayer, Kwargs, RequireAdmin, RequireLogin, RequireSelf};
pub use session::{Session, SessionCodec};

/// Handle passed down to route handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn repo::Repo>,
}
