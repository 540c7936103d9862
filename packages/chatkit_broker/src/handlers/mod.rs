pub mod health;
pub mod session;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use session::{create_session, method_not_allowed};
