// Structured logging
pub mod logging;

// Health and diagnostics endpoints
pub mod health;

pub use logging::init_logging;
