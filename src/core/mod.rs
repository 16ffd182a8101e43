// Core infrastructure shared by the variable substrate, the expression engine and the runner

pub mod config;
pub mod errors;
pub mod id;
pub mod telemetry;

// Re-export commonly used types
pub use config::EngineConfig;
pub use errors::{FlowError, Result};
pub use id::Id;
