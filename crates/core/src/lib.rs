pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{AttemptError, ConfigError, MailboxError, StepError, TransportError};
pub use types::*;
