pub mod config;
pub mod error;
pub mod medium;

pub use config::AuditOptions;
pub use error::AuditError;
pub use medium::{ByteMedium, ImageReader};
