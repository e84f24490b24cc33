pub mod error;
pub mod loader;
pub mod raw;

pub use error::ConfigError;
pub use loader::{load_rules, load_settings, Settings, StoreBackend, StoreSettings};
