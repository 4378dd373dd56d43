pub mod config;
pub mod credentials;

pub use config::EngineConfig;
pub use credentials::{credentials_path, ApiKeyUpdate, CredentialStore};
