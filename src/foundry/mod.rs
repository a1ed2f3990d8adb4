//! Platform integration: the container environment contract, a minimal
//! dataset/stream API client, sanitized API errors, transient-failure
//! retry, injected source credentials, and the runtime keepalive loop.
mod client;
mod env;
mod error;
pub mod keepalive;
mod retry;
mod sources;

pub use client::FoundryClient;
pub use env::{load_env, DatasetRef};
pub use error::{is_forbidden, is_not_found, is_open_transaction_conflict, ApiError};
pub use retry::retry_transient;
pub use sources::SourceCredentials;
