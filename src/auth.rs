//! Credential models: redacted secrets and the access/refresh pair owned by the coordinator.

pub mod credential;
pub mod secret;

pub use credential::*;
pub use secret::*;
