//! Credential-store contract and built-in store implementations.
//!
//! The coordinator keeps the authoritative [`CredentialPair`] in memory and mirrors every
//! state change into a [`CredentialStore`] so a session survives restarts. Stores only
//! persist; they never decide anything about the session.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::CredentialPair};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for the credential pair.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns the persisted pair, if any.
	fn load(&self) -> StoreFuture<'_, Option<CredentialPair>>;

	/// Persists or replaces the pair.
	fn save(&self, credentials: CredentialPair) -> StoreFuture<'_, ()>;

	/// Removes any persisted pair.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
