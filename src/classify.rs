//! Policy hooks deciding which responses count as authorization failures.
//!
//! Backends differ in how they signal an expired credential. Most answer `401`, some use
//! `419` or a custom status. The gateway consults an [`AuthFailurePolicy`] for every
//! response; only responses it flags enter the refresh-and-replay path.

// self
use crate::{_prelude::*, http::ApiResponse};

/// Strategy hook that classifies responses as authorization failures.
pub trait AuthFailurePolicy: Send + Sync {
	/// Returns `true` when `response` means the attached access token was not accepted.
	fn is_auth_failure(&self, response: &ApiResponse) -> bool;
}

/// Treats a fixed set of HTTP statuses as authorization failures (default: `401`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPolicy {
	statuses: Vec<u16>,
}
impl StatusPolicy {
	/// Creates a policy for the provided statuses.
	pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
		let mut statuses = statuses.into_iter().collect::<Vec<_>>();

		statuses.sort_unstable();
		statuses.dedup();

		Self { statuses }
	}

	/// Returns the statuses treated as authorization failures.
	pub fn statuses(&self) -> &[u16] {
		&self.statuses
	}
}
impl Default for StatusPolicy {
	fn default() -> Self {
		Self::new([401])
	}
}
impl AuthFailurePolicy for StatusPolicy {
	fn is_auth_failure(&self, response: &ApiResponse) -> bool {
		self.statuses.binary_search(&response.status).is_ok()
	}
}
