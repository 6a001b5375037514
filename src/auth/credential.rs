//! Access/refresh credential pair and rotation helpers.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access credential plus the optional refresh credential used to renew it.
///
/// Installed at sign-in, replaced after every successful refresh exchange, and discarded on
/// logout or refresh failure. Only the [`RefreshCoordinator`](crate::coordinator::RefreshCoordinator)
/// mutates the pair it owns; everyone else reads access-token snapshots.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialPair {
	/// Short-lived token attached to outbound calls.
	pub access_token: TokenSecret,
	/// Longer-lived token used solely to obtain a new access token.
	pub refresh_token: Option<TokenSecret>,
	/// Instant the pair was installed or last rotated.
	pub issued_at: OffsetDateTime,
}
impl CredentialPair {
	/// Creates a pair holding both secrets.
	pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: Some(TokenSecret::new(refresh_token)),
			issued_at: OffsetDateTime::now_utc(),
		}
	}

	/// Creates a pair with no refresh token; expiry of its access token ends the session.
	pub fn access_only(access_token: impl Into<String>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: None,
			issued_at: OffsetDateTime::now_utc(),
		}
	}

	/// Overrides the issued-at instant.
	pub fn with_issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = instant;

		self
	}

	/// Builds the successor pair from a refresh response.
	///
	/// Backends that do not rotate refresh tokens omit them; the current one is kept.
	pub fn rotate(&self, refreshed: RefreshedCredentials) -> Self {
		let RefreshedCredentials { access_token, refresh_token } = refreshed;

		Self {
			access_token,
			refresh_token: refresh_token.or_else(|| self.refresh_token.clone()),
			issued_at: OffsetDateTime::now_utc(),
		}
	}
}
impl Debug for CredentialPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialPair")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("issued_at", &self.issued_at)
			.finish()
	}
}

/// Outcome of a successful refresh exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshedCredentials {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, if the backend issued one.
	pub refresh_token: Option<TokenSecret>,
}
impl RefreshedCredentials {
	/// Creates an outcome carrying only a new access token.
	pub fn access(access_token: impl Into<String>) -> Self {
		Self { access_token: TokenSecret::new(access_token), refresh_token: None }
	}

	/// Attaches a rotated refresh token.
	pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(refresh_token));

		self
	}
}
