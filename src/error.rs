//! Gateway-level error types shared across the coordinator, transports, and stores.

// self
use crate::_prelude::*;

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gateway error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Credential-store failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Backend answered with a non-success status that is not an authorization failure.
	#[error("Request failed with HTTP status {status}.")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Preview of the response body.
		body: String,
	},
	/// Response body could not be decoded into the requested type.
	#[error("Response body could not be decoded.")]
	Decode {
		/// Structured parsing failure, including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the decoded response.
		status: u16,
	},
	/// Request body could not be encoded as JSON.
	#[error("Request body could not be encoded.")]
	Encode(#[source] serde_json::Error),

	/// Authorization failed again after the call was replayed with a refreshed token.
	#[error("Request was rejected with HTTP status {status} after a token refresh.")]
	Unauthorized {
		/// Status code of the second rejection.
		status: u16,
	},
	/// The refresh episode this call joined failed; the session is gone.
	#[error("Session expired, please sign in again.")]
	SessionExpired {
		/// Failure shared by every waiter of the episode.
		#[source]
		reason: Arc<RefreshError>,
	},
	/// No session is installed (signed out, or the session was discarded).
	#[error("Authentication is required.")]
	AuthenticationRequired,
	/// The refresh episode ended without settling its waiters.
	#[error("Refresh episode was abandoned before it settled.")]
	EpisodeAbandoned,
}
impl Error {
	/// Returns `true` when the failure means the session is gone rather than the request.
	pub fn is_session_failure(&self) -> bool {
		matches!(
			self,
			Self::Unauthorized { .. }
				| Self::SessionExpired { .. }
				| Self::AuthenticationRequired
				| Self::EpisodeAbandoned
		)
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Configuration document could not be parsed.
	#[error("Gateway configuration is malformed.")]
	Malformed {
		/// Structured parsing failure, including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Base URL is unusable.
	#[error("Base URL must use http or https: {url}.")]
	InsecureBaseUrl {
		/// Offending URL.
		url: String,
	},
	/// Endpoint path cannot be joined onto the base URL.
	#[error("Endpoint `{path}` cannot be resolved against the base URL.")]
	InvalidEndpoint {
		/// Path that failed to resolve.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// No status codes are treated as authorization failures.
	#[error("At least one authorization-failure status must be configured.")]
	NoAuthFailureStatuses,
	/// Refresh episodes need a running Tokio runtime.
	#[error("Refresh coordination requires a Tokio runtime.")]
	MissingRuntime,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Failures of a single refresh exchange. Terminal for the whole episode.
#[derive(Debug, ThisError)]
pub enum RefreshError {
	/// No refresh token is held, so no exchange was attempted.
	#[error("No refresh token is available.")]
	MissingRefreshToken,
	/// Backend rejected the refresh token.
	#[error("Refresh endpoint rejected the exchange with HTTP status {status}: {message}.")]
	Rejected {
		/// HTTP status code.
		status: u16,
		/// Preview of the response body.
		message: String,
	},
	/// Exchange did not reach the backend or timed out.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Refresh endpoint responded with malformed JSON.
	#[error("Refresh endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code.
		status: u16,
	},
	/// Refresh request body could not be encoded.
	#[error("Refresh request could not be encoded.")]
	Encode(#[source] serde_json::Error),
	/// Exchange task stopped before producing a result (runtime shutdown or panic).
	#[error("Refresh exchange stopped before it produced a result.")]
	Abandoned,
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the backend.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Request exceeded its deadline.
	#[error("Request to the backend timed out.")]
	Timeout,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the backend.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}
