//! Gateway configuration: backend location, refresh endpoint, deadlines, and failure statuses.

// self
use crate::{_prelude::*, classify::StatusPolicy, error::ConfigError};

/// Settings shared by the gateway and its refresh exchange.
///
/// Loadable from JSON (`from_json_str`) so hosts can keep it next to their other settings;
/// every field except `base_url` has a default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
	/// Backend base URL every relative path is resolved against.
	pub base_url: Url,
	/// Path of the refresh exchange endpoint.
	#[serde(default = "GatewayConfig::default_refresh_path")]
	pub refresh_path: String,
	/// Deadline for ordinary calls, in milliseconds.
	#[serde(default)]
	pub request_timeout_ms: Option<u64>,
	/// Deadline for the refresh exchange, in milliseconds.
	#[serde(default)]
	pub refresh_timeout_ms: Option<u64>,
	/// Statuses treated as authorization failures.
	#[serde(default = "GatewayConfig::default_auth_failure_statuses")]
	pub auth_failure_statuses: Vec<u16>,
}
impl GatewayConfig {
	const DEFAULT_REFRESH_PATH: &'static str = "/refresh";

	/// Creates a configuration with defaults for everything but the base URL.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			refresh_path: Self::default_refresh_path(),
			request_timeout_ms: None,
			refresh_timeout_ms: None,
			auth_failure_statuses: Self::default_auth_failure_statuses(),
		}
	}

	/// Parses and validates a JSON configuration document.
	pub fn from_json_str(raw: &str) -> Result<Self> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ConfigError::Malformed { source })?;

		config.validate()?;

		Ok(config)
	}

	/// Overrides the refresh endpoint path.
	pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Overrides the deadline for ordinary calls.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout_ms = Some(Self::millis(timeout));

		self
	}

	/// Overrides the deadline for the refresh exchange.
	pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
		self.refresh_timeout_ms = Some(Self::millis(timeout));

		self
	}

	/// Overrides the statuses treated as authorization failures.
	pub fn with_auth_failure_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
		self.auth_failure_statuses = statuses.into_iter().collect();

		self
	}

	/// Rejects unusable settings.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(ConfigError::InsecureBaseUrl { url: self.base_url.to_string() });
		}
		if self.auth_failure_statuses.is_empty() {
			return Err(ConfigError::NoAuthFailureStatuses);
		}

		self.refresh_endpoint().map(|_| ())
	}

	/// Resolves `path` against the base URL.
	pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
		self.base_url
			.join(path)
			.map_err(|source| ConfigError::InvalidEndpoint { path: path.to_owned(), source })
	}

	/// Resolves the refresh exchange endpoint.
	pub fn refresh_endpoint(&self) -> Result<Url, ConfigError> {
		self.endpoint(&self.refresh_path)
	}

	/// Deadline for ordinary calls.
	pub fn request_timeout(&self) -> Option<Duration> {
		self.request_timeout_ms.map(Self::from_millis)
	}

	/// Deadline for the refresh exchange.
	pub fn refresh_timeout(&self) -> Option<Duration> {
		self.refresh_timeout_ms.map(Self::from_millis)
	}

	/// Builds the authorization-failure policy described by this configuration.
	pub fn auth_failure_policy(&self) -> StatusPolicy {
		StatusPolicy::new(self.auth_failure_statuses.iter().copied())
	}

	fn default_refresh_path() -> String {
		Self::DEFAULT_REFRESH_PATH.into()
	}

	fn default_auth_failure_statuses() -> Vec<u16> {
		vec![401]
	}

	fn millis(duration: Duration) -> u64 {
		u64::try_from(duration.whole_milliseconds()).unwrap_or(0)
	}

	fn from_millis(millis: u64) -> Duration {
		Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
	}
}
