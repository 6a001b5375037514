//! Refresh exchange: trading a refresh token for a new credential pair.
//!
//! The coordinator treats an exchange as one atomic attempt per episode; it never retries.
//! Backoff or retry policy, if wanted, belongs inside a [`RefreshExchange`] implementation.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{RefreshedCredentials, TokenSecret},
	config::GatewayConfig,
	error::RefreshError,
	http::{ApiRequest, Transport},
};

/// Boxed future returned by [`RefreshExchange::exchange`].
pub type ExchangeFuture<'a> =
	Pin<Box<dyn Future<Output = Result<RefreshedCredentials, RefreshError>> + 'a + Send>>;

/// Collaborator that performs the refresh call against the authentication backend.
pub trait RefreshExchange
where
	Self: 'static + Send + Sync,
{
	/// Exchanges `refresh_token` for a new access token (and possibly a rotated refresh token).
	fn exchange(&self, refresh_token: TokenSecret) -> ExchangeFuture<'_>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequestBody<'a> {
	refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponseBody {
	token: String,
	#[serde(default)]
	refresh_token: Option<String>,
}

/// `POST {refresh_endpoint}` with `{ "refreshToken": ... }`, expecting `{ "token", "refreshToken"? }`.
///
/// Any non-2xx answer or transport failure fails the exchange. The request carries no
/// `Authorization` header and never passes through the gateway, so it cannot recurse into
/// another refresh.
pub struct HttpRefreshExchange<T>
where
	T: ?Sized + Transport,
{
	transport: Arc<T>,
	endpoint: Url,
	timeout: Option<Duration>,
}
impl<T> HttpRefreshExchange<T>
where
	T: ?Sized + Transport,
{
	/// Creates an exchange posting to `endpoint` through `transport`.
	pub fn new(transport: Arc<T>, endpoint: Url) -> Self {
		Self { transport, endpoint, timeout: None }
	}

	/// Creates an exchange from the refresh path and deadline in `config`.
	pub fn from_config(config: &GatewayConfig, transport: Arc<T>) -> Result<Self> {
		let endpoint = config.refresh_endpoint()?;

		Ok(Self::new(transport, endpoint).with_timeout(config.refresh_timeout()))
	}

	/// Sets the exchange deadline.
	pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;

		self
	}

	/// Returns the refresh endpoint.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	fn decode<B>(response: &crate::http::ApiResponse) -> Result<B, RefreshError>
	where
		B: DeserializeOwned,
	{
		response
			.json()
			.map_err(|source| RefreshError::ResponseParse { source, status: response.status })
	}
}
impl<T> RefreshExchange for HttpRefreshExchange<T>
where
	T: ?Sized + Transport,
{
	fn exchange(&self, refresh_token: TokenSecret) -> ExchangeFuture<'_> {
		Box::pin(async move {
			let request = ApiRequest::post(self.endpoint.clone())
				.header("accept", "application/json")
				.json(&RefreshRequestBody { refresh_token: refresh_token.expose() })
				.map_err(RefreshError::Encode)?
				.with_timeout(self.timeout);
			let response = self.transport.execute(request).await?;

			if !response.is_success() {
				return Err(RefreshError::Rejected {
					status: response.status,
					message: response.body_preview(),
				});
			}

			let body: RefreshResponseBody = Self::decode(&response)?;
			let mut refreshed = RefreshedCredentials::access(body.token);

			if let Some(rotated) = body.refresh_token.filter(|value| !value.is_empty()) {
				refreshed = refreshed.with_refresh_token(rotated);
			}

			Ok(refreshed)
		})
	}
}
impl<T> Debug for HttpRefreshExchange<T>
where
	T: ?Sized + Transport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpRefreshExchange")
			.field("endpoint", &self.endpoint.as_str())
			.field("timeout", &self.timeout)
			.finish()
	}
}
