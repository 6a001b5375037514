//! Transport primitives the gateway decorates.
//!
//! [`Transport`] is the gateway's only dependency on an HTTP stack: it receives a fully
//! prepared [`ApiRequest`] (credentials already attached) and returns the raw
//! [`ApiResponse`]. Implementations must not interpret statuses; classifying a response as
//! an authorization failure is the gateway's job. Non-HTTP failures (DNS, TLS, timeouts)
//! surface as [`TransportError`].

pub mod message;

pub use message::*;

// std
use std::ops::Deref;
// self
use crate::{_prelude::*, error::TransportError};

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + 'a + Send>>;

/// Request-issuing primitive wrapped by the [`Gateway`](crate::gateway::Gateway).
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared by the
/// gateway and the refresh exchange behind `Arc`.
pub trait Transport
where
	Self: 'static + Send + Sync,
{
	/// Dispatches `request` and returns whatever the backend answered.
	fn execute(&self, request: ApiRequest) -> TransportFuture<'_>;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client with a default per-request timeout.
	pub fn with_timeout(timeout: Option<Duration>) -> Result<Self> {
		let mut builder = ReqwestClient::builder();

		if let Some(timeout) = timeout.and_then(|value| std::time::Duration::try_from(value).ok()) {
			builder = builder.timeout(timeout);
		}

		let client = builder.build().map_err(crate::error::ConfigError::from)?;

		Ok(Self(client))
	}

	fn method(method: Method) -> reqwest::Method {
		match method {
			Method::Get => reqwest::Method::GET,
			Method::Post => reqwest::Method::POST,
			Method::Put => reqwest::Method::PUT,
			Method::Patch => reqwest::Method::PATCH,
			Method::Delete => reqwest::Method::DELETE,
		}
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Transport for ReqwestTransport {
	fn execute(&self, request: ApiRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let ApiRequest { method, url, headers, body, timeout } = request;
			let mut builder = client.request(Self::method(method), url);

			for (name, value) in &headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = body {
				builder = builder.body(body);
			}
			if let Some(timeout) =
				timeout.and_then(|value| std::time::Duration::try_from(value).ok())
			{
				builder = builder.timeout(timeout);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.filter_map(|(name, value)| {
					value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
				})
				.collect();
			let body = response.bytes().await?.to_vec();

			Ok(ApiResponse { status, headers, body })
		})
	}
}
