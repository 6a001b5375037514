//! Authenticated request gateway.
//!
//! [`Gateway::send`] attaches the coordinator's current access token, dispatches the call,
//! and inspects the response. An authorization failure on a fresh call claims the call's
//! single replay, waits for the [`RefreshCoordinator`] to produce a newer token, and sends the
//! identical call once more. A second authorization failure is terminal
//! ([`Error::Unauthorized`]). Every other response and every transport error goes straight
//! back to the caller without involving the coordinator.

pub mod pending;

pub use pending::PendingRequest;

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	classify::AuthFailurePolicy,
	config::GatewayConfig,
	coordinator::RefreshCoordinator,
	http::{ApiRequest, ApiResponse, Method, Transport},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};
#[cfg(feature = "reqwest")]
use crate::{coordinator::CoordinatorBuilder, http::ReqwestTransport};

#[cfg(feature = "reqwest")]
/// Gateway specialized for the crate's default reqwest transport.
pub type ReqwestGateway = Gateway<ReqwestTransport>;

/// Decorator around a [`Transport`] that makes credential expiry invisible to callers.
///
/// The gateway holds no credential state; it reads an access-token snapshot from the
/// coordinator for every send.
pub struct Gateway<T>
where
	T: ?Sized + Transport,
{
	transport: Arc<T>,
	coordinator: RefreshCoordinator,
	policy: Arc<dyn AuthFailurePolicy>,
	config: GatewayConfig,
}
impl<T> Gateway<T>
where
	T: ?Sized + Transport,
{
	/// Creates a gateway over `transport`, validating `config`.
	pub fn new(
		config: GatewayConfig,
		transport: Arc<T>,
		coordinator: RefreshCoordinator,
	) -> Result<Self> {
		config.validate()?;

		let policy = Arc::new(config.auth_failure_policy());

		Ok(Self { transport, coordinator, policy, config })
	}

	/// Replaces the authorization-failure policy derived from the configuration.
	pub fn with_policy(mut self, policy: Arc<dyn AuthFailurePolicy>) -> Self {
		self.policy = policy;

		self
	}

	/// Returns the coordinator owning the session.
	pub fn coordinator(&self) -> &RefreshCoordinator {
		&self.coordinator
	}

	/// Returns the gateway configuration.
	pub fn config(&self) -> &GatewayConfig {
		&self.config
	}

	/// Builds a call to `path` (resolved against the base URL) with the configured deadline.
	pub fn request(&self, method: Method, path: &str) -> Result<ApiRequest> {
		let url = self.config.endpoint(path)?;

		Ok(ApiRequest::new(method, url).with_timeout(self.config.request_timeout()))
	}

	/// Sends `request`, refreshing and replaying it once if the access token was rejected.
	///
	/// Non-authorization statuses are returned as `Ok`; use [`ApiResponse::error_for_status`]
	/// or [`Gateway::send_json`] to turn them into errors.
	pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
		let span = FlowSpan::new(FlowKind::Dispatch, "send");

		span.instrument(self.send_pending(PendingRequest::new(request))).await
	}

	/// Sends `request` and decodes a successful JSON body.
	pub async fn send_json<R>(&self, request: ApiRequest) -> Result<R>
	where
		R: DeserializeOwned,
	{
		let response = self.send(request).await?.error_for_status()?;

		response.json().map_err(|source| Error::Decode { source, status: response.status })
	}

	/// `GET`s `path` and decodes the JSON body.
	pub async fn get<R>(&self, path: &str) -> Result<R>
	where
		R: DeserializeOwned,
	{
		let request = self.request(Method::Get, path)?.header("accept", "application/json");

		self.send_json(request).await
	}

	/// `POST`s `body` as JSON to `path` and decodes the JSON answer.
	pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
	where
		B: ?Sized + Serialize,
		R: DeserializeOwned,
	{
		let request = self
			.request(Method::Post, path)?
			.header("accept", "application/json")
			.json(body)
			.map_err(Error::Encode)?;

		self.send_json(request).await
	}

	async fn send_pending(&self, mut pending: PendingRequest) -> Result<ApiResponse> {
		let mut token = self.coordinator.access_token();

		loop {
			let flow = pending.flow();

			obs::record_flow_outcome(flow, FlowOutcome::Attempt);

			let response = match self.transport.execute(pending.prepare(token.as_ref())).await {
				Ok(response) => response,
				Err(e) => {
					obs::record_flow_outcome(flow, FlowOutcome::Failure);

					return Err(e.into());
				},
			};

			if !self.policy.is_auth_failure(&response) {
				obs::record_flow_outcome(flow, FlowOutcome::Success);

				return Ok(response);
			}

			obs::record_flow_outcome(flow, FlowOutcome::Failure);

			if !pending.begin_retry() {
				return Err(Error::Unauthorized { status: response.status });
			}

			token = Some(self.coordinator.acquire(token.as_ref()).await?);

			self.coordinator.metrics().record_replay();
		}
	}
}
#[cfg(feature = "reqwest")]
impl Gateway<ReqwestTransport> {
	/// Builds a reqwest-backed gateway whose coordinator posts refreshes through the same
	/// client. `configure` attaches a store, listener, or shared metrics to the coordinator.
	pub fn connect(
		config: GatewayConfig,
		configure: impl FnOnce(CoordinatorBuilder) -> CoordinatorBuilder,
	) -> Result<Self> {
		config.validate()?;

		let transport = Arc::new(ReqwestTransport::with_timeout(config.request_timeout())?);
		let coordinator =
			configure(RefreshCoordinator::over_transport(&config, transport.clone())?).build();

		Self::new(config, transport, coordinator)
	}
}
impl<T> Clone for Gateway<T>
where
	T: ?Sized + Transport,
{
	fn clone(&self) -> Self {
		Self {
			transport: self.transport.clone(),
			coordinator: self.coordinator.clone(),
			policy: self.policy.clone(),
			config: self.config.clone(),
		}
	}
}
impl<T> Debug for Gateway<T>
where
	T: ?Sized + Transport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Gateway")
			.field("base_url", &self.config.base_url.as_str())
			.field("coordinator", &self.coordinator)
			.finish()
	}
}
