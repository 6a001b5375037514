//! Bearer-token API gateway that keeps concurrent requests correct while access tokens expire
//! underneath them: one refresh per expiry episode, every affected caller replayed or failed
//! as a batch, and a single session-invalidated signal when the session is gone.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod exchange;
pub mod gateway;
pub mod http;
pub mod obs;
pub mod session;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::CredentialPair,
		config::GatewayConfig,
		coordinator::RefreshCoordinator,
		gateway::Gateway,
		http::ReqwestTransport,
		store::{CredentialStore, MemoryStore},
	};

	/// Gateway type alias used by reqwest-backed integration tests.
	pub type ReqwestTestGateway = Gateway<ReqwestTransport>;

	/// Builds a reqwest transport that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_transport() -> ReqwestTransport {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestTransport::with_client(client)
	}

	/// Constructs a [`Gateway`] against `base_url`, backed by an in-memory credential store
	/// and signed in with the provided pair.
	pub async fn build_reqwest_test_gateway(
		base_url: &str,
		credentials: CredentialPair,
	) -> (ReqwestTestGateway, Arc<MemoryStore>) {
		let base_url = Url::parse(base_url).expect("Failed to parse test base URL.");
		let config = GatewayConfig::new(base_url);
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let transport = Arc::new(test_reqwest_transport());
		let coordinator = RefreshCoordinator::over_transport(&config, transport.clone())
			.expect("Failed to build refresh coordinator for tests.")
			.with_store(store)
			.build();

		coordinator
			.sign_in(credentials)
			.await
			.expect("Signing in the test coordinator should succeed.");

		let gateway = Gateway::new(config, transport, coordinator)
			.expect("Failed to build reqwest test gateway.");

		(gateway, store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
