// std
use std::{
	collections::VecDeque,
	future::Future,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	task::{Context, Waker},
	time::Duration,
};
// crates.io
use parking_lot::Mutex;
use tokio::{sync::Notify, task::JoinHandle};
// self
use bearer_gateway::{
	auth::{CredentialPair, RefreshedCredentials, TokenSecret},
	coordinator::{RefreshCoordinator, SessionStatus},
	error::{Error, RefreshError, Result},
	exchange::{ExchangeFuture, RefreshExchange},
	session::SessionInvalidated,
	store::{CredentialStore, MemoryStore},
};

const WAITERS: usize = 50;

enum Outcome {
	Refreshed(&'static str, Option<&'static str>),
	Rejected(u16),
}

struct ScriptedExchange {
	calls: AtomicUsize,
	seen: Mutex<Vec<String>>,
	outcomes: Mutex<VecDeque<Outcome>>,
	release: Notify,
}
impl ScriptedExchange {
	fn new(outcomes: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
		Arc::new(Self {
			calls: AtomicUsize::new(0),
			seen: Mutex::new(Vec::new()),
			outcomes: Mutex::new(outcomes.into_iter().collect()),
			release: Notify::new(),
		})
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	fn release(&self) {
		self.release.notify_one();
	}
}
impl RefreshExchange for ScriptedExchange {
	fn exchange(&self, refresh_token: TokenSecret) -> ExchangeFuture<'_> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.seen.lock().push(refresh_token.expose().to_owned());
			self.release.notified().await;

			let next = self.outcomes.lock().pop_front();

			match next {
				Some(Outcome::Refreshed(access, refresh)) => {
					let mut refreshed = RefreshedCredentials::access(access);

					if let Some(refresh) = refresh {
						refreshed = refreshed.with_refresh_token(refresh);
					}

					Ok(refreshed)
				},
				Some(Outcome::Rejected(status)) =>
					Err(RefreshError::Rejected { status, message: "refresh token revoked".into() }),
				None => panic!("Exchange was called more often than scripted."),
			}
		})
	}
}

struct Harness {
	coordinator: RefreshCoordinator,
	exchange: Arc<ScriptedExchange>,
	store: Arc<MemoryStore>,
	signals: Arc<AtomicUsize>,
}
impl Harness {
	async fn signed_in(
		credentials: CredentialPair,
		outcomes: impl IntoIterator<Item = Outcome>,
	) -> Self {
		let exchange = ScriptedExchange::new(outcomes);
		let store = Arc::new(MemoryStore::default());
		let signals = Arc::new(AtomicUsize::new(0));
		let counter = signals.clone();
		let store_dyn: Arc<dyn CredentialStore> = store.clone();
		let coordinator = RefreshCoordinator::builder(exchange.clone())
			.with_store(store_dyn)
			.with_listener(Arc::new(move |_event: &SessionInvalidated| {
				counter.fetch_add(1, Ordering::SeqCst);
			}))
			.build();

		coordinator.sign_in(credentials).await.expect("Signing in should succeed.");

		Self { coordinator, exchange, store, signals }
	}

	fn spawn_waiters(&self, stale: &str, count: usize) -> Vec<JoinHandle<Result<TokenSecret>>> {
		(0..count)
			.map(|_| {
				let coordinator = self.coordinator.clone();
				let stale = TokenSecret::new(stale);

				tokio::spawn(async move { coordinator.acquire(Some(&stale)).await })
			})
			.collect()
	}

	async fn wait_for_waiters(&self, count: u64) {
		tokio::time::timeout(Duration::from_secs(5), async {
			while self.coordinator.metrics().waiters() < count {
				tokio::task::yield_now().await;
			}
		})
		.await
		.expect("Waiters should enlist before the timeout.");
	}

	fn signals(&self) -> usize {
		self.signals.load(Ordering::SeqCst)
	}
}

async fn settle_all(handles: Vec<JoinHandle<Result<TokenSecret>>>) -> Vec<Result<TokenSecret>> {
	let mut results = Vec::with_capacity(handles.len());

	for handle in handles {
		results.push(handle.await.expect("Waiter task should not panic."));
	}

	results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquisitions_share_one_successful_exchange() {
	let harness = Harness::signed_in(
		CredentialPair::new("access-1", "refresh-1"),
		[Outcome::Refreshed("access-2", Some("refresh-2"))],
	)
	.await;
	let handles = harness.spawn_waiters("access-1", WAITERS);

	harness.wait_for_waiters(WAITERS as u64).await;

	assert_eq!(harness.coordinator.status(), SessionStatus::Refreshing);

	harness.exchange.release();

	let results = settle_all(handles).await;

	assert_eq!(results.len(), WAITERS);

	for result in results {
		assert_eq!(result.expect("Every waiter should receive the new token.").expose(), "access-2");
	}

	assert_eq!(harness.exchange.calls(), 1);
	assert_eq!(harness.exchange.seen.lock().as_slice(), ["refresh-1".to_owned()]);
	assert_eq!(harness.coordinator.metrics().episodes(), 1);
	assert_eq!(harness.coordinator.metrics().successes(), 1);
	assert_eq!(harness.coordinator.status(), SessionStatus::Idle);
	assert_eq!(harness.coordinator.access_token().map(|t| t.expose().to_owned()), Some("access-2".into()));
	assert_eq!(harness.signals(), 0);

	let stored = harness.store.snapshot().expect("Rotated credentials should be persisted.");

	assert_eq!(stored.access_token.expose(), "access-2");
	assert_eq!(stored.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh-2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_exchange_rejects_every_waiter_and_signals_once() {
	let harness = Harness::signed_in(
		CredentialPair::new("access-1", "refresh-1"),
		[Outcome::Rejected(401)],
	)
	.await;
	let handles = harness.spawn_waiters("access-1", WAITERS);

	harness.wait_for_waiters(WAITERS as u64).await;
	harness.exchange.release();

	for result in settle_all(handles).await {
		let err = result.expect_err("Every waiter should fail with the episode.");

		assert!(
			matches!(&err, Error::SessionExpired { reason } if matches!(reason.as_ref(), RefreshError::Rejected { status: 401, .. }))
		);
		assert!(err.is_session_failure());
	}

	assert_eq!(harness.exchange.calls(), 1);
	assert_eq!(harness.signals(), 1);
	assert_eq!(harness.coordinator.status(), SessionStatus::LoggedOut);
	assert!(harness.coordinator.access_token().is_none());
	assert!(harness.store.snapshot().is_none());

	let err = harness
		.coordinator
		.acquire(Some(&TokenSecret::new("access-1")))
		.await
		.expect_err("A logged-out coordinator should reject new acquisitions.");

	assert!(matches!(err, Error::AuthenticationRequired));
	assert_eq!(harness.exchange.calls(), 1);
	assert_eq!(harness.signals(), 1);
}

#[tokio::test]
async fn missing_refresh_token_short_circuits_without_exchange() {
	let harness = Harness::signed_in(CredentialPair::access_only("access-1"), []).await;
	let err = harness
		.coordinator
		.acquire(Some(&TokenSecret::new("access-1")))
		.await
		.expect_err("Acquisition without a refresh token should fail.");

	assert!(
		matches!(&err, Error::SessionExpired { reason } if matches!(reason.as_ref(), RefreshError::MissingRefreshToken))
	);
	assert_eq!(harness.exchange.calls(), 0);
	assert_eq!(harness.signals(), 1);
	assert_eq!(harness.coordinator.metrics().short_circuits(), 1);
	assert_eq!(harness.coordinator.status(), SessionStatus::LoggedOut);
	assert!(harness.store.snapshot().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sign_in_rearms_after_failed_episode() {
	let harness = Harness::signed_in(
		CredentialPair::new("access-1", "refresh-1"),
		[Outcome::Rejected(400), Outcome::Refreshed("access-4", None)],
	)
	.await;

	harness.exchange.release();
	harness
		.coordinator
		.acquire(Some(&TokenSecret::new("access-1")))
		.await
		.expect_err("First episode should fail.");

	assert_eq!(harness.coordinator.status(), SessionStatus::LoggedOut);

	harness
		.coordinator
		.sign_in(CredentialPair::new("access-3", "refresh-3"))
		.await
		.expect("Signing in again should succeed.");
	harness.exchange.release();

	let token = harness
		.coordinator
		.acquire(Some(&TokenSecret::new("access-3")))
		.await
		.expect("A fresh episode should succeed after re-login.");

	assert_eq!(token.expose(), "access-4");
	assert_eq!(harness.exchange.calls(), 2);
	assert_eq!(
		harness.exchange.seen.lock().as_slice(),
		["refresh-1".to_owned(), "refresh-3".to_owned()]
	);
	assert_eq!(harness.coordinator.metrics().episodes(), 2);
	assert_eq!(harness.signals(), 1);

	let stored = harness.store.snapshot().expect("Re-armed session should be persisted.");

	assert_eq!(stored.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh-3"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_episode_owner_does_not_strand_other_waiters() {
	let harness = Harness::signed_in(
		CredentialPair::new("access-1", "refresh-1"),
		[Outcome::Refreshed("access-2", None)],
	)
	.await;
	let owner = harness.spawn_waiters("access-1", 1);

	harness.wait_for_waiters(1).await;

	let others = harness.spawn_waiters("access-1", 3);

	harness.wait_for_waiters(4).await;

	for handle in &owner {
		handle.abort();
	}

	harness.exchange.release();

	for result in settle_all(others).await {
		assert_eq!(result.expect("Remaining waiters should still settle.").expose(), "access-2");
	}

	assert_eq!(harness.exchange.calls(), 1);
	assert_eq!(harness.coordinator.status(), SessionStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn logout_during_episode_rejects_waiters_without_signal() {
	let harness = Harness::signed_in(
		CredentialPair::new("access-1", "refresh-1"),
		[Outcome::Refreshed("access-2", None)],
	)
	.await;
	let handles = harness.spawn_waiters("access-1", 5);

	harness.wait_for_waiters(5).await;
	harness.coordinator.logout().await.expect("Logout should succeed.");

	for result in settle_all(handles).await {
		assert!(matches!(
			result.expect_err("Logout should reject pending waiters."),
			Error::AuthenticationRequired
		));
	}

	harness.exchange.release();
	// The superseded exchange must not resurrect the session.
	tokio::time::sleep(Duration::from_millis(50)).await;

	assert_eq!(harness.coordinator.status(), SessionStatus::LoggedOut);
	assert!(harness.store.snapshot().is_none());
	assert_eq!(harness.signals(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sign_in_during_episode_releases_waiters_with_new_token() {
	let harness = Harness::signed_in(
		CredentialPair::new("access-1", "refresh-1"),
		[Outcome::Refreshed("access-stale", None)],
	)
	.await;
	let handles = harness.spawn_waiters("access-1", 3);

	harness.wait_for_waiters(3).await;
	harness
		.coordinator
		.sign_in(CredentialPair::new("access-fresh", "refresh-fresh"))
		.await
		.expect("Signing in mid-episode should succeed.");

	for result in settle_all(handles).await {
		assert_eq!(result.expect("Waiters should adopt the new session.").expose(), "access-fresh");
	}

	harness.exchange.release();
	tokio::time::sleep(Duration::from_millis(50)).await;

	assert_eq!(
		harness.coordinator.access_token().map(|t| t.expose().to_owned()),
		Some("access-fresh".into())
	);
	assert_eq!(
		harness.store.snapshot().map(|c| c.access_token.expose().to_owned()),
		Some("access-fresh".into())
	);
}

#[tokio::test]
async fn stale_token_after_settled_episode_is_served_immediately() {
	let harness = Harness::signed_in(
		CredentialPair::new("access-1", "refresh-1"),
		[Outcome::Refreshed("access-2", None)],
	)
	.await;

	harness.exchange.release();
	harness
		.coordinator
		.acquire(Some(&TokenSecret::new("access-1")))
		.await
		.expect("Episode should succeed.");

	let late = harness
		.coordinator
		.acquire(Some(&TokenSecret::new("access-1")))
		.await
		.expect("A late 401 should reuse the refreshed token.");

	assert_eq!(late.expose(), "access-2");
	assert_eq!(harness.exchange.calls(), 1);
	assert_eq!(harness.coordinator.metrics().episodes(), 1);
}

#[tokio::test]
async fn restore_installs_persisted_credentials() {
	let store = Arc::new(MemoryStore::seeded(CredentialPair::new("access-saved", "refresh-saved")));
	let store_dyn: Arc<dyn CredentialStore> = store.clone();
	let coordinator = RefreshCoordinator::builder(ScriptedExchange::new([]))
		.with_store(store_dyn)
		.build();

	assert_eq!(coordinator.status(), SessionStatus::LoggedOut);
	assert!(coordinator.restore().await.expect("Restoring should succeed."));
	assert_eq!(coordinator.status(), SessionStatus::Idle);
	assert_eq!(
		coordinator.access_token().map(|t| t.expose().to_owned()),
		Some("access-saved".into())
	);
	assert!(!coordinator.restore().await.expect("Restoring twice should succeed."));
}

fn current_thread_runtime() -> tokio::runtime::Runtime {
	tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.expect("Failed to build Tokio runtime for abandonment test.")
}

/// Coordinator whose listener records whether the store still held credentials.
fn watched_coordinator(
	outcomes: impl IntoIterator<Item = Outcome>,
) -> (RefreshCoordinator, Arc<ScriptedExchange>, Arc<Mutex<Vec<bool>>>) {
	let exchange = ScriptedExchange::new(outcomes);
	let store = Arc::new(MemoryStore::default());
	let held = Arc::new(Mutex::new(Vec::new()));
	let (watched, record) = (store.clone(), held.clone());
	let store_dyn: Arc<dyn CredentialStore> = store;
	let coordinator = RefreshCoordinator::builder(exchange.clone())
		.with_store(store_dyn)
		.with_listener(Arc::new(move |_event: &SessionInvalidated| {
			record.lock().push(watched.snapshot().is_some());
		}))
		.build();

	(coordinator, exchange, held)
}

#[tokio::test]
async fn store_is_cleared_before_short_circuit_signal() {
	let (coordinator, _exchange, held) = watched_coordinator([]);

	coordinator
		.sign_in(CredentialPair::access_only("access-1"))
		.await
		.expect("Signing in should succeed.");
	coordinator
		.acquire(Some(&TokenSecret::new("access-1")))
		.await
		.expect_err("Acquisition without a refresh token should fail.");

	assert_eq!(held.lock().as_slice(), [false]);
}

#[tokio::test]
async fn store_is_cleared_before_failed_episode_signal() {
	let (coordinator, exchange, held) = watched_coordinator([Outcome::Rejected(401)]);

	coordinator
		.sign_in(CredentialPair::new("access-1", "refresh-1"))
		.await
		.expect("Signing in should succeed.");
	exchange.release();
	coordinator
		.acquire(Some(&TokenSecret::new("access-1")))
		.await
		.expect_err("A rejected exchange should fail the acquisition.");

	assert_eq!(held.lock().as_slice(), [false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_exchange_fails_waiters_as_abandoned() {
	// No scripted outcome: the exchange panics once released.
	let harness = Harness::signed_in(CredentialPair::new("access-1", "refresh-1"), []).await;
	let handles = harness.spawn_waiters("access-1", 5);

	harness.wait_for_waiters(5).await;
	harness.exchange.release();

	for result in settle_all(handles).await {
		let err = result.expect_err("Waiters should fail when the exchange panics.");

		assert!(matches!(
			&err,
			Error::SessionExpired { reason } if matches!(reason.as_ref(), RefreshError::Abandoned)
		));
	}

	assert_eq!(harness.exchange.calls(), 1);
	assert_eq!(harness.signals(), 1);
	assert_eq!(harness.coordinator.status(), SessionStatus::LoggedOut);
	assert_eq!(harness.coordinator.metrics().failures(), 1);
}

#[test]
fn episode_task_dropped_before_polling_releases_waiters() {
	let first = current_thread_runtime();
	let harness =
		first.block_on(Harness::signed_in(CredentialPair::new("access-1", "refresh-1"), []));
	let stale = TokenSecret::new("access-1");
	let mut pending = Box::pin(harness.coordinator.acquire(Some(&stale)));

	{
		let _entered = first.enter();

		assert!(pending.as_mut().poll(&mut Context::from_waker(Waker::noop())).is_pending());
	}

	assert_eq!(harness.coordinator.status(), SessionStatus::Refreshing);

	// Shutting the runtime down drops the spawned episode task without ever running it.
	drop(first);

	assert_eq!(harness.coordinator.status(), SessionStatus::LoggedOut);
	assert_eq!(harness.signals(), 1);

	let second = current_thread_runtime();
	let _entered = second.enter();
	let err = second
		.block_on(tokio::time::timeout(Duration::from_secs(5), pending))
		.expect("The pending acquisition should settle instead of hanging.")
		.expect_err("The abandoned episode should fail its waiter.");

	assert!(matches!(
		&err,
		Error::SessionExpired { reason } if matches!(reason.as_ref(), RefreshError::Abandoned)
	));

	let err = second
		.block_on(tokio::time::timeout(
			Duration::from_secs(5),
			harness.coordinator.acquire(Some(&stale)),
		))
		.expect("Later acquisitions should not join the dead episode.")
		.expect_err("The session should be gone after abandonment.");

	assert!(matches!(err, Error::AuthenticationRequired));
	assert_eq!(harness.exchange.calls(), 0);
}
