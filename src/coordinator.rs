//! Single-flight refresh coordination with fan-out settlement.
//!
//! [`RefreshCoordinator`] owns the [`CredentialPair`] and a tagged session phase:
//!
//! - `Idle(pair)`: no refresh in progress.
//! - `Refreshing(episode)`: one exchange in flight; the episode owns the waiter list.
//! - `LoggedOut`: no credentials; acquisitions fail without touching the network.
//!
//! The phase and the waiter list live behind one lock, so observing `Idle`, opening an
//! episode, and enqueueing its first waiter is a single indivisible step. The exchange runs
//! on a spawned task: cancelling any caller, including the one that opened the episode,
//! never strands the other waiters. When the exchange settles, every waiter receives the
//! same outcome and the lock-protected phase moves back to `Idle` (or to `LoggedOut`, with
//! exactly one [`SessionInvalidated`] event).

mod metrics;

pub use metrics::RefreshMetrics;

// std
use std::mem;
// crates.io
use tokio::{runtime::Handle, sync::oneshot};
// self
use crate::{
	_prelude::*,
	auth::{CredentialPair, RefreshedCredentials, TokenSecret},
	config::GatewayConfig,
	error::{ConfigError, RefreshError},
	exchange::{HttpRefreshExchange, RefreshExchange},
	http::Transport,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	session::{NoopListener, SessionInvalidated, SessionListener},
	store::{CredentialStore, StoreError},
};

type Settlement = Result<TokenSecret, Rejection>;
type Waiter = oneshot::Sender<Settlement>;

/// Coarse view of the coordinator phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionStatus {
	/// Credentials installed, no refresh in flight.
	Idle,
	/// A refresh exchange is in flight.
	Refreshing,
	/// No credentials; a sign-in is required.
	LoggedOut,
}

#[derive(Clone, Debug)]
enum Rejection {
	Refresh(Arc<RefreshError>),
	SignedOut,
}
impl From<Rejection> for Error {
	fn from(rejection: Rejection) -> Self {
		match rejection {
			Rejection::Refresh(reason) => Error::SessionExpired { reason },
			Rejection::SignedOut => Error::AuthenticationRequired,
		}
	}
}

struct Episode {
	id: u64,
	credentials: CredentialPair,
	waiters: Vec<Waiter>,
}

enum Phase {
	Idle(CredentialPair),
	Refreshing(Episode),
	LoggedOut,
}

struct Session {
	phase: Phase,
	next_episode: u64,
}
impl Session {
	fn open_episode(&mut self) -> u64 {
		self.next_episode += 1;

		self.next_episode
	}

	/// Removes the episode `id` if it is still the current one, leaving `LoggedOut` behind.
	fn take_episode(&mut self, id: u64) -> Option<Episode> {
		if !matches!(&self.phase, Phase::Refreshing(episode) if episode.id == id) {
			return None;
		}

		match mem::replace(&mut self.phase, Phase::LoggedOut) {
			Phase::Refreshing(episode) => Some(episode),
			other => {
				self.phase = other;

				None
			},
		}
	}
}

enum Enlistment {
	Ready(TokenSecret),
	Started { episode: u64, refresh_token: TokenSecret, receiver: oneshot::Receiver<Settlement> },
	Joined(oneshot::Receiver<Settlement>),
	ShortCircuited { episode: u64 },
	SignedOut,
}

struct Inner {
	session: Mutex<Session>,
	exchange: Arc<dyn RefreshExchange>,
	store: Option<Arc<dyn CredentialStore>>,
	listener: Arc<dyn SessionListener>,
	persist_gate: AsyncMutex<()>,
	metrics: Arc<RefreshMetrics>,
}
impl Inner {
	fn enlist(&self, stale: Option<&TokenSecret>) -> Enlistment {
		let mut session = self.session.lock();
		let credentials = match mem::replace(&mut session.phase, Phase::LoggedOut) {
			Phase::LoggedOut => return Enlistment::SignedOut,
			Phase::Refreshing(mut episode) => {
				let (sender, receiver) = oneshot::channel();

				episode.waiters.push(sender);
				session.phase = Phase::Refreshing(episode);
				self.metrics.record_waiter();

				return Enlistment::Joined(receiver);
			},
			// An episode that finished after this call was sent already replaced the token.
			Phase::Idle(credentials) if stale != Some(&credentials.access_token) => {
				let token = credentials.access_token.clone();

				session.phase = Phase::Idle(credentials);

				return Enlistment::Ready(token);
			},
			Phase::Idle(credentials) => credentials,
		};
		let episode = session.open_episode();

		self.metrics.record_episode();

		match credentials.refresh_token.clone() {
			Some(refresh_token) => {
				let (sender, receiver) = oneshot::channel();

				session.phase =
					Phase::Refreshing(Episode { id: episode, credentials, waiters: vec![sender] });
				self.metrics.record_waiter();
				obs::episode_event(episode, "started", 1);

				Enlistment::Started { episode, refresh_token, receiver }
			},
			// Phase stays `LoggedOut`; the credentials are dropped here.
			None => {
				self.metrics.record_short_circuit();

				Enlistment::ShortCircuited { episode }
			},
		}
	}

	/// Closes episode `id` with refreshed credentials, returning its waiters and the new token.
	fn conclude_success(
		&self,
		id: u64,
		refreshed: RefreshedCredentials,
	) -> Option<(Vec<Waiter>, TokenSecret)> {
		let mut session = self.session.lock();
		let episode = session.take_episode(id)?;
		let credentials = episode.credentials.rotate(refreshed);
		let token = credentials.access_token.clone();

		session.phase = Phase::Idle(credentials);
		drop(session);
		self.metrics.record_success();
		obs::episode_event(id, "refreshed", episode.waiters.len());

		Some((episode.waiters, token))
	}

	/// Closes episode `id` as failed; the phase is left `LoggedOut`.
	fn conclude_failure(&self, id: u64) -> Option<Vec<Waiter>> {
		let episode = self.session.lock().take_episode(id)?;

		self.metrics.record_failure();

		Some(episode.waiters)
	}

	fn release(waiters: Vec<Waiter>, token: &TokenSecret) {
		for waiter in waiters {
			// A dropped receiver belongs to a caller that stopped waiting.
			let _ = waiter.send(Ok(token.clone()));
		}
	}

	/// Rejects every waiter of a failed episode, then emits the session-invalidated signal.
	fn reject(&self, id: u64, waiters: Vec<Waiter>, reason: Arc<RefreshError>) {
		let count = waiters.len();

		obs::warn_event(Some(id), "refresh episode failed", reason.as_ref());

		for waiter in waiters {
			let _ = waiter.send(Err(Rejection::Refresh(reason.clone())));
		}

		self.invalidate(id, count, reason);
	}

	fn invalidate(&self, episode: u64, waiters: usize, reason: Arc<RefreshError>) {
		let event = SessionInvalidated { episode, waiters, reason, at: OffsetDateTime::now_utc() };

		self.listener.session_invalidated(&event);
	}

	/// Replaces the phase, releasing the waiters of any episode that was in flight.
	fn replace_phase(&self, phase: Phase, superseded: impl Fn() -> Settlement) {
		let previous = mem::replace(&mut self.session.lock().phase, phase);

		if let Phase::Refreshing(episode) = previous {
			obs::episode_event(episode.id, "superseded", episode.waiters.len());

			for waiter in episode.waiters {
				let _ = waiter.send(superseded());
			}
		}
	}

	/// Mirrors the current phase into the credential store.
	///
	/// Runs under the persistence gate and snapshots the phase only after acquiring it, so
	/// racing mutations converge on whatever phase was current last.
	async fn sync_store(&self) -> Result<(), StoreError> {
		let Some(store) = &self.store else {
			return Ok(());
		};
		let _gate = self.persist_gate.lock().await;
		let snapshot = {
			let session = self.session.lock();

			match &session.phase {
				Phase::Idle(credentials) => Some(Some(credentials.clone())),
				Phase::LoggedOut => Some(None),
				Phase::Refreshing(_) => None,
			}
		};

		match snapshot {
			Some(Some(credentials)) => store.save(credentials).await,
			Some(None) => store.clear().await,
			None => Ok(()),
		}
	}

	async fn sync_store_quietly(&self, episode: u64) {
		if let Err(e) = self.sync_store().await {
			obs::warn_event(Some(episode), "credential store sync failed", &e);
		}
	}
}

/// Settles the episode as abandoned if it is dropped before the exchange returns.
///
/// Armed before the episode task is spawned, so a task that never gets polled still
/// releases its waiters.
struct EpisodeGuard {
	inner: Arc<Inner>,
	id: u64,
	armed: bool,
}
impl EpisodeGuard {
	fn armed(inner: Arc<Inner>, id: u64) -> Self {
		Self { inner, id, armed: true }
	}
}
impl Drop for EpisodeGuard {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}
		if let Some(waiters) = self.inner.conclude_failure(self.id) {
			self.inner.reject(self.id, waiters, Arc::new(RefreshError::Abandoned));
		}
	}
}

async fn run_episode(mut guard: EpisodeGuard, refresh_token: TokenSecret) {
	const KIND: FlowKind = FlowKind::Refresh;

	let inner = guard.inner.clone();
	let id = guard.id;
	let span = FlowSpan::new(KIND, "run_episode");

	obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
	inner.metrics.record_exchange();

	let outcome = span.instrument(inner.exchange.exchange(refresh_token)).await;

	guard.armed = false;

	// The store is synced before fan-out so released callers observe persisted state. An
	// episode superseded by sign-in or logout is discarded; that call already synced the store.
	match outcome {
		Ok(refreshed) => {
			obs::record_flow_outcome(KIND, FlowOutcome::Success);

			let Some((waiters, token)) = inner.conclude_success(id, refreshed) else {
				obs::episode_event(id, "discarded", 0);

				return;
			};

			inner.sync_store_quietly(id).await;
			Inner::release(waiters, &token);
		},
		Err(e) => {
			obs::record_flow_outcome(KIND, FlowOutcome::Failure);

			let Some(waiters) = inner.conclude_failure(id) else {
				obs::episode_event(id, "discarded", 0);

				return;
			};

			inner.sync_store_quietly(id).await;
			inner.reject(id, waiters, Arc::new(e));
		},
	}
}

/// Owns the credential pair and guarantees at most one refresh exchange at a time.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct RefreshCoordinator {
	inner: Arc<Inner>,
}
impl RefreshCoordinator {
	/// Starts building a coordinator around `exchange`.
	pub fn builder(exchange: Arc<dyn RefreshExchange>) -> CoordinatorBuilder {
		CoordinatorBuilder::new(exchange)
	}

	/// Starts building a coordinator whose exchange posts to the configured refresh endpoint
	/// through `transport`.
	pub fn over_transport<T>(config: &GatewayConfig, transport: Arc<T>) -> Result<CoordinatorBuilder>
	where
		T: Transport,
	{
		let exchange = HttpRefreshExchange::from_config(config, transport)?;

		Ok(Self::builder(Arc::new(exchange)))
	}

	/// Returns a snapshot of the current access token, if a session is installed.
	///
	/// While an episode is in flight this is still the stale token; calls made with it fail
	/// and join the episode.
	pub fn access_token(&self) -> Option<TokenSecret> {
		match &self.inner.session.lock().phase {
			Phase::Idle(credentials) => Some(credentials.access_token.clone()),
			Phase::Refreshing(episode) => Some(episode.credentials.access_token.clone()),
			Phase::LoggedOut => None,
		}
	}

	/// Returns the current phase.
	pub fn status(&self) -> SessionStatus {
		match &self.inner.session.lock().phase {
			Phase::Idle(_) => SessionStatus::Idle,
			Phase::Refreshing(_) => SessionStatus::Refreshing,
			Phase::LoggedOut => SessionStatus::LoggedOut,
		}
	}

	/// Returns the shared refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.inner.metrics
	}

	/// Loads persisted credentials when no session is installed yet.
	///
	/// Returns `true` when a pair was restored.
	pub async fn restore(&self) -> Result<bool> {
		let Some(store) = &self.inner.store else {
			return Ok(false);
		};
		let _gate = self.inner.persist_gate.lock().await;
		let Some(credentials) = store.load().await? else {
			return Ok(false);
		};
		let mut session = self.inner.session.lock();

		if !matches!(session.phase, Phase::LoggedOut) {
			return Ok(false);
		}

		session.phase = Phase::Idle(credentials);

		Ok(true)
	}

	/// Installs a freshly obtained pair, re-arming a logged-out coordinator.
	///
	/// Callers waiting on an in-flight episode are released with the new access token; the
	/// superseded exchange's result is discarded.
	pub async fn sign_in(&self, credentials: CredentialPair) -> Result<()> {
		let token = credentials.access_token.clone();

		self.inner.replace_phase(Phase::Idle(credentials), || Ok(token.clone()));
		self.inner.sync_store().await?;

		Ok(())
	}

	/// Discards the session. Waiters of an in-flight episode fail with
	/// [`Error::AuthenticationRequired`]; no session-invalidated event is emitted.
	pub async fn logout(&self) -> Result<()> {
		self.inner.replace_phase(Phase::LoggedOut, || Err(Rejection::SignedOut));
		self.inner.sync_store().await?;

		Ok(())
	}

	/// Obtains an access token newer than `stale`, the token a call was just rejected with.
	///
	/// - `LoggedOut`: fails with [`Error::AuthenticationRequired`], no network access.
	/// - `Idle` with a token different from `stale`: returns it immediately.
	/// - `Idle` otherwise: opens an episode and waits for it; without a refresh token the
	///   episode fails at once and the session is invalidated.
	/// - `Refreshing`: joins the current episode.
	///
	/// Opening an episode outside a Tokio runtime fails that episode as abandoned and returns
	/// [`ConfigError::MissingRuntime`].
	pub async fn acquire(&self, stale: Option<&TokenSecret>) -> Result<TokenSecret> {
		match self.inner.enlist(stale) {
			Enlistment::Ready(token) => Ok(token),
			Enlistment::SignedOut => Err(Error::AuthenticationRequired),
			Enlistment::ShortCircuited { episode } => {
				let reason = Arc::new(RefreshError::MissingRefreshToken);

				self.inner.sync_store_quietly(episode).await;
				obs::warn_event(Some(episode), "refresh episode failed", reason.as_ref());
				self.inner.invalidate(episode, 1, reason.clone());

				Err(Error::SessionExpired { reason })
			},
			Enlistment::Started { episode, refresh_token, receiver } => {
				let guard = EpisodeGuard::armed(self.inner.clone(), episode);
				// Without a runtime the guard drops here and fails the episode as abandoned.
				let runtime = Handle::try_current().map_err(|_| ConfigError::MissingRuntime)?;

				runtime.spawn(run_episode(guard, refresh_token));

				Self::await_settlement(receiver).await
			},
			Enlistment::Joined(receiver) => Self::await_settlement(receiver).await,
		}
	}

	async fn await_settlement(receiver: oneshot::Receiver<Settlement>) -> Result<TokenSecret> {
		match receiver.await {
			Ok(Ok(token)) => Ok(token),
			Ok(Err(rejection)) => Err(rejection.into()),
			Err(_) => Err(Error::EpisodeAbandoned),
		}
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("status", &self.status())
			.field("store_set", &self.inner.store.is_some())
			.field("metrics", &self.inner.metrics)
			.finish()
	}
}

/// Builder for [`RefreshCoordinator`]. The coordinator starts `LoggedOut`.
pub struct CoordinatorBuilder {
	exchange: Arc<dyn RefreshExchange>,
	store: Option<Arc<dyn CredentialStore>>,
	listener: Arc<dyn SessionListener>,
	metrics: Arc<RefreshMetrics>,
}
impl CoordinatorBuilder {
	/// Creates a builder around `exchange` with no store and a no-op listener.
	pub fn new(exchange: Arc<dyn RefreshExchange>) -> Self {
		Self {
			exchange,
			store: None,
			listener: Arc::new(NoopListener),
			metrics: Default::default(),
		}
	}

	/// Mirrors session changes into `store`.
	pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Receives the session-invalidated signal.
	pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
		self.listener = listener;

		self
	}

	/// Shares counters with another component.
	pub fn with_metrics(mut self, metrics: Arc<RefreshMetrics>) -> Self {
		self.metrics = metrics;

		self
	}

	/// Builds the coordinator.
	pub fn build(self) -> RefreshCoordinator {
		let inner = Inner {
			session: Mutex::new(Session { phase: Phase::LoggedOut, next_episode: 0 }),
			exchange: self.exchange,
			store: self.store,
			listener: self.listener,
			persist_gate: AsyncMutex::new(()),
			metrics: self.metrics,
		};

		RefreshCoordinator { inner: Arc::new(inner) }
	}
}
impl Debug for CoordinatorBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CoordinatorBuilder").field("store_set", &self.store.is_some()).finish()
	}
}
