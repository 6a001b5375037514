//! Session-invalidated signal consumed by the surrounding application.

// self
use crate::{_prelude::*, error::RefreshError};

/// Emitted exactly once per failed refresh episode.
#[derive(Clone, Debug)]
pub struct SessionInvalidated {
	/// Identifier of the failed episode.
	pub episode: u64,
	/// Number of callers rejected together with the episode.
	pub waiters: usize,
	/// Failure that ended the session.
	pub reason: Arc<RefreshError>,
	/// Instant the episode failed.
	pub at: OffsetDateTime,
}

/// Receiver of [`SessionInvalidated`] events, typically the UI/navigation layer.
///
/// Called synchronously from the task that settled the episode, after every waiter has
/// been rejected; implementations should hand off heavy work instead of blocking.
pub trait SessionListener: Send + Sync {
	/// Reacts to the session being discarded.
	fn session_invalidated(&self, event: &SessionInvalidated);
}
impl<F> SessionListener for F
where
	F: Fn(&SessionInvalidated) + Send + Sync,
{
	fn session_invalidated(&self, event: &SessionInvalidated) {
		self(event)
	}
}

/// Listener that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;
impl SessionListener for NoopListener {
	fn session_invalidated(&self, _event: &SessionInvalidated) {}
}
