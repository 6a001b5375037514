//! Per-call retry guard.

// self
use crate::{_prelude::*, auth::TokenSecret, http::ApiRequest, obs::FlowKind};

/// One logical call: the original description plus its single-retry flag.
///
/// The flag flips at most once, so a call is sent at most twice no matter how many refresh
/// episodes happen during its lifetime.
#[derive(Clone, Debug)]
pub struct PendingRequest {
	call: ApiRequest,
	retried: bool,
}
impl PendingRequest {
	/// Wraps a call that has not been sent yet.
	pub fn new(call: ApiRequest) -> Self {
		Self { call, retried: false }
	}

	/// Returns the original call description.
	pub fn call(&self) -> &ApiRequest {
		&self.call
	}

	/// Returns `true` once the call has been replayed.
	pub fn is_retried(&self) -> bool {
		self.retried
	}

	/// Claims the single replay. Returns `false` when it was already used, which makes the
	/// current authorization failure terminal.
	pub fn begin_retry(&mut self) -> bool {
		if self.retried {
			return false;
		}

		self.retried = true;

		true
	}

	/// Returns the flow the next send belongs to.
	pub fn flow(&self) -> FlowKind {
		if self.retried { FlowKind::Replay } else { FlowKind::Dispatch }
	}

	/// Copies the call with `token` attached as the bearer credential.
	pub fn prepare(&self, token: Option<&TokenSecret>) -> ApiRequest {
		match token {
			Some(token) => self.call.clone().header("authorization", token.bearer()),
			None => self.call.clone(),
		}
	}
}
