// self
use crate::obs::{FlowKind, FlowOutcome};

/// Counter incremented for every dispatch, replay, and refresh outcome.
pub const FLOW_COUNTER: &str = "bearer_gateway_flow_total";

/// Bumps [`FLOW_COUNTER`] for one gateway send or refresh episode.
///
/// A no-op unless the `metrics` feature is enabled and a global recorder is installed.
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!(FLOW_COUNTER, "flow" => kind.as_str(), "outcome" => outcome.as_str())
		.increment(1);

	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}
