use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("unknown app: {0}")]
	UnknownApp(String),

	#[error("unknown page: {0}")]
	UnknownPage(String),

	#[error("page already defined: {0}")]
	PageExists(String),

	/// The pages live in disjoint trees.
	#[error("no path from {from} to {to}")]
	NoPath { from: String, to: String },

	/// A transition action ran but the destination's match rules did not
	/// hold afterwards; the walk stops at the last confirmed page.
	#[error("transition failed: {from} -> {to}")]
	Transition { from: String, to: String },

	#[error("invalid session transition: {state} on {event}")]
	InvalidSession { state: &'static str, event: &'static str },

	#[error("invalid match rule '{rule}': {reason}")]
	InvalidRule { rule: String, reason: String },

	#[error("invalid command pattern '{pattern}': {reason}")]
	InvalidCommand { pattern: String, reason: String },

	#[error("unknown action: {0}")]
	UnknownAction(String),

	#[error("unknown field: {0}")]
	UnknownField(String),

	#[error("device not found: {0}")]
	DeviceNotFound(String),

	#[error("device not connected: {0}")]
	NotConnected(String),

	#[error("task not found: {0}")]
	TaskNotFound(String),

	#[error("checker not found: {0}")]
	CheckerNotFound(String),

	/// A capability call into the device agent failed.
	#[error("agent: {0}")]
	Agent(String),

	#[error(transparent)]
	Rpc(#[from] fleet_runtime::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
