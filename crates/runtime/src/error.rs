use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// No response arrived before the call's deadline.
	#[error("rpc timeout after {0}ms")]
	Timeout(u64),

	#[error("channel closed")]
	ChannelClosed,

	/// The remote side answered with an error envelope.
	#[error("{0}")]
	Remote(String),

	#[error("unknown rpc class: {0}")]
	UnknownClass(String),

	#[error("unknown rpc method: {class}.{method}")]
	UnknownMethod { class: String, method: String },

	#[error("rpc instance not found: {class} id={id}")]
	MissingInstance { class: String, id: String },

	#[error("invalid parameter '{name}': {reason}")]
	InvalidParam { name: String, reason: String },

	/// No sender wired for the requested target (e.g. a remote call issued
	/// before the transport is up).
	#[error("no route to target: {0}")]
	NoRoute(String),

	#[error("transport error: {0}")]
	Transport(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}
}
