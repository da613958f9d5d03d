//! Correlated RPC request/response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::DEFAULT_RPC_TIMEOUT_MS;

/// A remote method invocation addressed to a registered handler class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
	/// Unique id used to correlate the eventual response.
	pub request_id: String,
	pub class_name: String,
	pub method_name: String,
	/// Optional instance id, resolved by the target's instance lookup.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default)]
	pub params: Map<String, Value>,
	/// When set, the server forwards the call to this device instead of
	/// handling it locally.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_id: Option<String>,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
	DEFAULT_RPC_TIMEOUT_MS
}

/// The answer to an [`RpcRequest`]: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
	pub request_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl RpcResponse {
	pub fn ok(request_id: impl Into<String>, result: Value) -> Self {
		Self {
			request_id: request_id.into(),
			result: Some(result),
			error: None,
		}
	}

	pub fn err(request_id: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			request_id: request_id.into(),
			result: None,
			error: Some(message.into()),
		}
	}

	pub fn is_err(&self) -> bool {
		self.error.is_some()
	}
}
