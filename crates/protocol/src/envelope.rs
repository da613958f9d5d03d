//! The event-typed transport envelope.
//!
//! Every frame on the wire is one [`Envelope`], tagged by event type. Task
//! lifecycle updates carry only the fields that changed, never a ground-up
//! re-send, to bound update-channel bandwidth.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rpc::{RpcRequest, RpcResponse};
use crate::types::{ClientKind, LoginPayload, TaskState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
	Connect {
		device_id: String,
		client_type: ClientKind,
	},
	Disconnect {
		device_id: String,
	},
	Login {
		device_id: String,
	},
	LoginResult {
		payload: LoginPayload,
	},
	Logout {
		device_id: String,
	},
	/// A textual command for the receiving side's dispatcher.
	DoCommand {
		command: String,
		sender_id: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		data: Option<Value>,
	},
	/// Dispatch outcome, severity-tagged per the result convention.
	CommandResult {
		result: String,
		device_id: String,
		command: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		handler_name: Option<String>,
	},
	RpcCall(RpcRequest),
	RpcResult(RpcResponse),
	StartTask {
		device_id: String,
		app_name: String,
		task_name: String,
	},
	/// Delta update: only changed fields are present.
	UpdateTask {
		device_id: String,
		app_name: String,
		task_name: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		progress: Option<f64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		score: Option<i64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		state: Option<TaskState>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		life: Option<i64>,
	},
	StopTask {
		device_id: String,
		app_name: String,
		task_name: String,
	},
	TaskEnd {
		device_id: String,
		app_name: String,
		task_name: String,
		result: bool,
		score: i64,
	},
	CancelTask {
		device_id: String,
		app_name: String,
		task_name: String,
	},
	/// Base64-encoded screenshot bytes; storage is external to the core.
	Screenshot {
		device_id: String,
		data: String,
	},
}

impl Envelope {
	/// Wraps raw screenshot bytes for the wire.
	pub fn screenshot(device_id: impl Into<String>, bytes: &[u8]) -> Self {
		Self::Screenshot {
			device_id: device_id.into(),
			data: BASE64.encode(bytes),
		}
	}

	/// Decodes a [`Envelope::Screenshot`] payload back to bytes.
	pub fn screenshot_bytes(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
		BASE64.decode(data)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tagged_by_event_type() {
		let env = Envelope::Connect {
			device_id: "D1".into(),
			client_type: ClientKind::Device,
		};
		let json = serde_json::to_value(&env).unwrap();
		assert_eq!(json["type"], "connect");
		assert_eq!(json["device_id"], "D1");

		let back: Envelope = serde_json::from_value(json).unwrap();
		assert_eq!(back, env);
	}

	#[test]
	fn rpc_call_nests_request() {
		let env = Envelope::RpcCall(RpcRequest {
			request_id: "r1".into(),
			class_name: "device".into(),
			method_name: "getAppList".into(),
			id: None,
			params: Default::default(),
			device_id: None,
			timeout_ms: 8_000,
		});
		let json = serde_json::to_value(&env).unwrap();
		assert_eq!(json["type"], "rpc_call");
		assert_eq!(json["class_name"], "device");
	}

	#[test]
	fn update_task_omits_unchanged_fields() {
		let env = Envelope::UpdateTask {
			device_id: "D1".into(),
			app_name: "微信".into(),
			task_name: "watch".into(),
			progress: Some(2.0),
			score: None,
			state: None,
			life: None,
		};
		let json = serde_json::to_string(&env).unwrap();
		assert!(json.contains("progress"));
		assert!(!json.contains("score"));
		assert!(!json.contains("state"));
	}

	#[test]
	fn screenshot_round_trip() {
		let env = Envelope::screenshot("D1", b"\x89PNG\r\n");
		let Envelope::Screenshot { data, .. } = &env else {
			panic!("expected screenshot");
		};
		assert_eq!(Envelope::screenshot_bytes(data).unwrap(), b"\x89PNG\r\n");
	}
}
