//! RPC correlation and dispatch.
//!
//! # Call flow
//!
//! 1. Caller invokes [`RpcRouter::call`] with a target scope.
//! 2. Local scope short-circuits straight into the handler registry — the
//!    transport is never touched.
//! 3. Remote scopes generate a UUID request id, park a oneshot slot in the
//!    pending table, and emit an [`Envelope::RpcCall`] through the wired
//!    [`CallSender`].
//! 4. The receiving side resolves the class/method, coerces declared string
//!    parameters to richer types, invokes the handler, and answers with a
//!    standardized envelope carrying exactly one of `result` or `error`.
//! 5. [`RpcRouter::resolve_response`] wakes the matching caller; expiry
//!    evicts the slot so the table never leaks, even if no response arrives.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use fleet_protocol::{DEFAULT_RPC_TIMEOUT_MS, Envelope, RpcRequest, RpcResponse};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Where a call is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
	/// Same-process handler registry lookup; never touches the transport.
	Local,
	/// Server-side call addressed to a connected device session.
	Device(String),
	/// Device-side call to the upstream server.
	Server,
}

/// Declared type of one RPC parameter, driving string coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
	Str,
	Int,
	Float,
	Bool,
	Date,
	DateTime,
	/// Passed through untouched.
	Json,
}

/// One declared parameter of an RPC method.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
	pub name: &'static str,
	pub kind: ParamKind,
}

/// One invocable method of a handler class.
#[derive(Debug, Clone, Copy)]
pub struct MethodSpec {
	pub name: &'static str,
	pub params: &'static [ParamSpec],
}

/// A parameter value after declared-type coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum CoercedValue {
	Str(String),
	Int(i64),
	Float(f64),
	Bool(bool),
	Date(NaiveDate),
	DateTime(NaiveDateTime),
	Json(Value),
}

/// Coerced arguments handed to a handler's `invoke`.
#[derive(Debug, Default)]
pub struct Args {
	values: HashMap<String, CoercedValue>,
}

impl Args {
	pub fn get(&self, name: &str) -> Option<&CoercedValue> {
		self.values.get(name)
	}

	pub fn str(&self, name: &str) -> Result<&str> {
		match self.values.get(name) {
			Some(CoercedValue::Str(s)) => Ok(s),
			Some(_) => Err(invalid(name, "expected string")),
			None => Err(invalid(name, "missing")),
		}
	}

	pub fn opt_str(&self, name: &str) -> Option<&str> {
		match self.values.get(name) {
			Some(CoercedValue::Str(s)) => Some(s),
			_ => None,
		}
	}

	pub fn i64(&self, name: &str) -> Result<i64> {
		match self.values.get(name) {
			Some(CoercedValue::Int(n)) => Ok(*n),
			Some(_) => Err(invalid(name, "expected integer")),
			None => Err(invalid(name, "missing")),
		}
	}

	pub fn f64(&self, name: &str) -> Result<f64> {
		match self.values.get(name) {
			Some(CoercedValue::Float(n)) => Ok(*n),
			Some(CoercedValue::Int(n)) => Ok(*n as f64),
			Some(_) => Err(invalid(name, "expected number")),
			None => Err(invalid(name, "missing")),
		}
	}

	pub fn bool(&self, name: &str) -> Result<bool> {
		match self.values.get(name) {
			Some(CoercedValue::Bool(b)) => Ok(*b),
			Some(_) => Err(invalid(name, "expected bool")),
			None => Err(invalid(name, "missing")),
		}
	}

	pub fn date(&self, name: &str) -> Result<NaiveDate> {
		match self.values.get(name) {
			Some(CoercedValue::Date(d)) => Ok(*d),
			Some(CoercedValue::DateTime(dt)) => Ok(dt.date()),
			Some(_) => Err(invalid(name, "expected date")),
			None => Err(invalid(name, "missing")),
		}
	}
}

fn invalid(name: &str, reason: &str) -> Error {
	Error::InvalidParam {
		name: name.to_string(),
		reason: reason.to_string(),
	}
}

/// Boxed future returned by [`RpcHandler::invoke`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// A registered handler class.
///
/// `invoke` receives the already-coerced arguments; `id` is the optional
/// instance id, resolved by the handler's own instance lookup (device, app
/// or task registries on the core side).
pub trait RpcHandler: Send + Sync {
	fn class_name(&self) -> &'static str;

	fn methods(&self) -> &'static [MethodSpec];

	fn invoke<'a>(&'a self, method: &'a str, id: Option<&'a str>, args: Args) -> HandlerFuture<'a>;
}

/// Emits envelopes towards a target. Implemented by the device registry on
/// the server side and by a transport adapter on the device side.
pub trait CallSender: Send + Sync {
	fn send(&self, target: &Target, envelope: Envelope) -> Result<()>;
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<RpcResponse>>>>;

/// Evicts the pending slot if the caller's future is dropped before a
/// response or timeout completes it.
struct CallGuard {
	id: String,
	pending: PendingMap,
	completed: bool,
}

impl CallGuard {
	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CallGuard {
	fn drop(&mut self) {
		if !self.completed && self.pending.lock().remove(&self.id).is_some() {
			tracing::debug!(id = %self.id, "evicted pending rpc slot");
		}
	}
}

/// Request correlation table plus the local handler registry.
///
/// Safe under many simultaneous in-flight requests: the pending table is a
/// single mutex-guarded map keyed by request id, and handler lookup is an
/// O(1) [`DashMap`] access.
pub struct RpcRouter {
	handlers: DashMap<String, Arc<dyn RpcHandler>>,
	pending: PendingMap,
	sender: RwLock<Option<Arc<dyn CallSender>>>,
}

impl Default for RpcRouter {
	fn default() -> Self {
		Self::new()
	}
}

impl RpcRouter {
	pub fn new() -> Self {
		Self {
			handlers: DashMap::new(),
			pending: Arc::new(Mutex::new(HashMap::new())),
			sender: RwLock::new(None),
		}
	}

	/// Wires the outbound path. Must be called before any remote call.
	pub fn set_sender(&self, sender: Arc<dyn CallSender>) {
		*self.sender.write() = Some(sender);
	}

	/// Registers a handler class. Re-registration replaces the previous
	/// handler atomically.
	pub fn register(&self, handler: Arc<dyn RpcHandler>) {
		self.handlers.insert(handler.class_name().to_string(), handler);
	}

	pub fn unregister(&self, class_name: &str) {
		self.handlers.remove(class_name);
	}

	/// Number of in-flight calls; exposed for leak checks.
	pub fn pending_len(&self) -> usize {
		self.pending.lock().len()
	}

	/// Invokes `class_name.method_name` at `target`, blocking the calling
	/// task for at most `timeout_ms` (0 means the protocol default).
	pub async fn call(
		&self,
		target: Target,
		class_name: &str,
		method_name: &str,
		params: Map<String, Value>,
		timeout_ms: u64,
	) -> Result<Value> {
		if target == Target::Local {
			return self.dispatch(class_name, method_name, None, &params).await;
		}

		let timeout_ms = if timeout_ms == 0 { DEFAULT_RPC_TIMEOUT_MS } else { timeout_ms };
		let request_id = Uuid::new_v4().to_string();

		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(request_id.clone(), tx);
		let mut guard = CallGuard {
			id: request_id.clone(),
			pending: Arc::clone(&self.pending),
			completed: false,
		};

		let request = RpcRequest {
			request_id: request_id.clone(),
			class_name: class_name.to_string(),
			method_name: method_name.to_string(),
			id: None,
			params,
			device_id: match &target {
				Target::Device(id) => Some(id.clone()),
				_ => None,
			},
			timeout_ms,
		};

		let sender = self
			.sender
			.read()
			.clone()
			.ok_or_else(|| Error::NoRoute(format!("{target:?}")))?;
		sender.send(&target, Envelope::RpcCall(request))?;

		tracing::debug!(id = %request_id, class = class_name, method = method_name, "rpc call sent");

		match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
			Ok(Ok(response)) => {
				guard.complete();
				match response.error {
					Some(message) => Err(Error::Remote(message)),
					None => Ok(response.result.unwrap_or(Value::Null)),
				}
			}
			Ok(Err(_)) => {
				guard.complete();
				Err(Error::ChannelClosed)
			}
			// Guard drop evicts the slot; the table never leaks.
			Err(_) => Err(Error::Timeout(timeout_ms)),
		}
	}

	/// Handles an inbound request on the receiving side, producing the
	/// standardized response envelope. Never propagates an error.
	pub async fn handle_request(&self, request: &RpcRequest) -> RpcResponse {
		match self
			.dispatch(
				&request.class_name,
				&request.method_name,
				request.id.as_deref(),
				&request.params,
			)
			.await
		{
			Ok(result) => RpcResponse::ok(&request.request_id, result),
			Err(e) => RpcResponse::err(&request.request_id, e.to_string()),
		}
	}

	/// Correlates an inbound response with its pending caller. A response
	/// for an already-expired id is dropped quietly.
	pub fn resolve_response(&self, response: RpcResponse) {
		match self.pending.lock().remove(&response.request_id) {
			Some(tx) => {
				let _ = tx.send(response);
			}
			None => {
				tracing::debug!(id = %response.request_id, "response for unknown or expired rpc call");
			}
		}
	}

	async fn dispatch(
		&self,
		class_name: &str,
		method_name: &str,
		id: Option<&str>,
		params: &Map<String, Value>,
	) -> Result<Value> {
		let handler = self
			.handlers
			.get(class_name)
			.map(|h| Arc::clone(h.value()))
			.ok_or_else(|| Error::UnknownClass(class_name.to_string()))?;

		let spec = handler
			.methods()
			.iter()
			.find(|m| m.name == method_name)
			.ok_or_else(|| Error::UnknownMethod {
				class: class_name.to_string(),
				method: method_name.to_string(),
			})?;

		let args = coerce_params(spec, params)?;
		handler.invoke(method_name, id, args).await
	}
}

/// Applies declared-type coercion to string parameters. Undeclared
/// parameters pass through as raw JSON.
fn coerce_params(spec: &MethodSpec, params: &Map<String, Value>) -> Result<Args> {
	let mut values = HashMap::with_capacity(params.len());
	for (name, value) in params {
		let kind = spec
			.params
			.iter()
			.find(|p| p.name == name)
			.map(|p| p.kind)
			.unwrap_or(ParamKind::Json);
		values.insert(name.clone(), coerce_value(name, kind, value)?);
	}
	Ok(Args { values })
}

fn coerce_value(name: &str, kind: ParamKind, value: &Value) -> Result<CoercedValue> {
	match kind {
		ParamKind::Json => Ok(CoercedValue::Json(value.clone())),
		ParamKind::Str => match value {
			Value::String(s) => Ok(CoercedValue::Str(s.clone())),
			Value::Number(n) => Ok(CoercedValue::Str(n.to_string())),
			Value::Bool(b) => Ok(CoercedValue::Str(b.to_string())),
			_ => Err(invalid(name, "expected string")),
		},
		ParamKind::Int => match value {
			Value::Number(n) => n.as_i64().map(CoercedValue::Int).ok_or_else(|| invalid(name, "not an integer")),
			Value::String(s) => s
				.trim()
				.parse::<i64>()
				.map(CoercedValue::Int)
				.map_err(|_| invalid(name, "not an integer")),
			_ => Err(invalid(name, "expected integer")),
		},
		ParamKind::Float => match value {
			Value::Number(n) => n.as_f64().map(CoercedValue::Float).ok_or_else(|| invalid(name, "not a number")),
			Value::String(s) => s
				.trim()
				.parse::<f64>()
				.map(CoercedValue::Float)
				.map_err(|_| invalid(name, "not a number")),
			_ => Err(invalid(name, "expected number")),
		},
		ParamKind::Bool => match value {
			Value::Bool(b) => Ok(CoercedValue::Bool(*b)),
			Value::String(s) => match s.trim() {
				"true" | "1" => Ok(CoercedValue::Bool(true)),
				"false" | "0" => Ok(CoercedValue::Bool(false)),
				_ => Err(invalid(name, "not a bool")),
			},
			_ => Err(invalid(name, "expected bool")),
		},
		ParamKind::Date => match value {
			Value::String(s) => parse_date(s.trim()).map(CoercedValue::Date).ok_or_else(|| invalid(name, "not a date")),
			_ => Err(invalid(name, "expected date string")),
		},
		ParamKind::DateTime => match value {
			Value::String(s) => parse_datetime(s.trim())
				.map(CoercedValue::DateTime)
				.ok_or_else(|| invalid(name, "not a datetime")),
			_ => Err(invalid(name, "expected datetime string")),
		},
	}
}

fn parse_date(s: &str) -> Option<NaiveDate> {
	NaiveDate::parse_from_str(s, "%Y-%m-%d")
		.ok()
		.or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
	NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
		.ok()
		.or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
}

#[cfg(test)]
mod tests;
