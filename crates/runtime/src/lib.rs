//! Transport and RPC plumbing shared by the fleet server and device client.
//!
//! The [`rpc`] module owns request correlation: every outbound call parks a
//! oneshot slot in a pending table keyed by request id, and either the
//! matching response or a deterministic timeout releases it. The
//! [`transport`] module abstracts the byte pipe underneath and provides the
//! WebSocket client with bounded reconnect.

pub mod error;
pub mod rpc;
pub mod transport;

pub use error::{Error, Result};
pub use rpc::{
	Args, CallSender, CoercedValue, HandlerFuture, MethodSpec, ParamKind, ParamSpec, RpcHandler,
	RpcRouter, Target,
};
pub use transport::{LoopbackTransport, ReconnectPolicy, Transport, WsTransport};
