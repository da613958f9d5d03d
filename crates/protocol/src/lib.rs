//! Wire types for the fleet control-plane protocol.
//!
//! Everything that crosses the transport between the server and a device
//! agent lives here: the event-typed [`Envelope`], the RPC request/response
//! pair, severity-tagged result levels, and the snapshot payloads exchanged
//! at login. This crate is serialization only — no I/O, no runtime.

pub mod envelope;
pub mod level;
pub mod rpc;
pub mod types;

pub use envelope::Envelope;
pub use level::Level;
pub use rpc::{RpcRequest, RpcResponse};
pub use types::{
	AppSnapshot, Bounds, ClientKind, LoginPayload, ScreenText, TaskSnapshot, TaskState,
};

/// Default timeout for RPC calls that do not specify one.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 8_000;

/// Default settle time after a page transition before re-matching.
pub const DEFAULT_PAGE_TIMEOUT_MS: u64 = 5_000;
