//! The process-scoped context.
//!
//! Built once at startup and injected everywhere a registry is needed; there
//! are no hidden globals. The server builds it without an agent; the device
//! client passes its local [`DeviceAgent`].

use std::sync::Arc;
use std::time::Duration;

use fleet_runtime::rpc::RpcRouter;

use crate::agent::DeviceAgent;
use crate::checker::CheckerEngine;
use crate::command::CommandRegistry;
use crate::device::DeviceRegistry;
use crate::task::{TaskCatalog, TaskStore};

pub struct Context {
	pub commands: Arc<CommandRegistry>,
	pub rpc: Arc<RpcRouter>,
	pub store: Arc<dyn TaskStore>,
	pub catalog: Arc<TaskCatalog>,
	pub devices: Arc<DeviceRegistry>,
	pub checkers: Arc<CheckerEngine>,
	/// The local capability boundary; `None` on the server side.
	pub agent: Option<Arc<dyn DeviceAgent>>,
	/// Period of the per-device update loops.
	pub poll_interval: Duration,
}

impl Context {
	pub fn new(store: Arc<dyn TaskStore>, agent: Option<Arc<dyn DeviceAgent>>) -> Arc<Self> {
		Self::with_poll_interval(store, agent, Duration::from_secs(1))
	}

	pub fn with_poll_interval(
		store: Arc<dyn TaskStore>,
		agent: Option<Arc<dyn DeviceAgent>>,
		poll_interval: Duration,
	) -> Arc<Self> {
		let commands = Arc::new(CommandRegistry::new());
		let rpc = Arc::new(RpcRouter::new());
		let catalog = Arc::new(TaskCatalog::new());
		let devices = Arc::new(DeviceRegistry::new(
			Arc::clone(&store),
			Arc::clone(&catalog),
			Arc::clone(&commands),
			Arc::clone(&rpc),
		));
		// Remote calls addressed to devices go out through the registry.
		let sender: Arc<dyn fleet_runtime::rpc::CallSender> = devices.clone();
		rpc.set_sender(sender);
		rpc.register(Arc::new(crate::device::DeviceRpc::new(Arc::clone(&devices))));

		Arc::new(Self {
			commands,
			rpc,
			store,
			catalog,
			devices,
			checkers: Arc::new(CheckerEngine::new()),
			agent,
			poll_interval,
		})
	}
}
