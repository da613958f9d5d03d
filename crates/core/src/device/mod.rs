//! Device sessions: connection state machine, envelope routing, and the
//! per-device update loop.
//!
//! One [`Device`] exists per physical agent, created on first contact and
//! kept while connected. Session state moves only through the documented
//! transitions; anything else is rejected. Disconnecting while logged in
//! destroys no task state — tasks resume on the next login.

mod rpc;

pub use rpc::DeviceRpc;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use dashmap::DashMap;
use fleet_protocol::{ClientKind, Envelope, Level, LoginPayload, TaskState};
use fleet_runtime::rpc::{CallSender, RpcRouter, Target};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

use crate::action;
use crate::agent::DeviceAgent;
use crate::command::CommandRegistry;
use crate::error::{Error, Result};
use crate::page::{AppSet, Navigator, PageId};
use crate::task::{DeviceRecord, TaskCatalog, TaskSet, TaskStore, task_key};

/// Connection state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
	Offline,
	Online,
	LoggedIn,
	LoggedOut,
}

impl DeviceState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Offline => "offline",
			Self::Online => "online",
			Self::LoggedIn => "logged_in",
			Self::LoggedOut => "logged_out",
		}
	}
}

/// Session events driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
	Connect,
	Login,
	Logout,
	Disconnect,
}

impl SessionEvent {
	fn as_str(self) -> &'static str {
		match self {
			Self::Connect => "connect",
			Self::Login => "login",
			Self::Logout => "logout",
			Self::Disconnect => "disconnect",
		}
	}

	fn target(self) -> DeviceState {
		match self {
			Self::Connect => DeviceState::Online,
			Self::Login => DeviceState::LoggedIn,
			Self::Logout => DeviceState::LoggedOut,
			Self::Disconnect => DeviceState::Offline,
		}
	}
}

/// Applies one session event. Returns `None` when the device is already in
/// the event's target state (idempotent re-apply); any transition outside
/// the documented set is rejected.
pub fn transition(current: DeviceState, event: SessionEvent) -> Result<Option<DeviceState>> {
	let target = event.target();
	if current == target {
		return Ok(None);
	}
	let allowed = matches!(
		(current, event),
		(DeviceState::Offline, SessionEvent::Connect)
			| (DeviceState::Online, SessionEvent::Login)
			| (DeviceState::LoggedIn, SessionEvent::Logout)
			| (
				DeviceState::Online | DeviceState::LoggedIn | DeviceState::LoggedOut,
				SessionEvent::Disconnect
			)
	);
	if allowed {
		Ok(Some(target))
	} else {
		Err(Error::InvalidSession {
			state: current.as_str(),
			event: event.as_str(),
		})
	}
}

/// One live device session.
pub struct Device {
	pub id: String,
	name: Mutex<String>,
	client: Mutex<ClientKind>,
	state: Mutex<DeviceState>,
	/// Transport session handle; present while a socket is attached.
	outbound: Mutex<Option<UnboundedSender<Envelope>>>,
	last_seen: Mutex<chrono::NaiveDateTime>,
	/// Guarded by tokio mutexes: the update loop holds them across awaits.
	pub apps: tokio::sync::Mutex<AppSet>,
	pub tasks: tokio::sync::Mutex<TaskSet>,
	current_page: Mutex<Option<PageId>>,
	current_task: Mutex<Option<String>>,
}

impl Device {
	fn new(id: &str, client: ClientKind) -> Self {
		Self {
			id: id.to_string(),
			name: Mutex::new(id.to_string()),
			client: Mutex::new(client),
			state: Mutex::new(DeviceState::Offline),
			outbound: Mutex::new(None),
			last_seen: Mutex::new(Local::now().naive_local()),
			apps: tokio::sync::Mutex::new(AppSet::new()),
			tasks: tokio::sync::Mutex::new(TaskSet::new(id, Local::now().date_naive())),
			current_page: Mutex::new(None),
			current_task: Mutex::new(None),
		}
	}

	pub fn state(&self) -> DeviceState {
		*self.state.lock()
	}

	pub fn name(&self) -> String {
		self.name.lock().clone()
	}

	pub fn client(&self) -> ClientKind {
		*self.client.lock()
	}

	pub fn last_seen(&self) -> chrono::NaiveDateTime {
		*self.last_seen.lock()
	}

	pub fn current_task_key(&self) -> Option<String> {
		self.current_task.lock().clone()
	}

	pub fn set_current_task(&self, key: Option<String>) {
		*self.current_task.lock() = key;
	}

	fn touch(&self) {
		*self.last_seen.lock() = Local::now().naive_local();
	}

	fn apply(&self, event: SessionEvent) -> Result<bool> {
		let mut state = self.state.lock();
		match transition(*state, event)? {
			Some(next) => {
				tracing::info!(device = %self.id, from = state.as_str(), to = next.as_str(), "session transition");
				*state = next;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	/// Queues an envelope onto this device's transport session.
	pub fn send(&self, envelope: Envelope) -> Result<()> {
		let outbound = self.outbound.lock();
		match outbound.as_ref() {
			Some(tx) => tx
				.send(envelope)
				.map_err(|_| Error::NotConnected(self.id.clone())),
			None => Err(Error::NotConnected(self.id.clone())),
		}
	}
}

/// Owns every device session and routes protocol events.
pub struct DeviceRegistry {
	devices: DashMap<String, Arc<Device>>,
	store: Arc<dyn TaskStore>,
	catalog: Arc<TaskCatalog>,
	commands: Arc<CommandRegistry>,
	rpc: Arc<RpcRouter>,
	/// request id -> device that originated a forwarded RPC call.
	forwards: Mutex<std::collections::HashMap<String, String>>,
}

impl DeviceRegistry {
	pub fn new(
		store: Arc<dyn TaskStore>,
		catalog: Arc<TaskCatalog>,
		commands: Arc<CommandRegistry>,
		rpc: Arc<RpcRouter>,
	) -> Self {
		Self {
			devices: DashMap::new(),
			store,
			catalog,
			commands,
			rpc,
			forwards: Mutex::new(std::collections::HashMap::new()),
		}
	}

	pub fn get(&self, id: &str) -> Option<Arc<Device>> {
		self.devices.get(id).map(|d| Arc::clone(d.value()))
	}

	pub fn store(&self) -> &Arc<dyn TaskStore> {
		&self.store
	}

	pub fn online(&self) -> Vec<Arc<Device>> {
		self.devices
			.iter()
			.filter(|d| d.state() != DeviceState::Offline)
			.map(|d| Arc::clone(d.value()))
			.collect()
	}

	/// Transport connect: creates the device on first contact and attaches
	/// the session handle.
	pub fn connect(
		&self,
		id: &str,
		client: ClientKind,
		outbound: UnboundedSender<Envelope>,
	) -> Result<Arc<Device>> {
		let device = self
			.devices
			.entry(id.to_string())
			.or_insert_with(|| Arc::new(Device::new(id, client)))
			.clone();
		device.apply(SessionEvent::Connect)?;
		*device.client.lock() = client;
		*device.outbound.lock() = Some(outbound);
		device.touch();
		self.store.commit_device(&DeviceRecord {
			device_id: device.id.clone(),
			name: device.name(),
			last_seen: device.last_seen(),
		});
		Ok(device)
	}

	/// Login handshake: loads (or creates) the device's task set for the
	/// current day and returns the resume payload.
	pub async fn login(&self, id: &str) -> Result<LoginPayload> {
		let device = self.get(id).ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
		device.apply(SessionEvent::Login)?;
		device.touch();

		let today = Local::now().date_naive();
		let mut tasks = device.tasks.lock().await;
		tasks.ensure_day(today);
		tasks.load_day(self.store.as_ref(), self.catalog.as_ref())?;
		let task_snapshots = tasks.snapshots();
		drop(tasks);

		let apps = device.apps.lock().await.snapshots();
		Ok(LoginPayload {
			device_id: device.id.clone(),
			tasks: task_snapshots,
			apps,
		})
	}

	pub fn logout(&self, id: &str) -> Result<()> {
		let device = self.get(id).ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
		device.apply(SessionEvent::Logout)?;
		device.touch();
		Ok(())
	}

	/// Transport disconnect. Task state survives for the next login.
	pub fn disconnect(&self, id: &str) -> Result<()> {
		let device = self.get(id).ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
		device.apply(SessionEvent::Disconnect)?;
		*device.outbound.lock() = None;
		device.touch();
		self.store.commit_device(&DeviceRecord {
			device_id: device.id.clone(),
			name: device.name(),
			last_seen: device.last_seen(),
		});
		Ok(())
	}

	/// Routes one inbound envelope from `from_device`, returning the reply
	/// to send back on the same session, if any.
	pub async fn handle_envelope(&self, from_device: &str, envelope: Envelope) -> Result<Option<Envelope>> {
		match envelope {
			Envelope::Login { device_id } => {
				let payload = self.login(&device_id).await?;
				Ok(Some(Envelope::LoginResult { payload }))
			}
			Envelope::Logout { device_id } => {
				self.logout(&device_id)?;
				Ok(None)
			}
			Envelope::DoCommand {
				command,
				sender_id,
				data,
			} => {
				let (result, handler_name) =
					self.commands.dispatch(&command, Some(&sender_id), data).await;
				let (level, body) = Level::split_tagged(&result);
				match level {
					Level::Error => tracing::warn!(command = %command, "dispatch: {body}"),
					_ => tracing::debug!(command = %command, "dispatch: {body}"),
				}
				Ok(Some(Envelope::CommandResult {
					result,
					device_id: from_device.to_string(),
					command,
					handler_name,
				}))
			}
			Envelope::RpcCall(mut request) => match request.device_id.take() {
				// Addressed to another device: forward and remember where
				// the response should go back to.
				Some(target) if target != from_device => {
					self.forwards
						.lock()
						.insert(request.request_id.clone(), from_device.to_string());
					self.send_to(&target, Envelope::RpcCall(request))?;
					Ok(None)
				}
				_ => Ok(Some(Envelope::RpcResult(self.rpc.handle_request(&request).await))),
			},
			Envelope::RpcResult(response) => {
				let origin = self.forwards.lock().remove(&response.request_id);
				match origin {
					Some(origin) => {
						self.send_to(&origin, Envelope::RpcResult(response))?;
					}
					None => self.rpc.resolve_response(response),
				}
				Ok(None)
			}
			Envelope::StartTask {
				device_id,
				app_name,
				task_name,
			} => {
				self.start_task(&device_id, &app_name, &task_name).await?;
				Ok(None)
			}
			Envelope::StopTask {
				device_id,
				app_name,
				task_name,
			} => Ok(self
				.stop_task(&device_id, &app_name, &task_name, TaskState::Paused)
				.await?),
			Envelope::CancelTask {
				device_id,
				app_name,
				task_name,
			} => {
				self.cancel_task(&device_id, &app_name, &task_name).await?;
				Ok(None)
			}
			Envelope::UpdateTask {
				device_id,
				app_name,
				task_name,
				progress,
				score,
				state,
				life,
			} => {
				// Progress report from the device side: apply field by field.
				let device = self
					.get(&device_id)
					.ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;
				let mut tasks = device.tasks.lock().await;
				if let Some(task) = tasks.get_mut(&task_key(&app_name, &task_name)) {
					let mut changed = false;
					for (field, value) in [
						("progress", progress.map(|v| serde_json::json!(v))),
						("score", score.map(|v| serde_json::json!(v))),
						("state", state.map(|v| serde_json::json!(v))),
						("life", life.map(|v| serde_json::json!(v))),
					] {
						if let Some(value) = value {
							changed |= task.apply(field, &value)?;
						}
					}
					if changed {
						self.store.commit_task(&task.to_record());
					}
				}
				Ok(None)
			}
			Envelope::TaskEnd {
				device_id,
				app_name,
				task_name,
				result,
				score,
			} => {
				let state = if result { TaskState::Success } else { TaskState::Failed };
				let device = self
					.get(&device_id)
					.ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;
				let mut tasks = device.tasks.lock().await;
				if let Some(task) = tasks.get_mut(&task_key(&app_name, &task_name)) {
					task.apply("score", &serde_json::json!(score))?;
					task.stop(state);
					self.store.commit_task(&task.to_record());
				}
				Ok(None)
			}
			Envelope::Screenshot { device_id, .. } => {
				// Storage is an external collaborator; the core only notes it.
				tracing::debug!(device = %device_id, "screenshot received");
				Ok(None)
			}
			Envelope::Connect { .. }
			| Envelope::Disconnect { .. }
			| Envelope::LoginResult { .. }
			| Envelope::CommandResult { .. } => Ok(None),
		}
	}

	pub fn send_to(&self, device_id: &str, envelope: Envelope) -> Result<()> {
		self.get(device_id)
			.ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?
			.send(envelope)
	}

	/// Makes (app, name) the device's current task, creating the day record
	/// on first reference. The update loop drives it from here.
	pub async fn start_task(&self, device_id: &str, app: &str, name: &str) -> Result<()> {
		let device = self
			.get(device_id)
			.ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;
		let mut tasks = device.tasks.lock().await;
		tasks.ensure_day(Local::now().date_naive());
		let task = tasks.get_or_create(app, name, self.store.as_ref(), self.catalog.as_ref())?;
		let key = task.key();
		drop(tasks);
		device.set_current_task(Some(key));
		Ok(())
	}

	/// Stops a task into `target` and reports the delta, if any. Safe to
	/// call from any thread; the device's next tick observes the state.
	pub async fn stop_task(
		&self,
		device_id: &str,
		app: &str,
		name: &str,
		target: TaskState,
	) -> Result<Option<Envelope>> {
		let device = self
			.get(device_id)
			.ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;
		let mut tasks = device.tasks.lock().await;
		let key = task_key(app, name);
		let task = tasks
			.get_mut(&key)
			.ok_or_else(|| Error::TaskNotFound(key.clone()))?;
		let delta = task.stop(target);
		let record = task.to_record();
		drop(tasks);
		if delta.is_empty() {
			return Ok(None);
		}
		self.store.commit_task(&record);
		Ok(Some(delta.into_envelope(device_id, app, name)))
	}

	/// Cancels a task outright: removed from the day set and the store.
	pub async fn cancel_task(&self, device_id: &str, app: &str, name: &str) -> Result<()> {
		let device = self
			.get(device_id)
			.ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;
		let mut tasks = device.tasks.lock().await;
		let date = tasks.date();
		tasks.remove(&task_key(app, name));
		drop(tasks);
		if device.current_task_key().as_deref() == Some(&task_key(app, name)) {
			device.set_current_task(None);
		}
		self.store.delete_task(device_id, app, name, date);
		Ok(())
	}

	/// One pass of the device update loop: detect the foreground app and
	/// page, then drive the current task.
	pub async fn tick_device(&self, device: &Arc<Device>, agent: &dyn DeviceAgent) -> Result<()> {
		let screen = agent.read_screen().await?;

		// Foreground app detection.
		let foreground = agent.current_app().await?;
		{
			let mut apps = device.apps.lock().await;
			apps.set_current(foreground.as_deref());
			if let Some(name) = &foreground {
				apps.get_or_create(name);
			}
			// Page detection within the current app.
			let page = apps
				.current()
				.and_then(|app| app.match_page(&screen));
			*device.current_page.lock() = page;
		}

		let Some(key) = device.current_task_key() else {
			return Ok(());
		};

		let now = Instant::now();
		let mut tasks = device.tasks.lock().await;
		tasks.ensure_day(Local::now().date_naive());
		let Some(task) = tasks.get_mut(&key) else {
			device.set_current_task(None);
			return Ok(());
		};

		let mut pending_scripts: Vec<String> = Vec::new();
		let mut target_page: Option<String> = None;
		let mut deltas = Vec::new();

		if task.state() == TaskState::Idle {
			// First unit of work: begin script, then navigate to the
			// task's page if one is configured.
			if let Some(script) = task.config().begin_script.clone() {
				pending_scripts.push(script);
			}
			target_page = task.config().target_page.clone();
			deltas.push(task.begin(now));
		} else if task.state() == TaskState::Running {
			let passed = task.check_passed(&screen);
			let delta = task.update(now, passed);
			if delta.state == Some(TaskState::Success)
				&& let Some(script) = task.config().exit_script.clone()
			{
				pending_scripts.push(script);
			}
			deltas.push(delta);
		}

		let record = task.to_record();
		let (app_name, task_name, score, finished) = (
			record.app_name.clone(),
			record.task_name.clone(),
			record.score,
			record.state.is_terminal(),
		);
		drop(tasks);

		let mut dirty = false;
		for delta in deltas {
			if delta.is_empty() {
				continue;
			}
			dirty = true;
			let envelope = delta.into_envelope(&device.id, &app_name, &task_name);
			if let Err(e) = device.send(envelope) {
				tracing::debug!(device = %device.id, "task update not sent: {e}");
			}
		}
		if dirty {
			self.store.commit_task(&record);
		}

		for script in pending_scripts {
			if let Err(e) = action::run(agent, &script).await {
				tracing::warn!(device = %device.id, "task script failed: {e}");
			}
		}

		if let Some(page_name) = target_page {
			self.navigate_device(device, agent, &page_name).await?;
		}

		if finished {
			device.set_current_task(None);
			let envelope = Envelope::TaskEnd {
				device_id: device.id.clone(),
				app_name,
				task_name,
				result: record.state == TaskState::Success,
				score,
			};
			if let Err(e) = device.send(envelope) {
				tracing::debug!(device = %device.id, "task end not sent: {e}");
			}
		}
		Ok(())
	}

	/// Walks the current app's page tree to `page_name`. On a failed
	/// transition the device stays at the last confirmed page.
	pub async fn navigate_device(
		&self,
		device: &Arc<Device>,
		agent: &dyn DeviceAgent,
		page_name: &str,
	) -> Result<()> {
		let apps = device.apps.lock().await;
		let app = apps
			.current()
			.ok_or_else(|| Error::UnknownApp("<none>".to_string()))?;
		let target = app.get(page_name)?;
		let mut current = device.current_page.lock().take().unwrap_or(app.root());

		let result = Navigator::new(app, agent).go(&mut current, target).await;
		*device.current_page.lock() = Some(current);
		result
	}

	/// Runs the device's update loop until shutdown, at the configured
	/// poll period.
	pub async fn run_device_loop(
		self: Arc<Self>,
		device: Arc<Device>,
		agent: Arc<dyn DeviceAgent>,
		poll: Duration,
		mut shutdown: watch::Receiver<bool>,
	) {
		let mut tick = tokio::time::interval(poll);
		tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		loop {
			tokio::select! {
				_ = tick.tick() => {}
				_ = shutdown.changed() => {}
			}
			if *shutdown.borrow() || device.state() == DeviceState::Offline {
				return;
			}
			if let Err(e) = self.tick_device(&device, agent.as_ref()).await {
				tracing::warn!(device = %device.id, "update tick failed: {e}");
			}
		}
	}
}

impl CallSender for DeviceRegistry {
	fn send(&self, target: &Target, envelope: Envelope) -> fleet_runtime::Result<()> {
		match target {
			Target::Device(id) => self
				.send_to(id, envelope)
				.map_err(|e| fleet_runtime::Error::Transport(e.to_string())),
			Target::Server | Target::Local => {
				Err(fleet_runtime::Error::NoRoute(format!("{target:?}")))
			}
		}
	}
}
