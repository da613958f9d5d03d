//! Task lifecycle state machine and the store interface.
//!
//! A task is a schedulable unit of automated work with progress and score.
//! The sign of `life` selects the progress mode: positive counts elapsed
//! seconds, negative counts discrete update steps, zero never completes
//! automatically. Every observable mutation yields a [`TaskDelta`] carrying
//! only the changed fields.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use fleet_protocol::{Envelope, TaskSnapshot, TaskState};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::rules::MatchRule;

/// Template describing how a named task runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
	pub app_name: String,
	pub name: String,
	/// Positive: seconds of work. Negative: magnitude is a step count.
	/// Zero: runs until stopped externally.
	pub life: i64,
	/// Minimum seconds between work units.
	pub interval_secs: u64,
	/// Score granted per satisfied update.
	pub bonus: i64,
	/// Page to navigate to when the task begins.
	pub target_page: Option<String>,
	/// Match rule that must hold for an update to count as work.
	pub check: Option<String>,
	pub begin_script: Option<String>,
	pub exit_script: Option<String>,
}

/// Named task templates, registered once per process.
#[derive(Default)]
pub struct TaskCatalog {
	templates: RwLock<HashMap<String, TaskConfig>>,
}

impl TaskCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, config: TaskConfig) {
		self.templates.write().insert(config.name.clone(), config);
	}

	pub fn get(&self, name: &str) -> Option<TaskConfig> {
		self.templates.read().get(name).cloned()
	}
}

/// Only the fields changed by one mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDelta {
	pub progress: Option<f64>,
	pub score: Option<i64>,
	pub state: Option<TaskState>,
	pub life: Option<i64>,
}

impl TaskDelta {
	pub fn is_empty(&self) -> bool {
		self.progress.is_none() && self.score.is_none() && self.state.is_none() && self.life.is_none()
	}

	/// Wraps a non-empty delta into its wire event.
	pub fn into_envelope(self, device_id: &str, app_name: &str, task_name: &str) -> Envelope {
		Envelope::UpdateTask {
			device_id: device_id.to_string(),
			app_name: app_name.to_string(),
			task_name: task_name.to_string(),
			progress: self.progress,
			score: self.score,
			state: self.state,
			life: self.life,
		}
	}
}

/// Persistent form of a task; what a store must hold.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
	pub id: i64,
	pub device_id: String,
	pub app_name: String,
	pub task_name: String,
	pub date: NaiveDate,
	pub state: TaskState,
	pub progress: f64,
	pub score: i64,
	pub life: i64,
}

/// Persistent form of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
	pub device_id: String,
	pub name: String,
	pub last_seen: chrono::NaiveDateTime,
}

/// What a persistence engine must satisfy. The engine itself is external;
/// [`MemoryTaskStore`] backs tests and single-process runs.
pub trait TaskStore: Send + Sync {
	fn load_task(&self, device_id: &str, app: &str, name: &str, date: NaiveDate) -> Option<TaskRecord>;

	/// Persists a new record, assigning its id.
	fn create_task(&self, record: TaskRecord) -> TaskRecord;

	fn commit_task(&self, record: &TaskRecord);

	fn delete_task(&self, device_id: &str, app: &str, name: &str, date: NaiveDate);

	fn day_tasks(&self, device_id: &str, date: NaiveDate) -> Vec<TaskRecord>;

	fn load_device(&self, device_id: &str) -> Option<DeviceRecord>;

	fn commit_device(&self, record: &DeviceRecord);
}

type TaskKey = (String, String, String, NaiveDate);

#[derive(Default)]
pub struct MemoryTaskStore {
	tasks: Mutex<HashMap<TaskKey, TaskRecord>>,
	devices: Mutex<HashMap<String, DeviceRecord>>,
	next_id: AtomicI64,
}

impl MemoryTaskStore {
	pub fn new() -> Self {
		Self {
			next_id: AtomicI64::new(1),
			..Self::default()
		}
	}
}

fn key(record: &TaskRecord) -> TaskKey {
	(
		record.device_id.clone(),
		record.app_name.clone(),
		record.task_name.clone(),
		record.date,
	)
}

impl TaskStore for MemoryTaskStore {
	fn load_task(&self, device_id: &str, app: &str, name: &str, date: NaiveDate) -> Option<TaskRecord> {
		self.tasks
			.lock()
			.get(&(device_id.to_string(), app.to_string(), name.to_string(), date))
			.cloned()
	}

	fn create_task(&self, mut record: TaskRecord) -> TaskRecord {
		record.id = self.next_id.fetch_add(1, Ordering::SeqCst);
		self.tasks.lock().insert(key(&record), record.clone());
		record
	}

	fn commit_task(&self, record: &TaskRecord) {
		self.tasks.lock().insert(key(record), record.clone());
	}

	fn delete_task(&self, device_id: &str, app: &str, name: &str, date: NaiveDate) {
		self.tasks
			.lock()
			.remove(&(device_id.to_string(), app.to_string(), name.to_string(), date));
	}

	fn day_tasks(&self, device_id: &str, date: NaiveDate) -> Vec<TaskRecord> {
		let mut records: Vec<TaskRecord> = self
			.tasks
			.lock()
			.values()
			.filter(|r| r.device_id == device_id && r.date == date)
			.cloned()
			.collect();
		records.sort_by_key(|r| r.id);
		records
	}

	fn load_device(&self, device_id: &str) -> Option<DeviceRecord> {
		self.devices.lock().get(device_id).cloned()
	}

	fn commit_device(&self, record: &DeviceRecord) {
		self.devices.lock().insert(record.device_id.clone(), record.clone());
	}
}

/// A live task bound to one device and one calendar day.
#[derive(Debug)]
pub struct Task {
	id: i64,
	device_id: String,
	date: NaiveDate,
	config: TaskConfig,
	check: Option<MatchRule>,
	state: TaskState,
	progress: f64,
	score: i64,
	last_update: Option<Instant>,
}

impl Task {
	pub fn new(id: i64, device_id: impl Into<String>, date: NaiveDate, config: TaskConfig) -> Result<Self> {
		let check = match &config.check {
			Some(raw) => Some(MatchRule::parse(raw)?),
			None => None,
		};
		Ok(Self {
			id,
			device_id: device_id.into(),
			date,
			config,
			check,
			state: TaskState::Idle,
			progress: 0.0,
			score: 0,
			last_update: None,
		})
	}

	pub fn from_record(record: TaskRecord, mut config: TaskConfig) -> Result<Self> {
		config.life = record.life;
		let mut task = Self::new(record.id, record.device_id.clone(), record.date, config)?;
		task.state = record.state;
		task.progress = record.progress;
		task.score = record.score;
		Ok(task)
	}

	pub fn key(&self) -> String {
		task_key(&self.config.app_name, &self.config.name)
	}

	pub fn id(&self) -> i64 {
		self.id
	}

	pub fn state(&self) -> TaskState {
		self.state
	}

	pub fn progress(&self) -> f64 {
		self.progress
	}

	pub fn score(&self) -> i64 {
		self.score
	}

	pub fn config(&self) -> &TaskConfig {
		&self.config
	}

	/// Fraction of the task's life completed; zero-life tasks never reach 1.
	pub fn progress_ratio(&self) -> f64 {
		match self.config.life {
			0 => 0.0,
			life => self.progress / life.unsigned_abs() as f64,
		}
	}

	/// Evaluates the task's check rule against the screen. Tasks without a
	/// rule treat every tick as satisfied work.
	pub fn check_passed(&self, screen: &[fleet_protocol::ScreenText]) -> bool {
		match &self.check {
			Some(rule) => rule.matches(screen),
			None => true,
		}
	}

	/// Idle -> Running. Re-applying to a running task is a no-op; terminal
	/// tasks stay put.
	pub fn begin(&mut self, now: Instant) -> TaskDelta {
		let mut delta = TaskDelta::default();
		if self.state == TaskState::Idle {
			self.state = TaskState::Running;
			self.last_update = Some(now);
			delta.state = Some(self.state);
		}
		delta
	}

	/// Paused -> Running.
	pub fn resume(&mut self, now: Instant) -> TaskDelta {
		let mut delta = TaskDelta::default();
		if self.state == TaskState::Paused {
			self.state = TaskState::Running;
			self.last_update = Some(now);
			delta.state = Some(self.state);
		}
		delta
	}

	/// One scheduled work tick. Progress is monotonic while running, and
	/// reaching `progress/|life| >= 1` flips to Success exactly once.
	pub fn update(&mut self, now: Instant, check_passed: bool) -> TaskDelta {
		let mut delta = TaskDelta::default();
		if self.state != TaskState::Running {
			return delta;
		}

		let elapsed = self
			.last_update
			.map(|last| now.saturating_duration_since(last))
			.unwrap_or_default();
		self.last_update = Some(now);

		if !check_passed {
			return delta;
		}

		if self.config.bonus != 0 {
			self.score += self.config.bonus;
			delta.score = Some(self.score);
		}

		let unit = match self.config.life {
			life if life > 0 => elapsed.as_secs_f64(),
			life if life < 0 => 1.0,
			_ => 0.0,
		};
		if unit > 0.0 {
			let cap = self.config.life.unsigned_abs() as f64;
			let next = (self.progress + unit).min(cap);
			if next != self.progress {
				self.progress = next;
				delta.progress = Some(self.progress);
			}
		}

		if self.config.life != 0 && self.progress_ratio() >= 1.0 {
			self.state = TaskState::Success;
			delta.state = Some(self.state);
		}
		delta
	}

	/// Externally stops a task, recording the target state plus current
	/// progress. Valid targets are Paused, Success and Failed; terminal
	/// tasks ignore further stops.
	pub fn stop(&mut self, target: TaskState) -> TaskDelta {
		let mut delta = TaskDelta::default();
		if self.state.is_terminal() || target == TaskState::Idle || target == TaskState::Running {
			return delta;
		}
		// From Paused only an external end is allowed, not another pause.
		if self.state == TaskState::Paused && target == TaskState::Paused {
			return delta;
		}
		self.state = target;
		delta.state = Some(target);
		delta.progress = Some(self.progress);
		delta
	}

	/// Applies one named field, returning whether anything changed. This is
	/// the explicit dispatch table behind remote field updates.
	pub fn apply(&mut self, field: &str, value: &Value) -> Result<bool> {
		match field {
			"life" => {
				let life = value
					.as_i64()
					.ok_or_else(|| Error::UnknownField(format!("life={value}")))?;
				let changed = self.config.life != life;
				self.config.life = life;
				Ok(changed)
			}
			"score" => {
				let score = value
					.as_i64()
					.ok_or_else(|| Error::UnknownField(format!("score={value}")))?;
				let changed = self.score != score;
				self.score = score;
				Ok(changed)
			}
			"progress" => {
				let progress = value
					.as_f64()
					.ok_or_else(|| Error::UnknownField(format!("progress={value}")))?;
				let changed = self.progress != progress;
				self.progress = progress;
				Ok(changed)
			}
			"state" => {
				let state: TaskState = serde_json::from_value(value.clone())?;
				let changed = self.state != state;
				self.state = state;
				Ok(changed)
			}
			other => Err(Error::UnknownField(other.to_string())),
		}
	}

	pub fn snapshot(&self) -> TaskSnapshot {
		TaskSnapshot {
			id: self.id,
			app_name: self.config.app_name.clone(),
			task_name: self.config.name.clone(),
			state: self.state,
			progress: self.progress,
			score: self.score,
			life: self.config.life,
		}
	}

	pub fn to_record(&self) -> TaskRecord {
		TaskRecord {
			id: self.id,
			device_id: self.device_id.clone(),
			app_name: self.config.app_name.clone(),
			task_name: self.config.name.clone(),
			date: self.date,
			state: self.state,
			progress: self.progress,
			score: self.score,
			life: self.config.life,
		}
	}
}

pub fn task_key(app: &str, name: &str) -> String {
	format!("{app}/{name}")
}

/// A device's tasks for the current calendar day. Records never roll over:
/// a new day gets fresh records while the old ones stay in the store.
pub struct TaskSet {
	device_id: String,
	date: NaiveDate,
	tasks: HashMap<String, Task>,
}

impl TaskSet {
	pub fn new(device_id: impl Into<String>, date: NaiveDate) -> Self {
		Self {
			device_id: device_id.into(),
			date,
			tasks: HashMap::new(),
		}
	}

	/// Drops the in-memory set when the calendar day changed.
	pub fn ensure_day(&mut self, today: NaiveDate) {
		if self.date != today {
			self.date = today;
			self.tasks.clear();
		}
	}

	pub fn date(&self) -> NaiveDate {
		self.date
	}

	/// Loads the day's persisted tasks through the catalog.
	pub fn load_day(&mut self, store: &dyn TaskStore, catalog: &TaskCatalog) -> Result<()> {
		for record in store.day_tasks(&self.device_id, self.date) {
			let config = catalog.get(&record.task_name).unwrap_or_else(|| TaskConfig {
				app_name: record.app_name.clone(),
				name: record.task_name.clone(),
				life: record.life,
				..TaskConfig::default()
			});
			let task = Task::from_record(record, config)?;
			self.tasks.insert(task.key(), task);
		}
		Ok(())
	}

	/// Returns the task for (app, name), creating it on first reference.
	pub fn get_or_create(
		&mut self,
		app: &str,
		name: &str,
		store: &dyn TaskStore,
		catalog: &TaskCatalog,
	) -> Result<&mut Task> {
		let key = task_key(app, name);
		if !self.tasks.contains_key(&key) {
			let config = catalog
				.get(name)
				.ok_or_else(|| Error::TaskNotFound(name.to_string()))?;
			let record = match store.load_task(&self.device_id, app, name, self.date) {
				Some(record) => record,
				None => store.create_task(TaskRecord {
					id: 0,
					device_id: self.device_id.clone(),
					app_name: app.to_string(),
					task_name: name.to_string(),
					date: self.date,
					state: TaskState::Idle,
					progress: 0.0,
					score: 0,
					life: config.life,
				}),
			};
			let task = Task::from_record(record, config)?;
			self.tasks.insert(key.clone(), task);
		}
		Ok(self.tasks.get_mut(&key).expect("just inserted"))
	}

	pub fn get_mut(&mut self, key: &str) -> Option<&mut Task> {
		self.tasks.get_mut(key)
	}

	pub fn get(&self, key: &str) -> Option<&Task> {
		self.tasks.get(key)
	}

	pub fn remove(&mut self, key: &str) -> Option<Task> {
		self.tasks.remove(key)
	}

	pub fn snapshots(&self) -> Vec<TaskSnapshot> {
		let mut snapshots: Vec<TaskSnapshot> = self.tasks.values().map(Task::snapshot).collect();
		snapshots.sort_by_key(|s| s.id);
		snapshots
	}
}

#[cfg(test)]
mod tests;
