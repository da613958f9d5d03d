//! Shared identifiers and snapshot payloads.

use serde::{Deserialize, Serialize};

/// What kind of client opened a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
	/// A device running the automation agent.
	Device,
	/// An operator console issuing commands.
	Console,
}

/// A piece of on-screen text with its bounding box, as reported by
/// `DeviceAgent::read_screen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenText {
	pub text: String,
	pub bounds: Bounds,
}

impl ScreenText {
	pub fn new(text: impl Into<String>, bounds: Bounds) -> Self {
		Self {
			text: text.into(),
			bounds,
		}
	}

	/// Center point of the bounding box.
	pub fn center(&self) -> (i32, i32) {
		self.bounds.center()
	}
}

/// Screen-space rectangle in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
	pub left: i32,
	pub top: i32,
	pub right: i32,
	pub bottom: i32,
}

impl Bounds {
	pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
		Self {
			left,
			top,
			right,
			bottom,
		}
	}

	pub fn center(&self) -> (i32, i32) {
		((self.left + self.right) / 2, (self.top + self.bottom) / 2)
	}
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
	#[default]
	Idle,
	Running,
	Paused,
	Success,
	Failed,
}

impl TaskState {
	/// Terminal states never re-enter [`TaskState::Running`].
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Success | Self::Failed)
	}
}

/// One task as seen over the wire: enough for a reconnecting agent to
/// resume in-progress work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
	pub id: i64,
	pub app_name: String,
	pub task_name: String,
	pub state: TaskState,
	pub progress: f64,
	pub score: i64,
	pub life: i64,
}

/// One application known to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSnapshot {
	pub name: String,
	#[serde(default)]
	pub description: String,
}

/// Returned to a device on successful login: its current task set for the
/// day plus its app list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginPayload {
	pub device_id: String,
	pub tasks: Vec<TaskSnapshot>,
	pub apps: Vec<AppSnapshot>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bounds_center() {
		let b = Bounds::new(10, 20, 30, 60);
		assert_eq!(b.center(), (20, 40));
	}

	#[test]
	fn terminal_states() {
		assert!(TaskState::Success.is_terminal());
		assert!(TaskState::Failed.is_terminal());
		assert!(!TaskState::Running.is_terminal());
		assert!(!TaskState::Paused.is_terminal());
		assert!(!TaskState::Idle.is_terminal());
	}

	#[test]
	fn task_state_wire_names() {
		assert_eq!(serde_json::to_string(&TaskState::Running).unwrap(), "\"running\"");
		let back: TaskState = serde_json::from_str("\"success\"").unwrap();
		assert_eq!(back, TaskState::Success);
	}
}
