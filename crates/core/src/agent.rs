//! The [`DeviceAgent`] capability boundary.
//!
//! Everything that actually touches a device screen is behind this trait:
//! the core calls it, external collaborators implement it (an Android
//! accessibility bridge in production, [`crate::testing::ScriptedAgent`] in
//! tests).

use async_trait::async_trait;
use fleet_protocol::ScreenText;

use crate::error::Result;

#[async_trait]
pub trait DeviceAgent: Send + Sync {
	/// Taps the given screen coordinate.
	async fn click(&self, x: i32, y: i32) -> Result<()>;

	/// Taps the first on-screen text matching `pattern`. Returns whether a
	/// match was found.
	async fn click_text(&self, pattern: &str) -> Result<bool>;

	async fn go_back(&self) -> Result<()>;

	async fn go_home(&self) -> Result<()>;

	/// Launches the named app. Returns whether the launch was accepted.
	async fn open_app(&self, name: &str) -> Result<bool>;

	async fn close_app(&self, name: &str) -> Result<()>;

	/// Name of the foreground app, if one can be determined.
	async fn current_app(&self) -> Result<Option<String>>;

	/// Captures the text currently on screen with bounding boxes.
	async fn read_screen(&self) -> Result<Vec<ScreenText>>;

	/// Captures a screenshot as raw image bytes.
	async fn take_screenshot(&self) -> Result<Vec<u8>>;
}
