//! Scripted [`DeviceAgent`] for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use fleet_protocol::{Bounds, ScreenText};
use parking_lot::Mutex;
use regex::Regex;

use crate::agent::DeviceAgent;
use crate::error::Result;

/// An in-memory agent whose "screen" is a stack of scripted text pages.
///
/// Opening an app shows that app's configured root screen; a routed
/// `click_text` pushes the mapped screen; `go_back` pops. Every capability
/// call is recorded for assertions.
#[derive(Default)]
pub struct ScriptedAgent {
	inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
	current_app: Option<String>,
	screens: Vec<Vec<ScreenText>>,
	click_routes: HashMap<String, Vec<ScreenText>>,
	app_screens: HashMap<String, Vec<ScreenText>>,
	calls: Vec<String>,
}

fn to_screen(texts: &[&str]) -> Vec<ScreenText> {
	texts
		.iter()
		.map(|t| ScreenText::new(*t, Bounds::new(0, 0, 100, 40)))
		.collect()
}

impl ScriptedAgent {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replaces the current screen content.
	pub fn set_screen(&self, texts: &[&str]) {
		let mut inner = self.inner.lock();
		inner.screens = vec![to_screen(texts)];
	}

	/// When `click_text(pattern)` runs, push this screen (simulates a page
	/// transition).
	pub fn route_click(&self, pattern: &str, texts: &[&str]) {
		self.inner
			.lock()
			.click_routes
			.insert(pattern.to_string(), to_screen(texts));
	}

	/// Root screen shown when the named app is opened.
	pub fn route_app(&self, app: &str, texts: &[&str]) {
		self.inner
			.lock()
			.app_screens
			.insert(app.to_string(), to_screen(texts));
	}

	pub fn calls(&self) -> Vec<String> {
		self.inner.lock().calls.clone()
	}

	pub fn current_app_name(&self) -> Option<String> {
		self.inner.lock().current_app.clone()
	}
}

#[async_trait]
impl DeviceAgent for ScriptedAgent {
	async fn click(&self, x: i32, y: i32) -> Result<()> {
		self.inner.lock().calls.push(format!("click({x},{y})"));
		Ok(())
	}

	async fn click_text(&self, pattern: &str) -> Result<bool> {
		let mut inner = self.inner.lock();
		inner.calls.push(format!("click_text({pattern})"));
		if let Some(screen) = inner.click_routes.get(pattern).cloned() {
			inner.screens.push(screen);
			return Ok(true);
		}
		let re = Regex::new(pattern).ok();
		let hit = inner
			.screens
			.last()
			.map(|screen| {
				screen.iter().any(|item| match &re {
					Some(re) => re.is_match(&item.text),
					None => item.text.contains(pattern),
				})
			})
			.unwrap_or(false);
		Ok(hit)
	}

	async fn go_back(&self) -> Result<()> {
		let mut inner = self.inner.lock();
		inner.calls.push("go_back".to_string());
		if inner.screens.len() > 1 {
			inner.screens.pop();
		}
		Ok(())
	}

	async fn go_home(&self) -> Result<()> {
		let mut inner = self.inner.lock();
		inner.calls.push("go_home".to_string());
		inner.current_app = None;
		inner.screens.clear();
		Ok(())
	}

	async fn open_app(&self, name: &str) -> Result<bool> {
		let mut inner = self.inner.lock();
		inner.calls.push(format!("open_app({name})"));
		inner.current_app = Some(name.to_string());
		let root = inner.app_screens.get(name).cloned().unwrap_or_default();
		inner.screens = vec![root];
		Ok(true)
	}

	async fn close_app(&self, name: &str) -> Result<()> {
		let mut inner = self.inner.lock();
		inner.calls.push(format!("close_app({name})"));
		if inner.current_app.as_deref() == Some(name) {
			inner.current_app = None;
			inner.screens.clear();
		}
		Ok(())
	}

	async fn current_app(&self) -> Result<Option<String>> {
		Ok(self.inner.lock().current_app.clone())
	}

	async fn read_screen(&self) -> Result<Vec<ScreenText>> {
		Ok(self.inner.lock().screens.last().cloned().unwrap_or_default())
	}

	async fn take_screenshot(&self) -> Result<Vec<u8>> {
		self.inner.lock().calls.push("take_screenshot".to_string());
		Ok(vec![0x89, b'P', b'N', b'G'])
	}
}
