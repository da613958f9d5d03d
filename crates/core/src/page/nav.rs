//! Executes page transitions against the device agent.

use super::{App, PageId};
use crate::action;
use crate::agent::DeviceAgent;
use crate::error::{Error, Result};

/// Walks the page tree one edge at a time, confirming every destination
/// against the live screen.
pub struct Navigator<'a> {
	app: &'a App,
	agent: &'a dyn DeviceAgent,
}

impl<'a> Navigator<'a> {
	pub fn new(app: &'a App, agent: &'a dyn DeviceAgent) -> Self {
		Self { app, agent }
	}

	/// Moves from `*current` to `target`.
	///
	/// Descending into a child runs its configured entry action (default:
	/// tap the page name); ascending runs the configured exit action
	/// (default: back navigation). After every action the destination's
	/// match rules are re-checked against a fresh screen read — a mismatch
	/// aborts the walk with `*current` left at the last confirmed page.
	pub async fn go(&self, current: &mut PageId, target: PageId) -> Result<()> {
		let path = self.app.find_path(*current, target);
		for pair in path.windows(2) {
			let (from, to) = (pair[0], pair[1]);
			let from_page = self.app.page(from);
			let to_page = self.app.page(to);

			let action = match from_page.action_to(to_page.name()) {
				Some(configured) => configured.to_string(),
				// Child: enter by name. Parent: back out.
				None if to_page.parent() == Some(from) => action::default_entry(to_page.name()),
				None => action::DEFAULT_EXIT.to_string(),
			};
			action::run(self.agent, &action).await?;

			tokio::time::sleep(to_page.timeout()).await;

			let screen = self.agent.read_screen().await?;
			if !to_page.rule().matches(&screen) {
				tracing::warn!(
					from = from_page.name(),
					to = to_page.name(),
					"destination rules did not match after transition"
				);
				return Err(Error::Transition {
					from: from_page.name().to_string(),
					to: to_page.name().to_string(),
				});
			}
			*current = to;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::testing::ScriptedAgent;

	/// root -> home -> {video, mine} with zero settle time.
	fn sample_app() -> App {
		let mut app = App::new("demo", "");
		let home = app.add_page("home", app.root(), "首页").unwrap();
		app.add_page("video", home, "视频").unwrap();
		app.add_page("mine", home, "我的").unwrap();
		for name in ["home", "video", "mine"] {
			let id = app.find(name).unwrap();
			app.page_mut(id).set_timeout(Duration::ZERO);
		}
		app
	}

	#[tokio::test]
	async fn descends_with_default_click_and_confirms() {
		let app = sample_app();
		let agent = ScriptedAgent::new();
		agent.set_screen(&["首页"]);
		agent.route_click("video", &["视频"]);

		let mut current = app.find("home").unwrap();
		let nav = Navigator::new(&app, &agent);
		nav.go(&mut current, app.find("video").unwrap()).await.unwrap();

		assert_eq!(current, app.find("video").unwrap());
		assert_eq!(agent.calls(), vec!["click_text(video)"]);
	}

	#[tokio::test]
	async fn ascends_with_back_and_walks_through_the_ancestor() {
		let app = sample_app();
		let agent = ScriptedAgent::new();
		// Screen stack: home underneath, video on top; back pops to home,
		// then clicking "mine" pushes its screen.
		agent.set_screen(&["首页"]);
		agent.route_click("video", &["视频"]);
		agent.route_click("mine", &["我的"]);

		let mut current = app.find("home").unwrap();
		let nav = Navigator::new(&app, &agent);
		nav.go(&mut current, app.find("video").unwrap()).await.unwrap();
		nav.go(&mut current, app.find("mine").unwrap()).await.unwrap();

		assert_eq!(current, app.find("mine").unwrap());
		assert_eq!(
			agent.calls(),
			vec!["click_text(video)", "go_back", "click_text(mine)"]
		);
	}

	#[tokio::test]
	async fn configured_actions_override_defaults() {
		let mut app = sample_app();
		let home = app.find("home").unwrap();
		app.page_mut(home).set_action("video", "click 看视频赚钱");

		let agent = ScriptedAgent::new();
		agent.set_screen(&["首页"]);
		agent.route_click("看视频赚钱", &["视频"]);

		let mut current = home;
		Navigator::new(&app, &agent)
			.go(&mut current, app.find("video").unwrap())
			.await
			.unwrap();
		assert_eq!(agent.calls(), vec!["click_text(看视频赚钱)"]);
	}

	#[tokio::test]
	async fn failed_match_aborts_at_last_confirmed_page() {
		let app = sample_app();
		let agent = ScriptedAgent::new();
		agent.set_screen(&["首页"]);
		// Clicking "video" lands somewhere unexpected.
		agent.route_click("video", &["广告弹窗"]);

		let home = app.find("home").unwrap();
		let mut current = home;
		let err = Navigator::new(&app, &agent)
			.go(&mut current, app.find("video").unwrap())
			.await
			.unwrap_err();

		assert!(matches!(err, Error::Transition { .. }));
		// No silent partial success: still at home.
		assert_eq!(current, home);
	}
}
