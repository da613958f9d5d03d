//! Periodically evaluated rules that fire actions on match.
//!
//! One background loop iterates the active list at 1-second granularity;
//! each checker additionally spaces its evaluations by `interval` and
//! auto-disables once its absolute `timeout` lifetime passes. Disabling or
//! removing a checker from another thread takes effect at the next tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::action::{self, Flow};
use crate::agent::DeviceAgent;
use crate::error::Result;
use crate::rules::MatchRule;
use fleet_protocol::ScreenText;

/// Retirement policy after a successful action run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckerKind {
	/// Removed from the active list.
	Temp,
	/// Disabled but remains registered.
	Once,
	/// Persists indefinitely (continuous detection).
	Always,
}

/// Registration-time description of a checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerSpec {
	pub name: String,
	/// Match rule gating the action table.
	pub rule: String,
	/// (trigger, action) pairs walked in declaration order. An empty
	/// trigger always fires.
	pub actions: Vec<(String, String)>,
	pub kind: CheckerKind,
	/// Minimum spacing between evaluations.
	pub interval: Duration,
	/// Absolute lifetime; zero means unlimited.
	pub timeout: Duration,
}

struct Checker {
	spec: CheckerSpec,
	rule: MatchRule,
	triggers: Vec<(Option<MatchRule>, String)>,
	enabled: bool,
	started: Instant,
	last_run: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerStatus {
	pub name: String,
	pub enabled: bool,
	pub kind: CheckerKind,
}

/// The process-wide active checker list plus its scheduling loop.
pub struct CheckerEngine {
	checkers: Mutex<Vec<Checker>>,
}

impl Default for CheckerEngine {
	fn default() -> Self {
		Self::new()
	}
}

impl CheckerEngine {
	pub fn new() -> Self {
		Self {
			checkers: Mutex::new(Vec::new()),
		}
	}

	/// Registers a checker, enabled, with its lifetime starting now.
	/// Re-adding an existing name replaces the old checker.
	pub fn add(&self, spec: CheckerSpec) -> Result<()> {
		let rule = MatchRule::parse(&spec.rule)?;
		let mut triggers = Vec::with_capacity(spec.actions.len());
		for (trigger, action) in &spec.actions {
			let trigger = match trigger.trim() {
				"" => None,
				raw => Some(MatchRule::parse(raw)?),
			};
			triggers.push((trigger, action.clone()));
		}
		let checker = Checker {
			rule,
			triggers,
			enabled: true,
			started: Instant::now(),
			last_run: None,
			spec,
		};
		let mut checkers = self.checkers.lock();
		if let Some(existing) = checkers.iter_mut().find(|c| c.spec.name == checker.spec.name) {
			*existing = checker;
		} else {
			checkers.push(checker);
		}
		Ok(())
	}

	pub fn remove(&self, name: &str) -> bool {
		let mut checkers = self.checkers.lock();
		let before = checkers.len();
		checkers.retain(|c| c.spec.name != name);
		checkers.len() != before
	}

	/// Safe to call from any thread; the next tick observes the new state.
	pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
		let mut checkers = self.checkers.lock();
		match checkers.iter_mut().find(|c| c.spec.name == name) {
			Some(checker) => {
				checker.enabled = enabled;
				if enabled {
					checker.started = Instant::now();
					checker.last_run = None;
				}
				true
			}
			None => false,
		}
	}

	pub fn list(&self) -> Vec<CheckerStatus> {
		self.checkers
			.lock()
			.iter()
			.map(|c| CheckerStatus {
				name: c.spec.name.clone(),
				enabled: c.enabled,
				kind: c.spec.kind,
			})
			.collect()
	}

	/// The shared scheduling loop. Runs until `shutdown` flips true.
	pub async fn run(
		self: Arc<Self>,
		agent: Arc<dyn DeviceAgent>,
		mut shutdown: watch::Receiver<bool>,
	) {
		let mut tick = tokio::time::interval(Duration::from_secs(1));
		tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		loop {
			tokio::select! {
				_ = tick.tick() => {}
				_ = shutdown.changed() => {}
			}
			if *shutdown.borrow() {
				return;
			}
			let screen = match agent.read_screen().await {
				Ok(screen) => screen,
				Err(e) => {
					tracing::warn!("checker screen read failed: {e}");
					continue;
				}
			};
			self.tick(&screen, Instant::now(), agent.as_ref()).await;
		}
	}

	/// One evaluation pass. Split so tests can drive it directly.
	pub async fn tick(&self, screen: &[ScreenText], now: Instant, agent: &dyn DeviceAgent) {
		// Phase 1: under the lock, decide who fires and collect their
		// action walks. Nothing awaits here.
		let mut due: Vec<(String, Vec<String>)> = Vec::new();
		{
			let mut checkers = self.checkers.lock();
			for checker in checkers.iter_mut() {
				if !checker.enabled {
					continue;
				}
				if !checker.spec.timeout.is_zero()
					&& now.saturating_duration_since(checker.started) >= checker.spec.timeout
				{
					tracing::debug!(checker = %checker.spec.name, "lifetime expired");
					checker.enabled = false;
					continue;
				}
				if let Some(last) = checker.last_run
					&& now.saturating_duration_since(last) < checker.spec.interval
				{
					continue;
				}
				if !checker.rule.matches(screen) {
					continue;
				}
				checker.last_run = Some(now);
				let actions: Vec<String> = checker
					.triggers
					.iter()
					.filter(|(trigger, _)| match trigger {
						Some(rule) => rule.matches(screen),
						None => true,
					})
					.map(|(_, action)| action.clone())
					.collect();
				if !actions.is_empty() {
					due.push((checker.spec.name.clone(), actions));
				}
			}
		}

		// Phase 2: run the action walks without the lock.
		let mut succeeded: Vec<String> = Vec::new();
		for (name, actions) in due {
			let mut ran_any = false;
			for script in actions {
				match action::run(agent, &script).await {
					Ok(Flow::Exit) => {
						ran_any = true;
						break;
					}
					Ok(Flow::Continue) => ran_any = true,
					Err(e) => {
						tracing::warn!(checker = %name, action = %script, "checker action failed: {e}");
					}
				}
			}
			if ran_any {
				succeeded.push(name);
			}
		}

		// Phase 3: retire per kind.
		if !succeeded.is_empty() {
			let mut checkers = self.checkers.lock();
			checkers.retain_mut(|checker| {
				if !succeeded.contains(&checker.spec.name) {
					return true;
				}
				match checker.spec.kind {
					CheckerKind::Temp => false,
					CheckerKind::Once => {
						checker.enabled = false;
						true
					}
					CheckerKind::Always => true,
				}
			});
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::ScriptedAgent;
	use fleet_protocol::Bounds;

	fn screen(texts: &[&str]) -> Vec<ScreenText> {
		texts
			.iter()
			.map(|t| ScreenText::new(*t, Bounds::default()))
			.collect()
	}

	fn spec(name: &str, kind: CheckerKind) -> CheckerSpec {
		CheckerSpec {
			name: name.to_string(),
			rule: "弹窗".to_string(),
			actions: vec![("关闭".to_string(), "click 关闭".to_string())],
			kind,
			interval: Duration::ZERO,
			timeout: Duration::ZERO,
		}
	}

	#[tokio::test]
	async fn temp_checker_removes_itself_after_success() {
		let engine = CheckerEngine::new();
		engine.add(spec("popup", CheckerKind::Temp)).unwrap();
		let agent = ScriptedAgent::new();

		engine.tick(&screen(&["弹窗", "关闭"]), Instant::now(), &agent).await;
		assert!(engine.list().is_empty());
		assert_eq!(agent.calls(), vec!["click_text(关闭)"]);
	}

	#[tokio::test]
	async fn once_checker_disables_but_stays_registered() {
		let engine = CheckerEngine::new();
		engine.add(spec("popup", CheckerKind::Once)).unwrap();
		let agent = ScriptedAgent::new();

		engine.tick(&screen(&["弹窗", "关闭"]), Instant::now(), &agent).await;
		let status = engine.list();
		assert_eq!(status.len(), 1);
		assert!(!status[0].enabled);

		// Disabled checkers do not fire again.
		engine.tick(&screen(&["弹窗", "关闭"]), Instant::now(), &agent).await;
		assert_eq!(agent.calls().len(), 1);
	}

	#[tokio::test]
	async fn always_checker_keeps_firing() {
		let engine = CheckerEngine::new();
		engine.add(spec("popup", CheckerKind::Always)).unwrap();
		let agent = ScriptedAgent::new();

		let now = Instant::now();
		engine.tick(&screen(&["弹窗", "关闭"]), now, &agent).await;
		engine.tick(&screen(&["弹窗", "关闭"]), now + Duration::from_secs(1), &agent).await;
		assert_eq!(agent.calls().len(), 2);
		assert!(engine.list()[0].enabled);
	}

	#[tokio::test]
	async fn unmatched_rule_runs_nothing() {
		let engine = CheckerEngine::new();
		engine.add(spec("popup", CheckerKind::Always)).unwrap();
		let agent = ScriptedAgent::new();
		engine.tick(&screen(&["正常页面"]), Instant::now(), &agent).await;
		assert!(agent.calls().is_empty());
	}

	#[tokio::test]
	async fn interval_spaces_evaluations() {
		let engine = CheckerEngine::new();
		let mut s = spec("popup", CheckerKind::Always);
		s.interval = Duration::from_secs(10);
		engine.add(s).unwrap();
		let agent = ScriptedAgent::new();

		let now = Instant::now();
		engine.tick(&screen(&["弹窗", "关闭"]), now, &agent).await;
		engine.tick(&screen(&["弹窗", "关闭"]), now + Duration::from_secs(3), &agent).await;
		assert_eq!(agent.calls().len(), 1);
		engine.tick(&screen(&["弹窗", "关闭"]), now + Duration::from_secs(11), &agent).await;
		assert_eq!(agent.calls().len(), 2);
	}

	#[tokio::test]
	async fn lifetime_timeout_auto_disables() {
		let engine = CheckerEngine::new();
		let mut s = spec("popup", CheckerKind::Always);
		s.timeout = Duration::from_secs(5);
		engine.add(s).unwrap();
		let agent = ScriptedAgent::new();

		let now = Instant::now();
		engine.tick(&screen(&["弹窗", "关闭"]), now + Duration::from_secs(6), &agent).await;
		assert!(agent.calls().is_empty());
		assert!(!engine.list()[0].enabled);
	}

	#[tokio::test]
	async fn exit_action_stops_the_walk() {
		let engine = CheckerEngine::new();
		engine
			.add(CheckerSpec {
				name: "multi".to_string(),
				rule: String::new(),
				actions: vec![
					("".to_string(), "click 第一".to_string()),
					("".to_string(), "exit".to_string()),
					("".to_string(), "click 不该执行".to_string()),
				],
				kind: CheckerKind::Always,
				interval: Duration::ZERO,
				timeout: Duration::ZERO,
			})
			.unwrap();
		let agent = ScriptedAgent::new();

		engine.tick(&screen(&["第一"]), Instant::now(), &agent).await;
		assert_eq!(agent.calls(), vec!["click_text(第一)"]);
	}

	#[tokio::test]
	async fn trigger_walk_runs_each_matching_pair() {
		let engine = CheckerEngine::new();
		engine
			.add(CheckerSpec {
				name: "multi".to_string(),
				rule: String::new(),
				actions: vec![
					("跳过".to_string(), "click 跳过".to_string()),
					("同意".to_string(), "click 同意".to_string()),
					("不在屏幕上".to_string(), "click 不在屏幕上".to_string()),
				],
				kind: CheckerKind::Always,
				interval: Duration::ZERO,
				timeout: Duration::ZERO,
			})
			.unwrap();
		let agent = ScriptedAgent::new();

		engine.tick(&screen(&["跳过", "同意"]), Instant::now(), &agent).await;
		assert_eq!(agent.calls(), vec!["click_text(跳过)", "click_text(同意)"]);
	}

	#[tokio::test]
	async fn disable_from_another_thread_is_seen_next_tick() {
		let engine = Arc::new(CheckerEngine::new());
		engine.add(spec("popup", CheckerKind::Always)).unwrap();
		let agent = ScriptedAgent::new();

		let remote = Arc::clone(&engine);
		tokio::task::spawn_blocking(move || {
			remote.set_enabled("popup", false);
		})
		.await
		.unwrap();

		engine.tick(&screen(&["弹窗", "关闭"]), Instant::now(), &agent).await;
		assert!(agent.calls().is_empty());
	}
}
