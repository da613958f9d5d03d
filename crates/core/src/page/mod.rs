//! Per-application page navigation graph.
//!
//! Each [`App`] owns an insert-only tree of [`Page`]s rooted at a synthetic
//! root, so the graph is acyclic by construction and every page has exactly
//! one parent. Paths between pages go through the lowest common ancestor of
//! their root-paths.

mod nav;

pub use nav::Navigator;

use std::collections::HashMap;
use std::time::Duration;

use fleet_protocol::{AppSnapshot, DEFAULT_PAGE_TIMEOUT_MS, ScreenText};

use crate::error::{Error, Result};
use crate::rules::MatchRule;

/// Index of a page inside its owning [`App`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(usize);

#[derive(Debug, Clone)]
pub struct Page {
	name: String,
	rule: MatchRule,
	parent: Option<PageId>,
	children: HashMap<String, PageId>,
	/// Transition actions keyed by neighbor name.
	actions: HashMap<String, String>,
	timeout: Duration,
}

impl Page {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn rule(&self) -> &MatchRule {
		&self.rule
	}

	pub fn parent(&self) -> Option<PageId> {
		self.parent
	}

	pub fn children(&self) -> impl Iterator<Item = PageId> + '_ {
		self.children.values().copied()
	}

	/// How long to let the screen settle after transitioning here.
	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	pub fn set_timeout(&mut self, timeout: Duration) {
		self.timeout = timeout;
	}

	/// The configured action for moving to the named neighbor, if any.
	pub fn action_to(&self, neighbor: &str) -> Option<&str> {
		self.actions.get(neighbor).map(String::as_str)
	}

	pub fn set_action(&mut self, neighbor: impl Into<String>, action: impl Into<String>) {
		self.actions.insert(neighbor.into(), action.into());
	}
}

#[derive(Debug, Clone)]
pub struct App {
	name: String,
	description: String,
	/// Conversion ratio between in-app score units and currency.
	ratio: u32,
	pages: Vec<Page>,
	index: HashMap<String, PageId>,
}

impl App {
	pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
		let name = name.into();
		let root = Page {
			name: name.clone(),
			rule: MatchRule::empty(),
			parent: None,
			children: HashMap::new(),
			actions: HashMap::new(),
			timeout: Duration::from_millis(DEFAULT_PAGE_TIMEOUT_MS),
		};
		let mut index = HashMap::new();
		index.insert(name.clone(), PageId(0));
		Self {
			name,
			description: description.into(),
			ratio: 10_000,
			pages: vec![root],
			index,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn description(&self) -> &str {
		&self.description
	}

	pub fn ratio(&self) -> u32 {
		self.ratio
	}

	pub fn set_ratio(&mut self, ratio: u32) {
		self.ratio = ratio;
	}

	/// The synthetic root. It matches any screen.
	pub fn root(&self) -> PageId {
		PageId(0)
	}

	/// Adds a page under `parent`. Names are unique within an app; the tree
	/// is insert-only.
	pub fn add_page(&mut self, name: impl Into<String>, parent: PageId, rule: &str) -> Result<PageId> {
		let name = name.into();
		if self.index.contains_key(&name) {
			return Err(Error::PageExists(name));
		}
		let rule = MatchRule::parse(rule)?;
		let id = PageId(self.pages.len());
		self.pages.push(Page {
			name: name.clone(),
			rule,
			parent: Some(parent),
			children: HashMap::new(),
			actions: HashMap::new(),
			timeout: Duration::from_millis(DEFAULT_PAGE_TIMEOUT_MS),
		});
		self.pages[parent.0].children.insert(name.clone(), id);
		self.index.insert(name, id);
		Ok(id)
	}

	pub fn page(&self, id: PageId) -> &Page {
		&self.pages[id.0]
	}

	pub fn page_mut(&mut self, id: PageId) -> &mut Page {
		&mut self.pages[id.0]
	}

	pub fn find(&self, name: &str) -> Option<PageId> {
		self.index.get(name).copied()
	}

	pub fn get(&self, name: &str) -> Result<PageId> {
		self.find(name).ok_or_else(|| Error::UnknownPage(name.to_string()))
	}

	pub fn page_names(&self) -> impl Iterator<Item = &str> {
		self.pages.iter().map(|p| p.name.as_str())
	}

	/// Path from the root down to `id`, inclusive.
	fn root_path(&self, id: PageId) -> Vec<PageId> {
		let mut path = vec![id];
		let mut cursor = id;
		while let Some(parent) = self.pages[cursor.0].parent {
			path.push(parent);
			cursor = parent;
		}
		path.reverse();
		path
	}

	/// Ordered page list connecting `from` to `to`: up from `from` to their
	/// lowest common ancestor, then down to `to`. Within one app the shared
	/// root guarantees a path; no page repeats.
	pub fn find_path(&self, from: PageId, to: PageId) -> Vec<PageId> {
		let from_path = self.root_path(from);
		let to_path = self.root_path(to);

		let mut lca = 0;
		while lca + 1 < from_path.len()
			&& lca + 1 < to_path.len()
			&& from_path[lca + 1] == to_path[lca + 1]
		{
			lca += 1;
		}

		let mut path: Vec<PageId> = from_path[lca..].iter().rev().copied().collect();
		path.extend_from_slice(&to_path[lca + 1..]);
		path
	}

	/// First page whose (non-empty) match rules hold against the screen.
	pub fn match_page(&self, screen: &[ScreenText]) -> Option<PageId> {
		self.pages
			.iter()
			.enumerate()
			.find(|(_, page)| !page.rule.is_empty() && page.rule.matches(screen))
			.map(|(i, _)| PageId(i))
	}

	pub fn snapshot(&self) -> AppSnapshot {
		AppSnapshot {
			name: self.name.clone(),
			description: self.description.clone(),
		}
	}
}

/// A device's apps, created lazily on first reference.
#[derive(Debug, Default)]
pub struct AppSet {
	apps: HashMap<String, App>,
	current: Option<String>,
}

impl AppSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&App> {
		self.apps.get(name)
	}

	pub fn get_mut(&mut self, name: &str) -> Option<&mut App> {
		self.apps.get_mut(name)
	}

	pub fn get_or_create(&mut self, name: &str) -> &mut App {
		self.apps
			.entry(name.to_string())
			.or_insert_with(|| App::new(name, ""))
	}

	pub fn insert(&mut self, app: App) {
		self.apps.insert(app.name().to_string(), app);
	}

	pub fn current(&self) -> Option<&App> {
		self.current.as_deref().and_then(|name| self.apps.get(name))
	}

	pub fn current_name(&self) -> Option<&str> {
		self.current.as_deref()
	}

	pub fn set_current(&mut self, name: Option<&str>) {
		self.current = name.map(str::to_string);
	}

	/// Existence-symmetric path lookup across apps: pages of different apps
	/// live in disjoint trees and have no path.
	pub fn find_path(
		&self,
		from_app: &str,
		from_page: &str,
		to_app: &str,
		to_page: &str,
	) -> Result<Vec<String>> {
		if from_app != to_app {
			return Err(Error::NoPath {
				from: format!("{from_app}/{from_page}"),
				to: format!("{to_app}/{to_page}"),
			});
		}
		let app = self
			.apps
			.get(from_app)
			.ok_or_else(|| Error::UnknownApp(from_app.to_string()))?;
		let from = app.get(from_page)?;
		let to = app.get(to_page)?;
		Ok(app
			.find_path(from, to)
			.into_iter()
			.map(|id| app.page(id).name().to_string())
			.collect())
	}

	pub fn snapshots(&self) -> Vec<AppSnapshot> {
		self.apps.values().map(App::snapshot).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use fleet_protocol::Bounds;

	fn screen(texts: &[&str]) -> Vec<ScreenText> {
		texts
			.iter()
			.map(|t| ScreenText::new(*t, Bounds::default()))
			.collect()
	}

	/// root -> home -> {video, mine -> wallet}
	fn sample_app() -> (App, PageId, PageId, PageId, PageId) {
		let mut app = App::new("demo", "");
		let home = app.add_page("home", app.root(), "首页").unwrap();
		let video = app.add_page("video", home, "视频").unwrap();
		let mine = app.add_page("mine", home, "我的").unwrap();
		let wallet = app.add_page("wallet", mine, "钱包").unwrap();
		(app, home, video, mine, wallet)
	}

	#[test]
	fn duplicate_page_is_rejected() {
		let (mut app, home, ..) = sample_app();
		assert!(matches!(
			app.add_page("video", home, ""),
			Err(Error::PageExists(_))
		));
	}

	#[test]
	fn path_through_lowest_common_ancestor() {
		let (app, home, video, _mine, wallet) = sample_app();
		let names = |ids: Vec<PageId>| {
			ids.into_iter().map(|id| app.page(id).name().to_string()).collect::<Vec<_>>()
		};

		assert_eq!(names(app.find_path(video, wallet)), ["video", "home", "mine", "wallet"]);
		assert_eq!(names(app.find_path(wallet, video)), ["wallet", "mine", "home", "video"]);
		assert_eq!(names(app.find_path(home, home)), ["home"]);
	}

	#[test]
	fn path_never_repeats_a_page() {
		let (app, _home, video, _mine, wallet) = sample_app();
		let path = app.find_path(video, wallet);
		let mut seen = std::collections::HashSet::new();
		assert!(path.iter().all(|id| seen.insert(*id)));
	}

	#[test]
	fn cross_app_pages_have_no_path_both_ways() {
		let mut apps = AppSet::new();
		let (a, ..) = sample_app();
		apps.insert(a);
		let mut b = App::new("other", "");
		b.add_page("home", b.root(), "首页").unwrap();
		apps.insert(b);

		let forward = apps.find_path("demo", "video", "other", "home");
		let backward = apps.find_path("other", "home", "demo", "video");
		assert!(matches!(forward, Err(Error::NoPath { .. })));
		assert!(matches!(backward, Err(Error::NoPath { .. })));
	}

	#[test]
	fn match_page_picks_first_matching_rule() {
		let (app, _home, video, ..) = sample_app();
		assert_eq!(app.match_page(&screen(&["视频", "弹幕"])), Some(video));
		assert_eq!(app.match_page(&screen(&["无关内容"])), None);
	}

	#[test]
	fn apps_are_created_lazily() {
		let mut apps = AppSet::new();
		assert!(apps.get("微信").is_none());
		apps.get_or_create("微信").set_ratio(5_000);
		assert_eq!(apps.get("微信").unwrap().ratio(), 5_000);
	}
}
