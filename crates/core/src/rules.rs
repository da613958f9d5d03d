//! Match rules evaluated against screen text.
//!
//! Rule grammar: `&`-joined required segments, each a `|`-alternation of
//! regex fragments. A segment holds if any alternative matches any piece of
//! screen text; the rule holds if every segment holds. The empty rule always
//! matches.

use fleet_protocol::ScreenText;
use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct MatchRule {
	raw: String,
	segments: Vec<Vec<Regex>>,
}

impl MatchRule {
	pub fn parse(raw: &str) -> Result<Self> {
		let raw = raw.trim();
		let mut segments = Vec::new();
		for segment in raw.split('&') {
			let segment = segment.trim();
			if segment.is_empty() {
				continue;
			}
			let mut alternatives = Vec::new();
			for fragment in segment.split('|') {
				let fragment = fragment.trim();
				if fragment.is_empty() {
					continue;
				}
				alternatives.push(Regex::new(fragment).map_err(|e| Error::InvalidRule {
					rule: raw.to_string(),
					reason: e.to_string(),
				})?);
			}
			if !alternatives.is_empty() {
				segments.push(alternatives);
			}
		}
		Ok(Self {
			raw: raw.to_string(),
			segments,
		})
	}

	pub fn empty() -> Self {
		Self {
			raw: String::new(),
			segments: Vec::new(),
		}
	}

	pub fn raw(&self) -> &str {
		&self.raw
	}

	pub fn is_empty(&self) -> bool {
		self.segments.is_empty()
	}

	pub fn matches(&self, screen: &[ScreenText]) -> bool {
		self.segments.iter().all(|alternatives| {
			alternatives
				.iter()
				.any(|re| screen.iter().any(|item| re.is_match(&item.text)))
		})
	}

	/// First screen item matched by the rule's first segment. Used to turn
	/// a match into a tap target.
	pub fn find<'a>(&self, screen: &'a [ScreenText]) -> Option<&'a ScreenText> {
		let alternatives = self.segments.first()?;
		screen
			.iter()
			.find(|item| alternatives.iter().any(|re| re.is_match(&item.text)))
	}
}

impl std::fmt::Display for MatchRule {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.raw)
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

	#[test]
	fn empty_rule_matches_anything() {
		let rule = MatchRule::parse("").unwrap();
		assert!(rule.is_empty());
		assert!(rule.matches(&screen(&[])));
		assert!(rule.matches(&screen(&["whatever"])));
	}

	#[test]
	fn all_segments_must_hold() {
		let rule = MatchRule::parse("首页&我的").unwrap();
		assert!(rule.matches(&screen(&["首页", "我的", "发现"])));
		assert!(!rule.matches(&screen(&["首页"])));
	}

	#[test]
	fn alternatives_within_a_segment() {
		let rule = MatchRule::parse("登录|注册").unwrap();
		assert!(rule.matches(&screen(&["注册"])));
		assert!(rule.matches(&screen(&["登录"])));
		assert!(!rule.matches(&screen(&["设置"])));
	}

	#[test]
	fn fragments_are_regexes() {
		let rule = MatchRule::parse(r"余额.?\d+").unwrap();
		assert!(rule.matches(&screen(&["余额 42 元"])));
		assert!(!rule.matches(&screen(&["余额未知"])));
	}

	#[test]
	fn bad_regex_is_an_error() {
		assert!(matches!(
			MatchRule::parse("(unclosed"),
			Err(Error::InvalidRule { .. })
		));
	}

	#[test]
	fn find_returns_the_matching_item() {
		let rule = MatchRule::parse("签到").unwrap();
		let items = screen(&["首页", "每日签到"]);
		assert_eq!(rule.find(&items).unwrap().text, "每日签到");
	}
}
