//! Severity tags carried inside command result strings.
//!
//! Handler results are plain strings optionally prefixed with a severity
//! marker (`e~message` or `e##message`). Callers parse the prefix to pick a
//! log level; an unrecognized or absent prefix defaults to [`Level::Info`].

use serde::{Deserialize, Serialize};

/// Severity of a command result string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
	Debug,
	Info,
	Warn,
	Error,
}

impl Level {
	fn from_tag(tag: char) -> Option<Self> {
		match tag.to_ascii_lowercase() {
			'd' => Some(Self::Debug),
			'i' => Some(Self::Info),
			'w' => Some(Self::Warn),
			'e' => Some(Self::Error),
			_ => None,
		}
	}

	/// Splits a result string into its severity and the untagged remainder.
	///
	/// Recognizes `<sev>~` and `<sev>##` prefixes; anything else is returned
	/// unchanged at [`Level::Info`].
	pub fn split_tagged(text: &str) -> (Self, &str) {
		let mut chars = text.chars();
		if let Some(tag) = chars.next()
			&& let Some(level) = Self::from_tag(tag)
		{
			let rest = chars.as_str();
			if let Some(body) = rest.strip_prefix('~') {
				return (level, body);
			}
			if let Some(body) = rest.strip_prefix("##") {
				return (level, body);
			}
		}
		(Self::Info, text)
	}

	/// Prefixes `text` with this level's `~` tag.
	pub fn tag(self, text: &str) -> String {
		format!("{}~{}", self.as_char(), text)
	}

	pub fn as_char(self) -> char {
		match self {
			Self::Debug => 'd',
			Self::Info => 'i',
			Self::Warn => 'w',
			Self::Error => 'e',
		}
	}
}

impl std::fmt::Display for Level {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_char())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn split_tilde_prefix() {
		assert_eq!(Level::split_tagged("e~boom"), (Level::Error, "boom"));
		assert_eq!(Level::split_tagged("w~careful"), (Level::Warn, "careful"));
		assert_eq!(Level::split_tagged("d~trace"), (Level::Debug, "trace"));
	}

	#[test]
	fn split_hash_prefix() {
		assert_eq!(Level::split_tagged("i##done"), (Level::Info, "done"));
		assert_eq!(Level::split_tagged("E##boom"), (Level::Error, "boom"));
	}

	#[test]
	fn untagged_defaults_to_info() {
		assert_eq!(Level::split_tagged("plain text"), (Level::Info, "plain text"));
		assert_eq!(Level::split_tagged(""), (Level::Info, ""));
		// A bare severity letter without a marker is content, not a tag.
		assert_eq!(Level::split_tagged("error"), (Level::Info, "error"));
	}

	#[test]
	fn tag_round_trips() {
		let tagged = Level::Warn.tag("低电量");
		assert_eq!(Level::split_tagged(&tagged), (Level::Warn, "低电量"));
	}
}
