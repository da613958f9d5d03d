//! Pattern command registry.
//!
//! Commands are matched in three passes over the leading token of the
//! command text: anchored alias patterns in registration order, then derived
//! abbreviations, then case-insensitive handler-name prefixes. A command's
//! parameter pattern must consume the whole remainder; its named captures
//! become handler keyword arguments.
//!
//! Re-registering a command with the same alias or the same (module, name)
//! pair replaces the prior entry in place, so hot-reloaded modules never
//! leave duplicate or stale entries behind. Dispatch never propagates an
//! error past its boundary: handler failures come back as `e~` result
//! strings.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

/// Arguments handed to a command handler.
#[derive(Debug, Default, Clone)]
pub struct CommandArgs {
	/// Named captures from the parameter pattern, trimmed.
	pub kwargs: HashMap<String, String>,
	/// Who issued the command, when known.
	pub sender_id: Option<String>,
	/// Opaque payload forwarded alongside the command text.
	pub data: Option<Value>,
}

impl CommandArgs {
	pub fn get(&self, name: &str) -> Option<&str> {
		self.kwargs.get(name).map(String::as_str)
	}
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
pub type Handler = Arc<dyn Fn(CommandArgs) -> HandlerFuture + Send + Sync>;

/// Wraps an async closure into the registry's boxed handler shape.
pub fn boxed<F, Fut>(f: F) -> Handler
where
	F: Fn(CommandArgs) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<String>> + Send + 'static,
{
	Arc::new(move |args| Box::pin(f(args)))
}

/// Static description of a command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
	/// Alias pattern matched against the leading token, e.g. `打开|open`.
	pub alias: String,
	/// Parameter pattern for the remainder; named captures become kwargs.
	/// `None` rejects any remainder.
	pub params: Option<String>,
	/// Source module, half of the replacement key.
	pub module: String,
	/// Handler name; drives the abbreviation and prefix fallback.
	pub name: String,
	/// One-line usage text shown by the help command.
	pub doc: String,
}

struct Entry {
	spec: CommandSpec,
	alias_re: Regex,
	abbrev: String,
	param_re: Option<Regex>,
	handler: Handler,
}

/// First letter plus subsequent capitals, lowercased: `startTask` -> `st`.
fn derive_abbrev(name: &str) -> String {
	let mut abbrev = String::new();
	let mut chars = name.chars();
	if let Some(first) = chars.next() {
		abbrev.push(first.to_ascii_lowercase());
	}
	abbrev.extend(chars.filter(|c| c.is_uppercase()).map(|c| c.to_ascii_lowercase()));
	abbrev
}

/// Outcome of a dispatch: the severity-tagged result string and the name of
/// the handler that ran, if any.
pub type Dispatched = (String, Option<String>);

pub struct CommandRegistry {
	entries: RwLock<Vec<Entry>>,
}

impl Default for CommandRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl CommandRegistry {
	pub fn new() -> Self {
		Self {
			entries: RwLock::new(Vec::new()),
		}
	}

	/// Registers or replaces a command.
	pub fn register(&self, spec: CommandSpec, handler: Handler) -> Result<()> {
		let alias_re = Regex::new(&format!("(?i)^(?:{})$", spec.alias)).map_err(|e| {
			Error::InvalidCommand {
				pattern: spec.alias.clone(),
				reason: e.to_string(),
			}
		})?;
		let param_re = match &spec.params {
			Some(pattern) => Some(Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
				Error::InvalidCommand {
					pattern: pattern.clone(),
					reason: e.to_string(),
				}
			})?),
			None => None,
		};
		let entry = Entry {
			abbrev: derive_abbrev(&spec.name),
			alias_re,
			param_re,
			spec,
			handler,
		};

		let mut entries = self.entries.write();
		let existing = entries.iter().position(|e| {
			e.spec.alias == entry.spec.alias
				|| (e.spec.module == entry.spec.module && e.spec.name == entry.spec.name)
		});
		match existing {
			// Swap in place: registration order and alias resolution stay
			// stable across hot reloads.
			Some(i) => entries[i] = entry,
			None => entries.push(entry),
		}
		Ok(())
	}

	/// Drops every command registered by `module`.
	pub fn unregister_module(&self, module: &str) {
		self.entries.write().retain(|e| e.spec.module != module);
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// (name, alias, doc) rows for the help/list commands.
	pub fn describe(&self) -> Vec<(String, String, String)> {
		self.entries
			.read()
			.iter()
			.map(|e| (e.spec.name.clone(), e.spec.alias.clone(), e.spec.doc.clone()))
			.collect()
	}

	pub fn find(&self, name: &str) -> Option<CommandSpec> {
		let name = name.to_lowercase();
		self.entries
			.read()
			.iter()
			.find(|e| e.spec.name.to_lowercase() == name || e.alias_re.is_match(&name))
			.map(|e| e.spec.clone())
	}

	/// Dispatches one command line. Never returns an error: every failure
	/// becomes a severity-tagged result string.
	pub async fn dispatch(
		&self,
		text: &str,
		sender_id: Option<&str>,
		data: Option<Value>,
	) -> Dispatched {
		let text = text.trim();
		if text.is_empty() {
			return (String::new(), None);
		}
		let (token, remainder) = match text.split_once(char::is_whitespace) {
			Some((token, rest)) => (token, rest.trim()),
			None => (text, ""),
		};

		let Some((name, param_re, handler)) = self.resolve(token) else {
			return (format!("e~unknown command: {token}"), None);
		};

		let mut kwargs = HashMap::new();
		match &param_re {
			Some(re) => match re.captures(remainder) {
				Some(caps) => {
					for group in re.capture_names().flatten() {
						if let Some(m) = caps.name(group) {
							kwargs.insert(group.to_string(), m.as_str().trim().to_string());
						}
					}
				}
				None => {
					return (format!("e~parameter format error: {name}"), Some(name));
				}
			},
			None if !remainder.is_empty() => {
				return (format!("e~parameter format error: {name}"), Some(name));
			}
			None => {}
		}

		let args = CommandArgs {
			kwargs,
			sender_id: sender_id.map(str::to_string),
			data,
		};
		match handler(args).await {
			Ok(result) => (result, Some(name)),
			Err(e) => (format!("e~{e}"), Some(name)),
		}
	}

	/// Three-pass lookup over the leading token. Clones what dispatch needs
	/// so no lock is held across the handler await.
	fn resolve(&self, token: &str) -> Option<(String, Option<Regex>, Handler)> {
		let entries = self.entries.read();
		let token_lower = token.to_lowercase();

		let found = entries
			.iter()
			.find(|e| e.alias_re.is_match(token))
			.or_else(|| entries.iter().find(|e| e.abbrev == token_lower))
			.or_else(|| {
				entries
					.iter()
					.find(|e| e.spec.name.to_lowercase().starts_with(&token_lower))
			})?;

		Some((
			found.spec.name.clone(),
			found.param_re.clone(),
			Arc::clone(&found.handler),
		))
	}
}
