//! Interpreter for compact action strings.
//!
//! Transition actions, checker triggers, and task begin/exit scripts are all
//! small `;`-separated action sequences driven against the [`DeviceAgent`]:
//!
//! ```text
//! click 签到; sleep 2; back
//! ```
//!
//! The `exit` verb marks the surrounding walk as finished — the checker
//! engine stops its trigger walk when a step yields [`Flow::Exit`].

use std::time::Duration;

use crate::agent::DeviceAgent;
use crate::error::{Error, Result};

/// What the caller should do after running an action sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	Continue,
	Exit,
}

/// Runs one action sequence. Unknown verbs are an error, not a panic; the
/// remaining steps after an `exit` are not executed.
pub async fn run(agent: &dyn DeviceAgent, script: &str) -> Result<Flow> {
	for step in script.split(';') {
		let step = step.trim();
		if step.is_empty() {
			continue;
		}
		let (verb, arg) = match step.split_once(char::is_whitespace) {
			Some((verb, arg)) => (verb, arg.trim()),
			None => (step, ""),
		};
		match verb {
			"click" => {
				if arg.is_empty() {
					return Err(Error::UnknownAction(step.to_string()));
				}
				agent.click_text(arg).await?;
			}
			"back" => agent.go_back().await?,
			"home" => agent.go_home().await?,
			"open" => {
				agent.open_app(arg).await?;
			}
			"close" => agent.close_app(arg).await?,
			"sleep" => {
				let secs: u64 = arg
					.parse()
					.map_err(|_| Error::UnknownAction(step.to_string()))?;
				tokio::time::sleep(Duration::from_secs(secs)).await;
			}
			"exit" => return Ok(Flow::Exit),
			_ => return Err(Error::UnknownAction(step.to_string())),
		}
	}
	Ok(Flow::Continue)
}

/// Default action for entering a child page: tap it by name.
pub fn default_entry(page_name: &str) -> String {
	format!("click {page_name}")
}

/// Default action for leaving to the parent page.
pub const DEFAULT_EXIT: &str = "back";
