//! Server configuration: TOML file with CLI overrides on top of defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::cli::Cli;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
	pub host: String,
	pub port: u16,
	/// Period of the per-device update loops, seconds.
	pub poll_interval_secs: u64,
	/// Default RPC timeout, seconds.
	pub rpc_timeout_secs: u64,
	pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
	pub attempts: u32,
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			host: "0.0.0.0".to_string(),
			port: 9000,
			poll_interval_secs: 1,
			rpc_timeout_secs: 8,
			reconnect: ReconnectConfig::default(),
		}
	}
}

impl Default for ReconnectConfig {
	fn default() -> Self {
		Self {
			attempts: 3,
			base_delay_ms: 1_000,
			max_delay_ms: 5_000,
		}
	}
}

impl Config {
	/// Loads the config file if given (or present at ./fleet.toml),
	/// falling back to defaults.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let path = match path {
			Some(path) => path.to_path_buf(),
			None => {
				let default = Path::new("fleet.toml");
				if !default.exists() {
					return Ok(Self::default());
				}
				default.to_path_buf()
			}
		};
		let text = std::fs::read_to_string(&path)
			.with_context(|| format!("reading config {}", path.display()))?;
		toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
	}

	pub fn merge_cli(mut self, cli: &Cli) -> Self {
		if let Some(host) = &cli.host {
			self.host = host.clone();
		}
		if let Some(port) = cli.port {
			self.port = port;
		}
		self
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs.max(1))
	}

	pub fn bind_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn defaults_without_a_file() {
		let config = Config::load(None).unwrap();
		assert_eq!(config.port, 9000);
		assert_eq!(config.reconnect.attempts, 3);
	}

	#[test]
	fn file_values_with_unknown_keys_ignored() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			"port = 9100\npoll_interval_secs = 2\nfuture_knob = true\n\n[reconnect]\nattempts = 5"
		)
		.unwrap();

		let config = Config::load(Some(file.path())).unwrap();
		assert_eq!(config.port, 9100);
		assert_eq!(config.poll_interval(), Duration::from_secs(2));
		assert_eq!(config.reconnect.attempts, 5);
		// Unset keys keep their defaults.
		assert_eq!(config.host, "0.0.0.0");
		assert_eq!(config.reconnect.max_delay_ms, 5_000);
	}

	#[test]
	fn cli_overrides_file() {
		let cli = Cli {
			config: None,
			host: Some("127.0.0.1".to_string()),
			port: Some(1234),
			verbose: 0,
		};
		let config = Config::default().merge_cli(&cli);
		assert_eq!(config.bind_addr(), "127.0.0.1:1234");
	}
}
