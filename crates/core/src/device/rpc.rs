//! The `device` RPC class: remote inspection of device sessions.
//!
//! Instance resolution follows the `id` parameter — a named device, or the
//! first online device when no id is given.

use std::sync::Arc;

use chrono::Local;
use fleet_runtime::rpc::{Args, HandlerFuture, MethodSpec, ParamKind, ParamSpec, RpcHandler};
use serde_json::json;

use super::{Device, DeviceRegistry};

pub struct DeviceRpc {
	registry: Arc<DeviceRegistry>,
}

impl DeviceRpc {
	pub fn new(registry: Arc<DeviceRegistry>) -> Self {
		Self { registry }
	}

	fn resolve(&self, id: Option<&str>) -> fleet_runtime::Result<Arc<Device>> {
		match id {
			Some(id) => self
				.registry
				.get(id)
				.ok_or_else(|| fleet_runtime::Error::MissingInstance {
					class: "device".to_string(),
					id: id.to_string(),
				}),
			None => self
				.registry
				.online()
				.into_iter()
				.next()
				.ok_or_else(|| fleet_runtime::Error::MissingInstance {
					class: "device".to_string(),
					id: "<first online>".to_string(),
				}),
		}
	}
}

impl RpcHandler for DeviceRpc {
	fn class_name(&self) -> &'static str {
		"device"
	}

	fn methods(&self) -> &'static [MethodSpec] {
		const METHODS: &[MethodSpec] = &[
			MethodSpec {
				name: "getAppList",
				params: &[],
			},
			MethodSpec {
				name: "getTaskList",
				params: &[ParamSpec {
					name: "date",
					kind: ParamKind::Date,
				}],
			},
			MethodSpec {
				name: "getState",
				params: &[],
			},
		];
		METHODS
	}

	fn invoke<'a>(&'a self, method: &'a str, id: Option<&'a str>, args: Args) -> HandlerFuture<'a> {
		Box::pin(async move {
			let device = self.resolve(id)?;
			match method {
				"getAppList" => {
					let apps = device.apps.lock().await.snapshots();
					Ok(serde_json::to_value(apps)?)
				}
				"getTaskList" => {
					let date = match args.get("date") {
						Some(_) => args.date("date")?,
						None => Local::now().date_naive(),
					};
					let records = self.registry.store().day_tasks(&device.id, date);
					let tasks: Vec<_> = records
						.into_iter()
						.map(|r| {
							json!({
								"id": r.id,
								"appName": r.app_name,
								"taskName": r.task_name,
								"state": r.state,
								"progress": r.progress,
								"score": r.score,
								"life": r.life,
							})
						})
						.collect();
					Ok(json!(tasks))
				}
				"getState" => Ok(json!(device.state().as_str())),
				_ => unreachable!("router filters unknown methods"),
			}
		})
	}
}
