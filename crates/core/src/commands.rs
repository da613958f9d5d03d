//! The standard command set, registered against a [`Context`] at startup.
//!
//! Commands that drive the screen register only when the process has a
//! local [`DeviceAgent`]; pure control-plane commands register everywhere.
//! Result strings follow the `<severity>~` convention.

use std::sync::Arc;

use chrono::Local;
use fleet_protocol::TaskState;

use crate::agent::DeviceAgent;
use crate::command::{CommandSpec, boxed};
use crate::context::Context;
use crate::error::Result;

const MODULE: &str = "builtin";

fn spec(alias: &str, params: Option<&str>, name: &str, doc: &str) -> CommandSpec {
	CommandSpec {
		alias: alias.to_string(),
		params: params.map(str::to_string),
		module: MODULE.to_string(),
		name: name.to_string(),
		doc: doc.to_string(),
	}
}

/// Registers every built-in command. Safe to call again after a reload: the
/// registry replaces entries instead of duplicating them.
pub fn register_builtins(ctx: &Arc<Context>) -> Result<()> {
	register_control(ctx)?;
	if ctx.agent.is_some() {
		register_agent(ctx)?;
	}
	Ok(())
}

fn register_control(ctx: &Arc<Context>) -> Result<()> {
	// 时间
	ctx.commands.register(
		spec("时间|time", None, "time", "时间 - 当前时间"),
		boxed(|_args| async {
			Ok(Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
		}),
	)?;

	// 命令列表
	let listed = Arc::clone(&ctx.commands);
	ctx.commands.register(
		spec("命令列表|cl", None, "cmdList", "命令列表 - 列出所有可用命令"),
		boxed(move |_args| {
			let listed = Arc::clone(&listed);
			async move {
				let mut out = String::from("可用命令:\n");
				for (name, alias, doc) in listed.describe() {
					out.push_str(&format!("  {name}\t{alias}\t{doc}\n"));
				}
				Ok(out)
			}
		}),
	)?;

	// 帮助
	let described = Arc::clone(&ctx.commands);
	ctx.commands.register(
		spec("帮助|help", Some(r"(?P<command>\S+)?"), "help", "帮助 [命令] - 查询命令用法"),
		boxed(move |args| {
			let described = Arc::clone(&described);
			async move {
				match args.get("command") {
					Some(name) => match described.find(name) {
						Some(spec) => Ok(format!("{}\n{}\n{}", spec.name, spec.alias, spec.doc)),
						None => Ok("e~无效指令".to_string()),
					},
					None => Ok("指令格式: <指令名> [参数]，指令列表用 cl 查询".to_string()),
				}
			}
		}),
	)?;

	// 开始任务
	let starter = Arc::clone(&ctx.devices);
	ctx.commands.register(
		spec(
			"开始任务|start",
			Some(r"(?P<appName>\S+)\s+(?P<taskName>\S+)"),
			"startTask",
			"开始任务 <应用> <任务> - 启动指定任务",
		),
		boxed(move |args| {
			let devices = Arc::clone(&starter);
			async move {
				let Some(sender) = args.sender_id.clone() else {
					return Ok("e~未知设备".to_string());
				};
				let app = args.get("appName").unwrap_or_default().to_string();
				let task = args.get("taskName").unwrap_or_default().to_string();
				devices.start_task(&sender, &app, &task).await?;
				Ok(format!("i~任务已启动[{app}/{task}]"))
			}
		}),
	)?;

	// 停止任务
	let stopper = Arc::clone(&ctx.devices);
	ctx.commands.register(
		spec(
			"停止任务|stop",
			Some(r"(?P<appName>\S+)\s+(?P<taskName>\S+)"),
			"stopTask",
			"停止任务 <应用> <任务> - 暂停指定任务",
		),
		boxed(move |args| {
			let devices = Arc::clone(&stopper);
			async move {
				let Some(sender) = args.sender_id.clone() else {
					return Ok("e~未知设备".to_string());
				};
				let app = args.get("appName").unwrap_or_default().to_string();
				let task = args.get("taskName").unwrap_or_default().to_string();
				devices
					.stop_task(&sender, &app, &task, TaskState::Paused)
					.await?;
				Ok(format!("i~任务已暂停[{app}/{task}]"))
			}
		}),
	)?;

	// 检查器列表
	let checkers = Arc::clone(&ctx.checkers);
	ctx.commands.register(
		spec("检查器|ck", None, "checkerList", "检查器 - 列出活动检查器"),
		boxed(move |_args| {
			let checkers = Arc::clone(&checkers);
			async move {
				let list = checkers.list();
				if list.is_empty() {
					return Ok("没有活动检查器".to_string());
				}
				let mut out = String::from("检查器:\n");
				for status in list {
					out.push_str(&format!(
						"  {} {}\n",
						status.name,
						if status.enabled { "启用" } else { "禁用" }
					));
				}
				Ok(out)
			}
		}),
	)?;

	Ok(())
}

fn register_agent(ctx: &Arc<Context>) -> Result<()> {
	let agent: Arc<dyn DeviceAgent> = match &ctx.agent {
		Some(agent) => Arc::clone(agent),
		None => return Ok(()),
	};

	// 打开
	let opener = Arc::clone(&agent);
	ctx.commands.register(
		spec("打开|open", Some(r"(?P<appName>\S+)"), "openApp", "打开 <应用> - 打开指定应用"),
		boxed(move |args| {
			let agent = Arc::clone(&opener);
			async move {
				let app = args.get("appName").unwrap_or_default().to_string();
				if agent.open_app(&app).await? {
					Ok(format!("i~正在打开应用[{app}]"))
				} else {
					Ok(format!("e~打开应用失败[{app}]"))
				}
			}
		}),
	)?;

	// 关闭
	let closer = Arc::clone(&agent);
	ctx.commands.register(
		spec("关闭|close", Some(r"(?P<appName>\S+)?"), "closeApp", "关闭 [应用] - 关闭指定或当前应用"),
		boxed(move |args| {
			let agent = Arc::clone(&closer);
			async move {
				let app = match args.get("appName") {
					Some(app) => app.to_string(),
					None => match agent.current_app().await? {
						Some(app) => app,
						None => return Ok("w~没有前台应用".to_string()),
					},
				};
				agent.close_app(&app).await?;
				Ok(format!("i~已关闭应用[{app}]"))
			}
		}),
	)?;

	// 返回
	let backer = Arc::clone(&agent);
	ctx.commands.register(
		spec("返回|back", None, "goBack", "返回 - 返回上一页"),
		boxed(move |_args| {
			let agent = Arc::clone(&backer);
			async move {
				agent.go_back().await?;
				Ok("i~已返回".to_string())
			}
		}),
	)?;

	// 主页
	let homer = Arc::clone(&agent);
	ctx.commands.register(
		spec("主页|home", None, "goHome", "主页 - 返回主屏幕"),
		boxed(move |_args| {
			let agent = Arc::clone(&homer);
			async move {
				agent.go_home().await?;
				Ok("i~已回到主屏幕".to_string())
			}
		}),
	)?;

	// 截屏
	let shooter = Arc::clone(&agent);
	ctx.commands.register(
		spec("截屏|screenshot", None, "screenshot", "截屏 - 截取当前屏幕"),
		boxed(move |_args| {
			let agent = Arc::clone(&shooter);
			async move {
				let bytes = agent.take_screenshot().await?;
				Ok(format!("i~截屏完成({}字节)", bytes.len()))
			}
		}),
	)?;

	Ok(())
}
