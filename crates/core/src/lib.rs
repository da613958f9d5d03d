//! Fleet control-plane engine.
//!
//! The pieces shared by the server and the device client: the pattern
//! command registry, the per-app page navigation graph, the task state
//! machine, the checker engine, and the device session manager that routes
//! transport events between them. Actual UI work happens behind the
//! [`DeviceAgent`] capability boundary; this crate only calls it.

pub mod action;
pub mod agent;
pub mod checker;
pub mod command;
pub mod commands;
pub mod context;
pub mod device;
pub mod error;
pub mod page;
pub mod rules;
pub mod task;
pub mod testing;

pub use agent::DeviceAgent;
pub use checker::{CheckerEngine, CheckerKind, CheckerSpec};
pub use command::{CommandArgs, CommandRegistry, CommandSpec};
pub use context::Context;
pub use device::{DeviceRegistry, DeviceState};
pub use error::{Error, Result};
pub use page::{App, AppSet, PageId};
pub use task::{MemoryTaskStore, TaskCatalog, TaskConfig, TaskStore};
