pub mod agent;
pub mod client;
pub mod command;
pub mod config;
pub mod devices;
mod error;
pub mod executor;
mod process;
pub mod shutdown;
pub mod tasks;

#[cfg(all(test, unix))]
mod testing;

pub use agent::AgentLoop;
pub use client::ControlPlaneClient;
pub use command::Cli;
pub use config::{Config, Endpoints};
pub use devices::{DeviceReport, DeviceStatus};
pub use error::Error;
pub use executor::CommandExecutor;
pub use shutdown::Shutdown;
pub use tasks::{TaskDescriptor, TaskMode, TaskSnapshot, TaskStatus};
