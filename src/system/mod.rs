//! Thin proxies to the operating system.

pub mod command;
pub mod fs;
pub mod link;
pub mod parsers;
pub mod service;

pub use command::{CommandExecutor, CommandLine, CommandOutput, ProcessExecutor, execute_checked};
pub use fs::{FileSystem, LocalFileSystem};
pub use link::{IpLink, LinkController};
pub use service::{ServiceController, Systemctl};
