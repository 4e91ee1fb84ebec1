//! 命令行入口

pub mod sync;

pub use sync::{run, Cli};
