#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod console;
pub mod data;
pub mod display;
pub mod logging;
pub mod media;
pub mod picker;
pub mod reddit;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, run_once};
