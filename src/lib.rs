pub mod app;
pub mod cli;
pub mod config;
pub mod installer;
pub mod notes;
pub mod process;
pub mod process_guard;
pub mod rewriter;
pub mod shortcuts;
pub mod steam;
pub mod store;
pub mod tracker;
pub mod ui;
pub mod util;
pub mod vdf;
