use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use nsgtt::app;
use nsgtt::cli::{Cli, Invocation};
use nsgtt::config::{self, TrackerConfig};
use nsgtt::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("nsgtt error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<u8> {
    setup_tracing();
    let cli = Cli::parse();
    let home = config::nsgtt_home();
    let config = TrackerConfig::load_or_init(&home)?;
    let runtime = config.runtime_settings(&home);

    match cli.invocation() {
        Invocation::Run(request) => app::run_game(request, &runtime),
        Invocation::Install => app::install_shortcuts(&config),
        Invocation::Uninstall => app::uninstall_shortcuts(&config),
        Invocation::Show => app::show_stats(&runtime),
        Invocation::Doctor => app::doctor(&config, &runtime),
        Invocation::Daemon => app::run_daemon(&config, &runtime),
    }
}
