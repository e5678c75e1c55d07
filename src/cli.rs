use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "nsgtt",
    version,
    about = "Track play time of non-Steam games added as Steam shortcuts",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Launch a game and record the session once it exits.
    #[arg(long, value_name = "EXE", conflicts_with_all = ["install", "uninstall", "show"])]
    pub run: Option<PathBuf>,

    /// Name the session is stored under (defaults to the executable name).
    #[arg(long, visible_alias = "gamename", requires = "run")]
    pub name: Option<String>,

    /// Steam note file to refresh after the session.
    #[arg(long, visible_alias = "steamnote", value_name = "PATH", requires = "run")]
    pub note: Option<PathBuf>,

    /// Wrap every Steam shortcut so launches go through this tool.
    #[arg(long, action = ArgAction::SetTrue, conflicts_with_all = ["uninstall", "show"])]
    pub install: bool,

    /// Restore the original launch commands of wrapped shortcuts.
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "show")]
    pub uninstall: bool,

    /// Print recorded play time for every game.
    #[arg(long, action = ArgAction::SetTrue)]
    pub show: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a game and record the session once it exits.
    #[command(trailing_var_arg = true)]
    Run {
        #[arg(value_name = "EXE")]
        exe: PathBuf,
        #[arg(long, visible_alias = "gamename")]
        name: Option<String>,
        #[arg(long, visible_alias = "steamnote", value_name = "PATH")]
        note: Option<PathBuf>,
        #[arg(
            value_name = "GAME_ARGS",
            help = "Arguments passed directly to the game",
            allow_hyphen_values = true
        )]
        args: Vec<String>,
    },
    /// Check Steam discovery, the shortcut list and the database.
    Doctor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub exe: PathBuf,
    pub name: Option<String>,
    pub note: Option<PathBuf>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(RunRequest),
    Install,
    Uninstall,
    Show,
    Doctor,
    Daemon,
}

impl Cli {
    /// Folds flags and subcommands into the single action to perform.
    pub fn invocation(self) -> Invocation {
        match self.command {
            Some(Commands::Run {
                exe,
                name,
                note,
                args,
            }) => Invocation::Run(RunRequest {
                exe,
                name,
                note,
                args,
            }),
            Some(Commands::Doctor) => Invocation::Doctor,
            None => {
                if let Some(exe) = self.run {
                    Invocation::Run(RunRequest {
                        exe,
                        name: self.name,
                        note: self.note,
                        args: Vec::new(),
                    })
                } else if self.install {
                    Invocation::Install
                } else if self.uninstall {
                    Invocation::Uninstall
                } else if self.show {
                    Invocation::Show
                } else {
                    Invocation::Daemon
                }
            }
        }
    }
}
