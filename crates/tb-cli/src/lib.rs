// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::path::PathBuf;

use clap::Subcommand;
use tb_logging::CliLoggingArgs;

pub mod commands;
pub mod config;

pub use clap::Parser;
pub use config::TbConfig;

#[derive(clap::Parser, Debug)]
#[command(
    name = "tb",
    about = "Terminal Browser: stream output into searchable history",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "TB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding .tbhist files; overrides the configuration file
    #[arg(long, global = true)]
    pub storage_path: Option<PathBuf>,

    #[command(flatten)]
    pub logging: CliLoggingArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pipe stdin through the terminal emulator and archive it on exit
    Stream(commands::stream::StreamArgs),
    /// List history files
    List(commands::history::ListArgs),
    /// Write a session's archives as plain text
    Export(commands::history::ExportArgs),
    /// Read a history file, or merge it into a session
    Import(commands::history::ImportArgs),
    /// Show the size of a session's history file
    Size(commands::history::SizeArgs),
    /// Delete a session's history file
    Delete(commands::history::DeleteArgs),
    /// Find archived lines by class, substring or regex
    Search(commands::search::SearchArgs),
}

impl Cli {
    /// Configuration file merged with command line overrides
    pub fn load_config(&self) -> anyhow::Result<TbConfig> {
        let mut config = TbConfig::load(self.config.as_deref())?;
        if let Some(path) = &self.storage_path {
            config.history.storage_path = Some(path.clone());
        }
        Ok(config)
    }
}

impl Commands {
    pub async fn run(self, config: &TbConfig) -> anyhow::Result<()> {
        let history = &config.history;
        match self {
            Commands::Stream(args) => args.run(history).await,
            Commands::List(args) => args.run(history),
            Commands::Export(args) => args.run(history),
            Commands::Import(args) => args.run(history),
            Commands::Size(args) => args.run(history),
            Commands::Delete(args) => args.run(history),
            Commands::Search(args) => args.run(history),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "tb",
            "list",
            "--storage-path",
            "/tmp/tb-history",
            "--log-level",
            "debug",
        ]);
        assert!(matches!(cli.command, Commands::List(_)));
        assert_eq!(cli.storage_path, Some(PathBuf::from("/tmp/tb-history")));
        assert_eq!(cli.logging.log_level, Some(tb_logging::CliLogLevel::Debug));

        let config = cli.load_config().unwrap();
        assert_eq!(
            config.history.storage_dir().unwrap(),
            PathBuf::from("/tmp/tb-history")
        );
    }

    #[test]
    fn test_stream_defaults() {
        let cli = Cli::parse_from(["tb", "stream", "--session", "build"]);
        let Commands::Stream(args) = cli.command else {
            panic!("expected stream");
        };
        assert_eq!(args.session.as_deref(), Some("build"));
        assert!(!args.plain);
    }
}
