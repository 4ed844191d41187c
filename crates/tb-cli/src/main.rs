// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Result;
use tb_cli::{Cli, Parser};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let mut logging = cli.logging.clone();
    config.logging.apply_to(&mut logging);
    logging.init("tb-cli")?;

    cli.command.run(&config).await
}
