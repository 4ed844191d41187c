// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `tb stream`: the full pipeline on stdin

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tb_history::{
    spawn_reader, Emulator, HistoryConfig, PlainEmulator, ReaderEvent, SessionController,
    SystemClock, TickReport, VtEmulator, READ_BUFFER_SIZE,
};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

/// Scheduler period; matches the base flush interval
const TICK_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    /// Session id; a new one is generated when omitted
    #[arg(long)]
    pub session: Option<String>,

    /// Label stored with archives, usually the command producing the output
    #[arg(long)]
    pub command: Option<String>,

    /// Treat input as plain lines instead of emulating a terminal
    #[arg(long)]
    pub plain: bool,

    #[arg(long, default_value_t = 24)]
    pub rows: u16,

    #[arg(long, default_value_t = 120)]
    pub cols: u16,

    /// Rows kept in the emulator's scrollback
    #[arg(long, default_value_t = 10_000)]
    pub scrollback: usize,

    /// Seconds of silence that mark the stream as paused
    #[arg(long)]
    pub silence_threshold: Option<f64>,

    /// Keep every row in the grid instead of archiving the oldest ones
    #[arg(long)]
    pub no_auto_archive: bool,

    /// Do not echo flushed output to stdout
    #[arg(long, short)]
    pub quiet: bool,
}

impl StreamArgs {
    fn history_config(&self, base: &HistoryConfig) -> HistoryConfig {
        let mut config = base.clone();
        if let Some(seconds) = self.silence_threshold {
            config = config.with_silence_threshold(seconds);
        }
        if self.no_auto_archive {
            config = config.without_auto_archive();
        }
        config
    }

    fn emulator(&self) -> Box<dyn Emulator> {
        if self.plain {
            Box::new(PlainEmulator::new())
        } else {
            Box::new(VtEmulator::new(self.rows, self.cols, self.scrollback))
        }
    }

    fn report(&self, out: &mut impl Write, report: TickReport) -> anyhow::Result<()> {
        if let Some(text) = report.flushed {
            self.echo(out, &text)?;
        }
        if let Some(event) = report.event {
            info!(kind = %event.kind, gap_secs = event.gap_seconds, "Streaming state changed");
        }
        if let Some(summary) = report.archived {
            info!(
                row_range = %summary.row_range,
                lines = summary.line_count,
                "Auto-archived oldest rows"
            );
        }
        Ok(())
    }

    fn echo(&self, out: &mut impl Write, text: &str) -> anyhow::Result<()> {
        if self.quiet {
            return Ok(());
        }
        out.write_all(text.as_bytes())
            .and_then(|()| out.flush())
            .context("Failed to write to stdout")
    }

    pub async fn run(self, config: &HistoryConfig) -> anyhow::Result<()> {
        let config = self.history_config(config);
        let id = self
            .session
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let mut session = SessionController::open(id.clone(), config, self.emulator(), Arc::new(SystemClock))
            .with_context(|| format!("Failed to open session {}", id))?;
        if let Some(command) = &self.command {
            session.set_last_command(command.clone());
        }
        let history_path = session.history_path().to_path_buf();
        eprintln!("tb: session {} -> {}", id, history_path.display());

        let (tx, mut rx) = mpsc::unbounded_channel();
        // Not joined: a blocked stdin read must not hold up shutdown
        let _reader = spawn_reader(std::io::stdin(), READ_BUFFER_SIZE, tx);

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut out = std::io::stdout();

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(ReaderEvent::Data(bytes)) => session.ingest_bytes(&bytes),
                    Some(ReaderEvent::Eof) | None => break,
                    Some(ReaderEvent::Error(e)) => {
                        warn!(error = %e, "Input stream failed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let report = session.tick().await;
                    self.report(&mut out, report)?;
                }
                _ = &mut ctrl_c => {
                    info!("Interrupted, archiving session");
                    break;
                }
            }
        }

        if let Some(text) = session.flush_pending().await {
            self.echo(&mut out, &text)?;
        }
        match session.close().await.context("Failed to archive session")? {
            Some(summary) => eprintln!(
                "tb: archived {} lines ({} markers) to {} ({} archives)",
                summary.line_count,
                summary.markers,
                history_path.display(),
                summary.total_archives
            ),
            None => eprintln!("tb: nothing to archive"),
        }
        Ok(())
    }
}
