// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! History file management: list, export, import, size, delete

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Args, ValueEnum};
use tb_history::{
    format_file_size, history_path, list_history_files, ArchiveSelection, ExportFilter,
    HistoryConfig, HistoryFileInfo, HistoryStore,
};

fn storage_dir(config: &HistoryConfig) -> anyhow::Result<PathBuf> {
    config
        .storage_dir()
        .context("Failed to determine history storage directory")
}

/// Open an existing session's history; a missing file is an error here
fn open_existing(config: &HistoryConfig, session: &str) -> anyhow::Result<HistoryStore> {
    let dir = storage_dir(config)?;
    if !history_path(&dir, session)?.exists() {
        bail!("No history for session {} in {}", session, dir.display());
    }
    HistoryStore::create_or_open(&dir, session, Local::now())
        .with_context(|| format!("Failed to open history for session {}", session))
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn run(self, config: &HistoryConfig) -> anyhow::Result<()> {
        let dir = storage_dir(config)?;
        let files = list_history_files(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?;
        let mut out = std::io::stdout().lock();
        if self.json {
            writeln!(out, "{}", serde_json::to_string_pretty(&list_json(&files))?)?;
        } else {
            write_table(&mut out, &dir, &files)?;
        }
        Ok(())
    }
}

fn list_json(files: &[HistoryFileInfo]) -> serde_json::Value {
    files
        .iter()
        .map(|info| {
            serde_json::json!({
                "session_id": info.session_id,
                "path": info.path.display().to_string(),
                "created_at": info.created_at.to_rfc3339(),
                "size": info.size,
                "archives": info.archives_count,
            })
        })
        .collect()
}

fn write_table(out: &mut impl Write, dir: &Path, files: &[HistoryFileInfo]) -> std::io::Result<()> {
    if files.is_empty() {
        return writeln!(out, "No history files in {}", dir.display());
    }
    writeln!(out, "{:<34} {:<20} {:>8} {:>9}", "SESSION", "CREATED", "ARCHIVES", "SIZE")?;
    for info in files {
        writeln!(
            out,
            "{:<34} {:<20} {:>8} {:>9}",
            info.session_id,
            info.created_at.format("%Y-%m-%d %H:%M:%S"),
            info.archives_count,
            format_file_size(info.size)
        )?;
    }
    Ok(())
}

/// Lines written by `tb export`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ExportLines {
    #[default]
    All,
    Content,
    Markers,
}

impl From<ExportLines> for ExportFilter {
    fn from(lines: ExportLines) -> Self {
        match lines {
            ExportLines::All => ExportFilter::All,
            ExportLines::Content => ExportFilter::ContentOnly,
            ExportLines::Markers => ExportFilter::MarkersOnly,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    pub session: String,

    /// Export only the archive at this index (oldest is 0)
    #[arg(long)]
    pub archive: Option<usize>,

    #[arg(long, value_enum, default_value_t = ExportLines::All)]
    pub lines: ExportLines,

    /// Write to a file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

impl ExportArgs {
    pub fn run(self, config: &HistoryConfig) -> anyhow::Result<()> {
        let store = open_existing(config, &self.session)?;
        let selection = self.archive.map_or(ArchiveSelection::All, ArchiveSelection::Index);
        let text = store.export_plaintext(selection, self.lines.into())?;
        match &self.output {
            Some(path) => {
                std::fs::write(path, &text)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                eprintln!("tb: exported {} to {}", self.session, path.display());
            }
            None => std::io::stdout().lock().write_all(text.as_bytes())?,
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// History file to read
    pub file: PathBuf,

    /// Append the file's archives to this session instead of printing them
    #[arg(long, value_name = "SESSION")]
    pub merge_into: Option<String>,
}

impl ImportArgs {
    pub fn run(self, config: &HistoryConfig) -> anyhow::Result<()> {
        match &self.merge_into {
            Some(session) => {
                let dir = storage_dir(config)?;
                let mut store = HistoryStore::create_or_open(&dir, session, Local::now())?;
                let added = store
                    .merge_import(&self.file, Local::now())
                    .with_context(|| format!("Failed to import {}", self.file.display()))?;
                eprintln!("tb: merged {} archives into session {}", added, session);
            }
            None => {
                let file = HistoryStore::import(&self.file)
                    .with_context(|| format!("Failed to import {}", self.file.display()))?;
                let mut out = std::io::stdout().lock();
                for line in file.archives.iter().flat_map(|a| a.content_lines()) {
                    writeln!(out, "{}", line.content)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct SizeArgs {
    pub session: String,
}

impl SizeArgs {
    pub fn run(self, config: &HistoryConfig) -> anyhow::Result<()> {
        let store = open_existing(config, &self.session)?;
        println!("{}", format_file_size(store.file_size()?));
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    pub session: String,
}

impl DeleteArgs {
    pub fn run(self, config: &HistoryConfig) -> anyhow::Result<()> {
        let dir = storage_dir(config)?;
        let mut store = HistoryStore::create_or_open(&dir, &self.session, Local::now())
            .with_context(|| format!("Failed to open history for session {}", self.session))?;
        if store.delete(Local::now())? {
            eprintln!("tb: deleted {}", store.path().display());
        } else {
            eprintln!("tb: no history for session {}", self.session);
        }
        Ok(())
    }
}
