// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `tb search`: apply a line filter to a session's archived content

use std::io::Write;

use anyhow::Context;
use clap::{ArgGroup, Args};
use tb_history::{classify, history_path, load_file, Filter, HistoryConfig, HistoryFile, LineClass};

fn parse_class(name: &str) -> Result<LineClass, String> {
    LineClass::from_name(&name.to_lowercase()).ok_or_else(|| {
        let known: Vec<&str> = LineClass::ALL.iter().map(|c| c.name()).collect();
        format!("unknown line class '{}' (expected one of: {})", name, known.join(", "))
    })
}

#[derive(Args, Debug, Clone)]
#[command(group(
    ArgGroup::new("filter")
        .required(true)
        .args(["classes", "contains", "regex"])
))]
pub struct SearchArgs {
    pub session: String,

    /// Line class to match, repeatable (error, warning, http5xx, ...)
    #[arg(long = "class", value_parser = parse_class)]
    pub classes: Vec<LineClass>,

    /// Case-insensitive substring
    #[arg(long)]
    pub contains: Option<String>,

    #[arg(long)]
    pub regex: Option<String>,
}

impl SearchArgs {
    fn filter(&self) -> anyhow::Result<Filter> {
        if let Some(pattern) = &self.regex {
            return Filter::regex(pattern).with_context(|| format!("Invalid regex {}", pattern));
        }
        if let Some(needle) = &self.contains {
            return Ok(Filter::contains(needle.as_str()));
        }
        Ok(Filter::classes(self.classes.iter().copied()))
    }

    pub fn run(self, config: &HistoryConfig) -> anyhow::Result<()> {
        let filter = self.filter()?;
        let dir = config.storage_dir()?;
        let path = history_path(&dir, &self.session)?;
        let file = load_file(&path).with_context(|| format!("Failed to load {}", path.display()))?;
        let hits = write_matches(&mut std::io::stdout().lock(), &file, &filter)?;
        eprintln!("tb: {} matching lines", hits);
        Ok(())
    }
}

/// `archive:row: [class] text` for each match; returns the match count
fn write_matches(out: &mut impl Write, file: &HistoryFile, filter: &Filter) -> std::io::Result<usize> {
    let mut hits = 0;
    for (index, archive) in file.archives.iter().enumerate() {
        for line in archive.content_lines().filter(|l| filter.matches(&l.content)) {
            writeln!(
                out,
                "{}:{}: [{}] {}",
                index,
                line.row,
                classify(&line.content),
                line.content
            )?;
            hits += 1;
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use tb_history::{ArchiveRecord, LineEntry};
    use tb_test_utils::logged_test;

    fn args(classes: Vec<LineClass>, contains: Option<&str>, regex: Option<&str>) -> SearchArgs {
        SearchArgs {
            session: "s".into(),
            classes,
            contains: contains.map(str::to_string),
            regex: regex.map(str::to_string),
        }
    }

    fn file() -> HistoryFile {
        let mut file = HistoryFile::new("s", Local::now());
        file.push_archive(ArchiveRecord::new(
            Local::now(),
            vec![
                LineEntry::content(0, "$ curl localhost", None),
                LineEntry::content(1, "HTTP/1.1 503 Service Unavailable", None),
                LineEntry::content(2, "warning: retrying", None),
            ],
            "0-3",
            "curl",
        ));
        file
    }

    #[logged_test]
    fn test_parse_class() {
        assert_eq!(parse_class("HTTP5xx"), Ok(LineClass::Http5xx));
        assert!(parse_class("loud").unwrap_err().contains("expected one of"));
    }

    #[logged_test]
    fn test_write_matches_by_class() {
        let mut out = Vec::new();
        let filter = args(vec![LineClass::Http5xx, LineClass::Warning], None, None)
            .filter()
            .unwrap();
        let hits = write_matches(&mut out, &file(), &filter).unwrap();
        assert_eq!(hits, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "0:1: [http5xx] HTTP/1.1 503 Service Unavailable\n0:2: [warning] warning: retrying\n"
        );
    }

    #[logged_test]
    fn test_regex_takes_precedence_and_is_validated() {
        assert!(args(vec![], Some("x"), Some("(")).filter().is_err());

        let filter = args(vec![], None, Some(r"^\$ ")).filter().unwrap();
        let mut out = Vec::new();
        assert_eq!(write_matches(&mut out, &file(), &filter).unwrap(), 1);
    }
}
