// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-test log files
//!
//! Each test writes to its own file so that output from parallel tests never
//! interleaves. The test's own notes go through [`TestLogger::log`]; library
//! `tracing` output is appended to the same file by
//! [`TestLogger::capture_tracing`].

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use thiserror::Error;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Errors that can occur during test logging operations
#[derive(Error, Debug)]
pub enum TestLogError {
    #[error("Failed to create test log directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Failed to write to test log file: {path}")]
    WriteError { path: PathBuf },

    #[error("Invalid test name: {name}")]
    InvalidTestName { name: String },
}

/// Log file owned by one test
pub struct TestLogger {
    log_path: PathBuf,
    writer: BufWriter<File>,
    test_name: String,
    start_time: DateTime<Utc>,
}

impl TestLogger {
    /// Create a new test logger for the specified test
    ///
    /// ```rust
    /// use tb_test_utils::TestLogger;
    ///
    /// let mut logger = TestLogger::new("test_example").unwrap();
    /// logger.log("Starting test operations").unwrap();
    /// logger.finish_success().unwrap();
    /// ```
    pub fn new(test_name: &str) -> Result<Self, TestLogError> {
        validate_test_name(test_name)?;

        let log_path = create_unique_test_log(test_name)?;
        // Append mode: captured tracing output shares the file through a second handle
        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let mut logger = Self {
            log_path,
            writer: BufWriter::new(file),
            test_name: test_name.to_string(),
            start_time: Utc::now(),
        };
        logger.write_header()?;
        Ok(logger)
    }

    /// Log a message to the test log file
    pub fn log(&mut self, message: &str) -> Result<(), TestLogError> {
        let timestamp = Utc::now().format("%H:%M:%S%.3f");
        writeln!(self.writer, "[{}] {}", timestamp, message).map_err(|_| self.write_error())?;
        self.writer.flush().map_err(|_| self.write_error())?;
        Ok(())
    }

    /// Log structured data as JSON
    pub fn log_json<T: serde::Serialize>(&mut self, label: &str, data: &T) -> Result<(), TestLogError> {
        let json = serde_json::to_string_pretty(data).map_err(|_| self.write_error())?;
        self.log(&format!("{}: {}", label, json))
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Route `tracing` events on the current thread into this log file until
    /// the returned guard is dropped.
    ///
    /// The level defaults to `debug` and honours `RUST_LOG`.
    pub fn capture_tracing(&self) -> Result<DefaultGuard, TestLogError> {
        let file = OpenOptions::new().append(true).open(&self.log_path)?;
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .finish();
        Ok(tracing::subscriber::set_default(subscriber))
    }

    /// Finish the test successfully; prints one line to stdout
    pub fn finish_success(mut self) -> Result<PathBuf, TestLogError> {
        let elapsed = self.elapsed_secs();
        self.log(&format!("Test completed successfully in {:.3}s", elapsed))?;
        self.writer.flush().map_err(|_| self.write_error())?;
        drop(self.writer);

        println!("[ok] {} passed", self.test_name);
        Ok(self.log_path)
    }

    /// Finish the test as failed, printing the log path and size
    pub fn finish_failure(mut self, error_message: &str) -> Result<PathBuf, TestLogError> {
        let elapsed = self.elapsed_secs();
        self.log(&format!("Test failed after {:.3}s: {}", elapsed, error_message))?;
        self.writer.flush().map_err(|_| self.write_error())?;
        drop(self.writer);

        match fs::metadata(&self.log_path) {
            Ok(metadata) => println!(
                "[FAILED] {} - Log: {} ({} bytes)",
                self.test_name,
                self.log_path.display(),
                metadata.len()
            ),
            Err(_) => println!("[FAILED] {} - Log: {}", self.test_name, self.log_path.display()),
        }
        Ok(self.log_path)
    }

    fn elapsed_secs(&self) -> f64 {
        Utc::now().signed_duration_since(self.start_time).num_milliseconds() as f64 / 1000.0
    }

    fn write_error(&self) -> TestLogError {
        TestLogError::WriteError {
            path: self.log_path.clone(),
        }
    }

    fn write_header(&mut self) -> Result<(), TestLogError> {
        writeln!(self.writer, "=== Terminal Browser Test Log ===")?;
        writeln!(self.writer, "Test: {}", self.test_name)?;
        writeln!(
            self.writer,
            "Started: {}",
            self.start_time.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(self.writer, "Process: {}", std::process::id())?;
        writeln!(
            self.writer,
            "Thread: {}",
            std::thread::current().name().unwrap_or("unknown")
        )?;
        writeln!(self.writer, "=== Log Output ===")?;
        writeln!(self.writer)?;
        self.writer.flush().map_err(|_| self.write_error())?;
        Ok(())
    }
}

/// Unique log file path for `test_name`:
/// `target/test-logs/YYYY-MM-DD/<test>-HH-MM-SS-<uuid>.log`
pub fn create_unique_test_log(test_name: &str) -> Result<PathBuf, TestLogError> {
    let now = Utc::now();
    let log_dir = find_workspace_root()
        .join("target")
        .join("test-logs")
        .join(now.format("%Y-%m-%d").to_string());
    fs::create_dir_all(&log_dir)?;

    let filename = format!(
        "{}-{}-{}.log",
        sanitize_filename(test_name),
        now.format("%H-%M-%S"),
        Uuid::new_v4()
    );
    Ok(log_dir.join(filename))
}

/// Fresh temporary directory for history files, removed when dropped
pub fn temp_storage_dir(test_name: &str) -> Result<TempDir, TestLogError> {
    let prefix = format!("tb-history-{}-", sanitize_filename(test_name));
    Ok(tempfile::Builder::new().prefix(&prefix).tempdir()?)
}

/// Nearest ancestor whose Cargo.toml declares a `[workspace]`
fn find_workspace_root() -> PathBuf {
    let current_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    current_dir
        .ancestors()
        .find(|dir| {
            fs::read_to_string(dir.join("Cargo.toml"))
                .map(|content| content.contains("[workspace]"))
                .unwrap_or(false)
        })
        .map(Path::to_path_buf)
        .unwrap_or(current_dir)
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

fn validate_test_name(name: &str) -> Result<(), TestLogError> {
    if name.is_empty() {
        return Err(TestLogError::InvalidTestName {
            name: name.to_string(),
        });
    }
    if name.len() > 200 {
        return Err(TestLogError::InvalidTestName {
            name: format!("Name too long: {} chars", name.len()),
        });
    }
    Ok(())
}
