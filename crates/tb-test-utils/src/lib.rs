// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Terminal Browser Test Utilities
//!
//! Every test gets its own log file under `target/test-logs/<date>/`. The
//! `tracing` output of the code under test is captured into the same file,
//! so a failing test leaves one file with both the test's own notes and the
//! library's logs. Successful tests print a single line.

// Lets the attribute macros refer to `::tb_test_utils` from inside this crate
extern crate self as tb_test_utils;

pub mod guard;
pub mod logging;
pub mod macros;

pub use guard::TestLoggerGuard;
pub use logging::{create_unique_test_log, temp_storage_dir, TestLogError, TestLogger};
pub use tb_test_utils_macros::{logged_test, logged_tokio_test};

// Assertion macros are available at the crate root via #[macro_export]
