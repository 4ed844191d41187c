// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Assertions that record their outcome in the test log

/// Assert a condition, logging it and its result first
///
/// ```rust,ignore
/// logged_assert!(logger, rows == 20, "resume keeps the newest fragments");
/// ```
#[macro_export]
macro_rules! logged_assert {
    ($logger:expr, $condition:expr) => {
        $crate::logged_assert!($logger, $condition, stringify!($condition))
    };
    ($logger:expr, $condition:expr, $message:expr) => {
        if let Err(e) = $logger.log(&format!("Asserting: {}", $message)) {
            eprintln!("Warning: Failed to write to test log: {}", e);
        }

        if $condition {
            if let Err(e) = $logger.log("Assertion passed") {
                eprintln!("Warning: Failed to write to test log: {}", e);
            }
        } else {
            if let Err(e) = $logger.log("Assertion failed") {
                eprintln!("Warning: Failed to write to test log: {}", e);
            }
            panic!("Assertion failed: {}", $message);
        }
    };
}

/// Equality assertion that logs both sides
///
/// ```rust,ignore
/// logged_assert_eq!(logger, summary.markers, 2);
/// ```
#[macro_export]
macro_rules! logged_assert_eq {
    ($logger:expr, $left:expr, $right:expr) => {{
        let (left, right) = (&$left, &$right);
        if let Err(e) = $logger.log(&format!(
            "Asserting equality: {} == {} ({:?} vs {:?})",
            stringify!($left),
            stringify!($right),
            left,
            right
        )) {
            eprintln!("Warning: Failed to write to test log: {}", e);
        }
        if left != right {
            if let Err(e) = $logger.log("Equality assertion failed") {
                eprintln!("Warning: Failed to write to test log: {}", e);
            }
            panic!(
                "assertion failed: `(left == right)`\n  left: `{:?}`,\n right: `{:?}`",
                left, right
            );
        }
    }};
}
