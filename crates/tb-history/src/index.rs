// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Incrementally maintained list of rows matching the active filter.
//!
//! The cache is rebuilt with one full scan after the filter changes. From
//! then on, growth only scans the new tail, shrinking truncates without
//! scanning, and navigation is a binary search over the sorted row list.
//!
//! Content that changes while keeping the same length (a redraw in place) is
//! not rescanned. That approximation keeps navigation cheap during heavy
//! output; switching the filter off and on forces a fresh scan.

use crate::classify::Filter;
use crate::emulator::Emulator;
use crate::error::Error;
use tracing::{debug, trace, warn};

/// Anything that can hand out row text by absolute index
pub trait RowSource {
    fn row_count(&mut self) -> usize;

    /// Text of rows `start..end`, clamped to `row_count()`
    fn row_texts(&mut self, start: usize, end: usize) -> Vec<String>;
}

impl<'a> RowSource for dyn Emulator + 'a {
    fn row_count(&mut self) -> usize {
        Emulator::row_count(self)
    }

    fn row_texts(&mut self, start: usize, end: usize) -> Vec<String> {
        self.rows(start, end).into_iter().map(|row| row.text).collect()
    }
}

impl<S: AsRef<str>> RowSource for [S] {
    fn row_count(&mut self) -> usize {
        self.len()
    }

    fn row_texts(&mut self, start: usize, end: usize) -> Vec<String> {
        let end = end.min(self.len());
        if start >= end {
            return Vec::new();
        }
        self[start..end].iter().map(|s| s.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>> RowSource for Vec<S> {
    fn row_count(&mut self) -> usize {
        self.len()
    }

    fn row_texts(&mut self, start: usize, end: usize) -> Vec<String> {
        self.as_mut_slice().row_texts(start, end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Default)]
pub struct FilteredIndexCache {
    filter: Option<Filter>,
    indices: Vec<usize>,
    valid: bool,
    /// Content length at the last scan or observation
    seen_len: usize,
    full_scans: usize,
}

impl FilteredIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.filter.is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Number of full O(n) scans performed so far
    pub fn full_scans(&self) -> usize {
        self.full_scans
    }

    /// Install a new predicate; the next query rescans
    pub fn activate_filter(&mut self, filter: Filter) {
        debug!(filter = ?filter, "Filter activated");
        self.filter = Some(filter);
        self.indices.clear();
        self.valid = false;
    }

    pub fn deactivate_filter(&mut self) {
        if self.filter.take().is_some() {
            debug!("Filter deactivated");
        }
        self.indices.clear();
        self.valid = false;
    }

    /// Scan rows `old_len..new_len` and append matches
    pub fn on_content_grown<R: RowSource + ?Sized>(&mut self, old_len: usize, new_len: usize, rows: &mut R) {
        self.seen_len = new_len;
        let Some(filter) = self.filter.as_ref() else {
            return;
        };
        if !self.valid || new_len <= old_len {
            return;
        }

        let last = self.indices.last().copied();
        let before = self.indices.len();
        for (offset, text) in rows.row_texts(old_len, new_len).iter().enumerate() {
            let row = old_len + offset;
            if last.is_some_and(|l| row <= l) {
                continue;
            }
            if filter.matches(text) {
                self.indices.push(row);
            }
        }
        trace!(
            scanned = new_len - old_len,
            matched = self.indices.len() - before,
            "Scanned appended rows"
        );
    }

    /// Drop cached rows at or beyond `new_len`. No rescan.
    pub fn on_content_shrunk(&mut self, new_len: usize) {
        let keep = self.indices.partition_point(|&row| row < new_len);
        self.indices.truncate(keep);
        self.seen_len = new_len;
    }

    /// Same length: content is assumed unchanged
    pub fn on_content_same_length(&mut self) {}

    /// Compare the current length with the last one seen and update
    pub fn observe<R: RowSource + ?Sized>(&mut self, rows: &mut R) {
        let len = rows.row_count();
        match len.cmp(&self.seen_len) {
            std::cmp::Ordering::Greater => self.on_content_grown(self.seen_len, len, rows),
            std::cmp::Ordering::Less => self.on_content_shrunk(len),
            std::cmp::Ordering::Equal => self.on_content_same_length(),
        }
    }

    /// Rows `0..count` were archived and removed from the grid
    pub fn on_rows_removed_from_top(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let first_kept = self.indices.partition_point(|&row| row < count);
        self.indices.drain(..first_kept);
        for row in &mut self.indices {
            *row -= count;
        }
        self.seen_len = self.seen_len.saturating_sub(count);
    }

    /// Sorted rows matching the filter; rescans only when the cache is
    /// invalid or found inconsistent
    pub fn get_indices<R: RowSource + ?Sized>(&mut self, rows: &mut R) -> &[usize] {
        if self.filter.is_none() {
            return &[];
        }
        if self.valid {
            self.observe(rows);
            if let Err(e) = self.check_consistency() {
                warn!(error = %e, "Rescanning filtered rows");
                self.valid = false;
            }
        }
        if !self.valid {
            self.full_scan(rows);
        }
        &self.indices
    }

    fn check_consistency(&self) -> Result<(), Error> {
        match self.indices.last() {
            Some(&last) if last >= self.seen_len => Err(Error::CacheInconsistency(format!(
                "row {} cached but content has {} rows",
                last, self.seen_len
            ))),
            _ => Ok(()),
        }
    }

    fn full_scan<R: RowSource + ?Sized>(&mut self, rows: &mut R) {
        let Some(filter) = self.filter.as_ref() else {
            return;
        };
        let len = rows.row_count();
        self.indices = rows
            .row_texts(0, len)
            .iter()
            .enumerate()
            .filter(|(_, text)| filter.matches(text))
            .map(|(row, _)| row)
            .collect();
        self.seen_len = len;
        self.valid = true;
        self.full_scans += 1;
        debug!(rows = len, matched = self.indices.len(), "Full filter scan");
    }

    /// Closest cached match strictly after or before `current_row`
    pub fn find_nearest(&self, current_row: usize, direction: Direction) -> Option<usize> {
        match direction {
            Direction::Next => {
                let at = self.indices.partition_point(|&row| row <= current_row);
                self.indices.get(at).copied()
            }
            Direction::Previous => {
                let at = self.indices.partition_point(|&row| row < current_row);
                at.checked_sub(1).map(|i| self.indices[i])
            }
        }
    }

    /// Navigation target from `current_row`, wrapping around the ends.
    ///
    /// Previous skips the row directly above so repeated presses from a
    /// match do not stall on a neighbouring one.
    pub fn jump<R: RowSource + ?Sized>(
        &mut self,
        rows: &mut R,
        current_row: usize,
        direction: Direction,
    ) -> Option<usize> {
        let indices = self.get_indices(rows);
        let (&first, &last) = (indices.first()?, indices.last()?);
        match direction {
            Direction::Next => {
                let at = indices.partition_point(|&row| row <= current_row);
                match indices.get(at) {
                    Some(&row) => Some(row),
                    None if first != current_row => Some(first),
                    None => None,
                }
            }
            Direction::Previous => {
                let bound = current_row.saturating_sub(1);
                let at = indices.partition_point(|&row| row < bound);
                match at.checked_sub(1) {
                    Some(i) => Some(indices[i]),
                    None if last.abs_diff(current_row) > 1 => Some(last),
                    None => None,
                }
            }
        }
    }
}
