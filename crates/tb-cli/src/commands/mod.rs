// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

pub mod history;
pub mod search;
pub mod stream;
