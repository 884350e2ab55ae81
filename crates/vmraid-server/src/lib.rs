// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wiring behind the `vmraid` operator binary.

pub mod app;
pub mod commands;
pub mod jobs;
pub mod version;

pub use app::AppState;
