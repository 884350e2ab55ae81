// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build information for the `vmraid` binary.

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format version info for display.
pub fn format_version_info() -> String {
	format!(
		"vmraid version: {VERSION}\n\
		 Package:        {NAME}\n\
		 Platform:       {}-{}",
		std::env::consts::OS,
		std::env::consts::ARCH,
	)
}
