// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// Closed `[lft, rgt]` interval of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
	pub lft: i64,
	pub rgt: i64,
}

impl Interval {
	pub fn new(lft: i64, rgt: i64) -> Self {
		Self { lft, rgt }
	}

	/// Number of boundary slots the node and its subtree occupy.
	pub fn width(&self) -> i64 {
		self.rgt - self.lft + 1
	}

	/// True when `other` lies inside this interval (inclusive).
	pub fn contains(&self, other: Interval) -> bool {
		self.lft <= other.lft && self.rgt >= other.rgt
	}

	/// True when `other` lies strictly inside this interval.
	pub fn strictly_contains(&self, other: Interval) -> bool {
		self.lft < other.lft && self.rgt > other.rgt
	}

	/// Unplaced nodes have not been given an interval yet.
	pub fn is_unplaced(&self) -> bool {
		self.lft == 0 && self.rgt == 0
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
	pub name: String,
	pub parent: Option<String>,
	pub lft: i64,
	pub rgt: i64,
}

impl TreeNode {
	pub fn new(name: impl Into<String>, parent: Option<String>, interval: Interval) -> Self {
		Self {
			name: name.into(),
			parent: parent.filter(|p| !p.is_empty()),
			lft: interval.lft,
			rgt: interval.rgt,
		}
	}

	pub fn interval(&self) -> Interval {
		Interval::new(self.lft, self.rgt)
	}

	pub fn is_root(&self) -> bool {
		self.parent.is_none()
	}
}
