// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Nested set tree model.
//!
//! Every node of a tree-shaped table carries an interval `[lft, rgt]`. A node
//! contains another when its interval encloses the other's, so ancestor and
//! descendant lookups become range comparisons instead of parent-pointer walks.
//!
//! This crate holds the pure model: interval arithmetic, loop validation, and
//! planning of inserts, moves and full rebuilds. Planned changes come back as a
//! [`Staging`] map (node name to new interval) that a storage layer applies in
//! one transaction.
//!
//! ```rust
//! use vmraid_nestedset_core::{Forest, Interval};
//!
//! let mut tree = Forest::new();
//! tree.insert("R", None).unwrap();
//! tree.insert("C1", Some("R")).unwrap();
//! tree.insert("C2", Some("R")).unwrap();
//!
//! assert_eq!(tree.get("R").unwrap().interval(), Interval::new(1, 6));
//! assert_eq!(tree.get("C1").unwrap().interval(), Interval::new(2, 3));
//! assert_eq!(tree.get("C2").unwrap().interval(), Interval::new(4, 5));
//! ```

pub mod error;
pub mod forest;
pub mod node;

pub use error::{NestedSetError, Result};
pub use forest::{validate_loop, Forest, Staging};
pub use node::{Interval, TreeNode};
