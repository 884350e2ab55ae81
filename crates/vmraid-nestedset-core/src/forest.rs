// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory nested set forest and the planning algorithms shared with the
//! SQL-backed tree repository.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::error::{NestedSetError, Result};
use crate::node::{Interval, TreeNode};

/// New intervals keyed by node name, applied atomically by the caller.
pub type Staging = BTreeMap<String, Interval>;

/// Reject a placement under `target` when `name` is `target` itself or one of
/// its ancestors.
///
/// `nodes` only needs to contain the ancestors-or-self of `target`; extra
/// nodes are ignored.
pub fn validate_loop<'a, I>(nodes: I, name: &str, target: Interval) -> Result<()>
where
	I: IntoIterator<Item = &'a TreeNode>,
{
	let is_loop = nodes
		.into_iter()
		.any(|node| node.name == name && node.interval().contains(target));

	if is_loop {
		return Err(NestedSetError::Recursion {
			name: name.to_string(),
		});
	}
	Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
	nodes: BTreeMap<String, TreeNode>,
}

impl Forest {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_nodes(nodes: impl IntoIterator<Item = TreeNode>) -> Self {
		Self {
			nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
		}
	}

	pub fn get(&self, name: &str) -> Option<&TreeNode> {
		self.nodes.get(name)
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
		self.nodes.values()
	}

	fn require(&self, name: &str) -> Result<&TreeNode> {
		self
			.nodes
			.get(name)
			.ok_or_else(|| NestedSetError::NotFound(name.to_string()))
	}

	/// First placed node not enclosed by any other node.
	pub fn root(&self) -> Option<&TreeNode> {
		self
			.nodes
			.values()
			.filter(|n| n.rgt > n.lft)
			.filter(|n| {
				!self
					.nodes
					.values()
					.any(|other| other.interval().strictly_contains(n.interval()))
			})
			.min_by_key(|n| n.lft)
	}

	pub fn roots(&self) -> Vec<&TreeNode> {
		let mut roots: Vec<&TreeNode> = self.nodes.values().filter(|n| n.is_root()).collect();
		roots.sort_by_key(|n| n.lft);
		roots
	}

	pub fn children(&self, name: &str) -> Vec<&TreeNode> {
		let mut children: Vec<&TreeNode> = self
			.nodes
			.values()
			.filter(|n| n.parent.as_deref() == Some(name))
			.collect();
		children.sort_by_key(|n| n.lft);
		children
	}

	/// Ancestors nearest first.
	pub fn ancestors_of(&self, name: &str) -> Result<Vec<String>> {
		let target = self.require(name)?.interval();
		let mut ancestors: Vec<&TreeNode> = self
			.nodes
			.values()
			.filter(|n| n.interval().strictly_contains(target))
			.collect();
		ancestors.sort_by_key(|n| Reverse(n.lft));
		Ok(ancestors.into_iter().map(|n| n.name.clone()).collect())
	}

	/// Descendants in pre-order.
	pub fn descendants_of(&self, name: &str) -> Result<Vec<String>> {
		let target = self.require(name)?.interval();
		let mut descendants: Vec<&TreeNode> = self
			.nodes
			.values()
			.filter(|n| target.strictly_contains(n.interval()))
			.collect();
		descendants.sort_by_key(|n| n.lft);
		Ok(descendants.into_iter().map(|n| n.name.clone()).collect())
	}

	pub fn validate_loop(&self, name: &str, target: Interval) -> Result<()> {
		validate_loop(self.nodes.values(), name, target)
	}

	/// Boundary at which a new last child of `parent` (or a new root) starts.
	pub fn insertion_point(&self, parent: Option<&str>) -> Result<i64> {
		match parent {
			Some(parent) => Ok(self.require(parent)?.rgt),
			None => Ok(self
				.nodes
				.values()
				.filter(|n| n.is_root())
				.map(|n| n.rgt)
				.max()
				.unwrap_or(0)
				+ 1),
		}
	}

	/// Plan the insertion of `name` as the last child of `parent`.
	///
	/// Returns the new node's interval and the shifted intervals of existing
	/// nodes.
	pub fn plan_insert(&self, name: &str, parent: Option<&str>) -> Result<(Interval, Staging)> {
		if self.nodes.contains_key(name) {
			return Err(NestedSetError::Duplicate(name.to_string()));
		}
		if let Some(parent) = parent {
			let target = self.require(parent)?.interval();
			self.validate_loop(name, target)?;
		}

		let right = self.insertion_point(parent)?;
		let mut staging = Staging::new();
		for node in self.nodes.values() {
			let shifted = Interval::new(
				if node.lft >= right { node.lft + 2 } else { node.lft },
				if node.rgt >= right { node.rgt + 2 } else { node.rgt },
			);
			if shifted.lft == right || shifted.rgt == right + 1 {
				return Err(NestedSetError::Corrupt(format!(
					"gap at {right} is occupied by {}",
					node.name
				)));
			}
			if shifted != node.interval() {
				staging.insert(node.name.clone(), shifted);
			}
		}

		Ok((Interval::new(right, right + 1), staging))
	}

	pub fn insert(&mut self, name: &str, parent: Option<&str>) -> Result<Interval> {
		let (interval, staging) = self.plan_insert(name, parent)?;
		self.apply(&staging);
		self.nodes.insert(
			name.to_string(),
			TreeNode::new(name, parent.map(str::to_string), interval),
		);
		Ok(interval)
	}

	/// Plan moving `name` (with its subtree) to the end of `new_parent`'s
	/// children, or after the last root when `new_parent` is `None`.
	///
	/// Works in three steps on an untouched snapshot:
	/// 1. validate the target (no writes have been planned yet),
	/// 2. close the gap the subtree leaves behind and open one at the target,
	/// 3. offset the subtree into the opened gap.
	pub fn plan_move(&self, name: &str, new_parent: Option<&str>) -> Result<Staging> {
		let subtree = self.require(name)?.interval();
		let parent = match new_parent {
			Some(parent) => {
				let parent = self.require(parent)?;
				self.validate_loop(name, parent.interval())?;
				Some(parent)
			}
			None => None,
		};

		let width = subtree.width();
		let close = |x: i64| if x > subtree.rgt { x - width } else { x };
		let in_subtree = |node: &TreeNode| subtree.contains(node.interval());

		let (target, open_from) = match parent {
			Some(parent) => {
				let at = close(parent.rgt);
				(at, Some(at))
			}
			None => {
				let last = self
					.nodes
					.values()
					.filter(|n| !in_subtree(*n))
					.map(|n| close(n.rgt))
					.max()
					.unwrap_or(0);
				(last + 1, None)
			}
		};
		let open = |x: i64| match open_from {
			Some(at) if x >= at => x + width,
			_ => x,
		};
		let offset = target - subtree.lft;

		let mut staging = Staging::new();
		for node in self.nodes.values() {
			let moved = if in_subtree(node) {
				Interval::new(node.lft + offset, node.rgt + offset)
			} else {
				Interval::new(open(close(node.lft)), open(close(node.rgt)))
			};
			if moved != node.interval() {
				staging.insert(node.name.clone(), moved);
			}
		}
		Ok(staging)
	}

	pub fn move_node(&mut self, name: &str, new_parent: Option<&str>) -> Result<()> {
		let staging = self.plan_move(name, new_parent)?;
		self.apply(&staging);
		if let Some(node) = self.nodes.get_mut(name) {
			node.parent = new_parent.map(str::to_string);
		}
		Ok(())
	}

	/// Delete a leaf, detaching it to the end of the forest first so the
	/// boundary space stays contiguous.
	pub fn remove(&mut self, name: &str, allow_root_deletion: bool) -> Result<()> {
		let node = self.require(name)?;
		if node.is_root() && !allow_root_deletion {
			return Err(NestedSetError::RootDeletion(name.to_string()));
		}
		if !self.children(name).is_empty() {
			return Err(NestedSetError::ChildExists(name.to_string()));
		}

		self.move_node(name, None)?;
		self.nodes.remove(name);
		Ok(())
	}

	/// Recompute every interval from parent pointers: roots and children in
	/// name order, counting from 1.
	///
	/// Nodes whose parent does not exist are unreachable and keep their
	/// current interval.
	pub fn plan_rebuild(&self) -> Staging {
		let mut children: BTreeMap<Option<&str>, Vec<&str>> = BTreeMap::new();
		for node in self.nodes.values() {
			children
				.entry(node.parent.as_deref())
				.or_default()
				.push(node.name.as_str());
		}

		let mut staging = Staging::new();
		let mut right = 1;
		if let Some(roots) = children.get(&None) {
			for root in roots {
				right = rebuild_node(root, right, &children, &mut staging);
			}
		}
		staging
	}

	pub fn rebuild(&mut self) {
		let staging = self.plan_rebuild();
		self.apply(&staging);
	}

	pub fn apply(&mut self, staging: &Staging) {
		for (name, interval) in staging {
			if let Some(node) = self.nodes.get_mut(name) {
				node.lft = interval.lft;
				node.rgt = interval.rgt;
			}
		}
	}

	/// Check the structural invariants of the whole forest.
	pub fn verify(&self) -> Result<()> {
		let mut boundaries: Vec<i64> = self
			.nodes
			.values()
			.flat_map(|n| [n.lft, n.rgt])
			.collect();
		boundaries.sort_unstable();
		let expected: Vec<i64> = (1..=2 * self.nodes.len() as i64).collect();
		if boundaries != expected {
			return Err(NestedSetError::Corrupt(
				"boundaries are not a contiguous 1..=2n range".to_string(),
			));
		}

		for node in self.nodes.values() {
			if node.lft >= node.rgt {
				return Err(NestedSetError::Corrupt(format!(
					"{} has lft {} >= rgt {}",
					node.name, node.lft, node.rgt
				)));
			}

			let descendants = self
				.nodes
				.values()
				.filter(|n| node.interval().strictly_contains(n.interval()))
				.count() as i64;
			if node.rgt - node.lft != 2 * descendants + 1 {
				return Err(NestedSetError::Corrupt(format!(
					"{} spans {} slots for {} descendants",
					node.name,
					node.rgt - node.lft,
					descendants
				)));
			}

			if let Some(parent) = &node.parent {
				let parent = self.require(parent)?;
				if !parent.interval().strictly_contains(node.interval()) {
					return Err(NestedSetError::Corrupt(format!(
						"{} is not nested inside its parent {}",
						node.name, parent.name
					)));
				}
			}
		}
		Ok(())
	}
}

fn rebuild_node(
	name: &str,
	left: i64,
	children: &BTreeMap<Option<&str>, Vec<&str>>,
	staging: &mut Staging,
) -> i64 {
	let mut right = left + 1;
	if let Some(kids) = children.get(&Some(name)) {
		for child in kids {
			right = rebuild_node(child, right, children, staging);
		}
	}
	staging.insert(name.to_string(), Interval::new(left, right));
	right + 1
}
