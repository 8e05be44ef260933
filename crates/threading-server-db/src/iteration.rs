// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cursor pagination shared by the thread, item and saved-query listings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
	#[default]
	FromStart,
	FromEnd,
}

/// A page request. `start_cursor` and `end_cursor` bound the page
/// exclusively; which side of the listing they refer to depends on the
/// listing's natural order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
	#[serde(default)]
	pub start_cursor: Option<String>,
	#[serde(default)]
	pub end_cursor: Option<String>,
	#[serde(default)]
	pub direction: Direction,
	#[serde(default)]
	pub count: i64,
}

impl Iteration {
	pub fn first(count: i64) -> Self {
		Self {
			count,
			..Default::default()
		}
	}

	pub fn after(cursor: impl Into<String>, count: i64) -> Self {
		Self {
			start_cursor: Some(cursor.into()),
			count,
			..Default::default()
		}
	}

	/// Non-positive counts use the default; large ones are capped.
	pub fn clamped_count(&self, default: i64, max: i64) -> i64 {
		if self.count <= 0 {
			default
		} else {
			self.count.min(max)
		}
	}

	pub(crate) fn start(&self) -> Option<&str> {
		self.start_cursor.as_deref().filter(|s| !s.is_empty())
	}

	pub(crate) fn end(&self) -> Option<&str> {
		self.end_cursor.as_deref().filter(|s| !s.is_empty())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
	pub item: T,
	pub cursor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
	pub edges: Vec<Edge<T>>,
	pub has_more: bool,
}

impl<T> Page<T> {
	pub fn empty() -> Self {
		Self {
			edges: Vec::new(),
			has_more: false,
		}
	}

	/// Builds a page from `limit + 1` rows read in scan order. The extra row
	/// only signals that more exist. A `FromEnd` scan is reversed so callers
	/// always see the listing's natural order.
	pub(crate) fn from_scan(mut edges: Vec<Edge<T>>, limit: i64, direction: Direction) -> Self {
		let limit = usize::try_from(limit).unwrap_or(0);
		let has_more = edges.len() > limit;
		edges.truncate(limit);
		if direction == Direction::FromEnd {
			edges.reverse();
		}
		Self { edges, has_more }
	}

	pub fn items(&self) -> impl Iterator<Item = &T> {
		self.edges.iter().map(|e| &e.item)
	}

	pub fn into_items(self) -> Vec<T> {
		self.edges.into_iter().map(|e| e.item).collect()
	}

	pub fn last_cursor(&self) -> Option<&str> {
		self.edges.last().map(|e| e.cursor.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn edges(n: usize) -> Vec<Edge<usize>> {
		(0..n)
			.map(|i| Edge {
				item: i,
				cursor: i.to_string(),
			})
			.collect()
	}

	#[test]
	fn count_is_clamped() {
		assert_eq!(Iteration::first(0).clamped_count(20, 1000), 20);
		assert_eq!(Iteration::first(-5).clamped_count(20, 1000), 20);
		assert_eq!(Iteration::first(5000).clamped_count(20, 1000), 1000);
		assert_eq!(Iteration::first(7).clamped_count(20, 1000), 7);
	}

	#[test]
	fn extra_row_sets_has_more() {
		let page = Page::from_scan(edges(4), 3, Direction::FromStart);
		assert!(page.has_more);
		assert_eq!(page.into_items(), vec![0, 1, 2]);

		let page = Page::from_scan(edges(3), 3, Direction::FromStart);
		assert!(!page.has_more);
	}

	#[test]
	fn from_end_scan_is_reversed_after_truncation() {
		let page = Page::from_scan(edges(4), 3, Direction::FromEnd);
		assert!(page.has_more);
		assert_eq!(page.into_items(), vec![2, 1, 0]);
	}

	#[test]
	fn empty_cursors_are_ignored() {
		let it = Iteration {
			start_cursor: Some(String::new()),
			..Default::default()
		};
		assert_eq!(it.start(), None);
	}
}
